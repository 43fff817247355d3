//! NNTP peer error types

use thiserror::Error;

/// NNTP protocol and connection errors
#[derive(Error, Debug)]
pub enum PeerError {
    /// IO error during network operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS error during STARTTLS upgrade
    #[error("TLS error: {0}")]
    Tls(String),

    /// Connection timeout
    #[error("connection timeout")]
    Timeout,

    /// A received line exceeded the per-line size cap
    #[error("line too long: {0} bytes")]
    LineTooLong(usize),

    /// Invalid response from the remote peer
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// NNTP protocol error with response code
    #[error("NNTP error {code}: {message}")]
    Protocol {
        /// NNTP response code (e.g., 431, 480, 502)
        code: u16,
        /// Error message from the peer
        message: String,
    },

    /// Authentication failed
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Connection closed by the remote peer
    #[error("connection closed")]
    ConnectionClosed,

    /// UTF-8 decoding error
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Result type alias using PeerError
pub type Result<T> = std::result::Result<T, PeerError>;
