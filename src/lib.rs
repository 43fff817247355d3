#![doc = include_str!("../README.md")]

/// Admission control for inbound articles
pub mod admission;
/// Capabilities parsing (RFC 3977 Section 5.2)
pub mod capabilities;
/// Line framing and dot-stuffed payloads
pub mod codec;
mod commands;
/// Per-feed and instance configuration
pub mod config;
/// Shared per-connection state and offer channels
pub mod conn;
mod error;
/// MIME header block parsing
pub mod headers;
mod ingest;
/// Per-connection offer bookkeeping
pub mod pending;
/// READER-mode client engine and scraper
pub mod reader;
mod response;
/// Inbound command dispatch
pub mod server;
/// Collaborator interfaces (store, database, daemon)
pub mod storage;
/// STREAMING-mode sender (RFC 4644)
pub mod stream;
/// Connection supervision and handshakes
pub mod supervisor;
/// STARTTLS upgrade (RFC 4642)
pub mod tls;
/// Message-id and newsgroup validation
pub mod validation;

pub use admission::{Admission, AdmissionFacts, check as admission_check};
pub use capabilities::Capabilities;
pub use codec::{BoxedTransport, DotBody, LineCodec, LineReader, LineWriter, SharedWriter};
pub use config::{DaemonConfig, FeedConfig, FeedMode, FeedPolicy, PolicyRule};
pub use conn::{Connection, ConnectionChannels, DUMMY_MSGID, Mode};
pub use error::{PeerError, Result};
pub use headers::Headers;
pub use pending::{OfferRecord, OfferState, PendingTable};
pub use reader::ReaderEngine;
pub use response::{Reply, codes};
pub use server::ServerSession;
pub use storage::{ArticleEntry, ArticleStore, Daemon, Database, OverviewEntry};
pub use stream::{KEEPALIVE_INTERVAL, StreamEngine, handle_stream_reply};
pub use supervisor::{
    Collaborators, accept_connection, connect_feed, dial, outbound_connection, run_outbound,
    serve,
};
pub use tls::{HandshakeRecord, accept_starttls, client_tls_config, initiate_starttls};
pub use validation::{valid_message_id, valid_newsgroup};
