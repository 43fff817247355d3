//! Opportunistic STARTTLS upgrade (RFC 4642)
//!
//! Both directions of the upgrade operate on an already-connected framed
//! stream: the codec yields back its transport, the handshake runs, and a
//! fresh codec is built over the TLS stream. On handshake failure the
//! transport is dropped (closed); no partially upgraded stream is ever
//! exposed.

use crate::codec::LineCodec;
use crate::commands;
use crate::error::{PeerError, Result};
use crate::response::{Reply, codes};
use std::sync::Arc;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{CryptoProvider, ring};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{
    ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme,
};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, warn};

/// What a completed STARTTLS handshake established
#[derive(Debug, Clone, Default)]
pub struct HandshakeRecord {
    /// Peer certificate chain, DER encoded, leaf first
    pub peer_certificates: Vec<Vec<u8>>,
    /// Negotiated protocol version, e.g. `TLSv1_3`
    pub protocol: Option<String>,
}

impl HandshakeRecord {
    fn from_parts(
        certs: Option<&[CertificateDer<'_>]>,
        protocol: Option<tokio_rustls::rustls::ProtocolVersion>,
    ) -> Self {
        Self {
            peer_certificates: certs
                .map(|list| list.iter().map(|c| c.as_ref().to_vec()).collect())
                .unwrap_or_default(),
            protocol: protocol.map(|p| format!("{:?}", p)),
        }
    }
}

/// Signature schemes a self-signed peer certificate on this network may
/// carry: Ed25519 and NIST-curve ECDSA cover every daemon generating its
/// own cert today, the two RSA entries cover TLS 1.3 and 1.2 handshakes
/// against older RSA-keyed peers.
const PEER_SIGNATURE_SCHEMES: [SignatureScheme; 5] = [
    SignatureScheme::ED25519,
    SignatureScheme::ECDSA_NISTP256_SHA256,
    SignatureScheme::ECDSA_NISTP384_SHA384,
    SignatureScheme::RSA_PSS_SHA256,
    SignatureScheme::RSA_PKCS1_SHA256,
];

/// Verifier for feeds marked `tls_insecure`: trusts whatever certificate a
/// self-signed peer presents.
///
/// No chain building, no expiry or name checks; the only constraint kept is
/// the signature-scheme set above. STARTTLS still protects the link from
/// passive snooping, but a peer dialed through this verifier can be
/// impersonated.
#[derive(Debug)]
struct SelfSignedPeerVerifier;

impl ServerCertVerifier for SelfSignedPeerVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        PEER_SIGNATURE_SCHEMES.to_vec()
    }
}

/// Build a client-side TLS config for dialing peers.
///
/// Validates against the Mozilla root store unless `insecure` is set.
pub fn client_tls_config(insecure: bool) -> Arc<ClientConfig> {
    let _ = CryptoProvider::install_default(ring::default_provider());
    let config = if insecure {
        warn!("TLS certificate validation disabled for this feed");
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SelfSignedPeerVerifier))
            .with_no_client_auth()
    } else {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth()
    };
    Arc::new(config)
}

/// Initiate STARTTLS on an established connection.
///
/// Sends `STARTTLS`, expects `382`, performs the client-side handshake and
/// returns the re-framed stream plus the handshake record.
pub async fn initiate_starttls(
    mut codec: LineCodec,
    config: Arc<ClientConfig>,
    server_name: &str,
) -> Result<(LineCodec, HandshakeRecord)> {
    codec.send_command(commands::starttls()).await?;
    let reply = Reply::parse(&codec.read_line().await?)?;
    if reply.code != codes::CONTINUE_TLS {
        return Err(PeerError::Protocol {
            code: reply.code,
            message: reply.message,
        });
    }

    let name = ServerName::try_from(server_name)
        .map_err(|e| PeerError::Tls(format!("invalid server name: {}", e)))?
        .to_owned();
    let connector = TlsConnector::from(config);
    let transport = codec.into_inner();
    let stream = connector
        .connect(name, transport)
        .await
        .map_err(|e| PeerError::Tls(format!("TLS handshake failed: {}", e)))?;

    let session = stream.get_ref().1;
    let record = HandshakeRecord::from_parts(session.peer_certificates(), session.protocol_version());
    debug!("STARTTLS established: {:?}", record.protocol);
    Ok((LineCodec::new(Box::new(stream)), record))
}

/// Accept STARTTLS on an established inbound connection.
///
/// Replies `382`, performs the server-side handshake and returns the
/// re-framed stream plus the handshake record.
pub async fn accept_starttls(
    mut codec: LineCodec,
    config: Arc<ServerConfig>,
) -> Result<(LineCodec, HandshakeRecord)> {
    codec
        .send_line("382 Continue with TLS negotiation")
        .await?;
    let acceptor = TlsAcceptor::from(config);
    let transport = codec.into_inner();
    let stream = acceptor
        .accept(transport)
        .await
        .map_err(|e| PeerError::Tls(format!("TLS handshake failed: {}", e)))?;

    let session = stream.get_ref().1;
    let record = HandshakeRecord::from_parts(session.peer_certificates(), session.protocol_version());
    debug!("STARTTLS accepted: {:?}", record.protocol);
    Ok((LineCodec::new(Box::new(stream)), record))
}
