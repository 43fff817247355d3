//! Connection supervision
//!
//! Ties the engines together. Outbound: dial with tuned sockets, optional
//! STARTTLS, the CAPABILITIES/AUTHINFO handshake, mode selection, then
//! either the two-task STREAM topology (sender plus response reader) or the
//! single-task READER loop. Inbound: greet and hand the transport to the
//! [`ServerSession`] dispatcher. Errors never escape: a connection ends by
//! returning, and nothing here terminates the process.

use crate::capabilities::Capabilities;
use crate::codec::{BoxedTransport, LineCodec, SharedWriter};
use crate::commands;
use crate::config::{DaemonConfig, FeedConfig, FeedMode, FeedPolicy};
use crate::conn::{Connection, ConnectionChannels, Mode};
use crate::error::{PeerError, Result};
use crate::reader::ReaderEngine;
use crate::response::{Reply, codes};
use crate::server::ServerSession;
use crate::storage::{ArticleStore, Daemon, Database};
use crate::stream::{self, StreamEngine};
use crate::tls;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// TCP connection timeout in seconds
const TCP_CONNECT_TIMEOUT_SECS: u64 = 120;

/// Socket buffer size for bulk article transfer (1MB both directions)
const SOCKET_BUFFER_SIZE: usize = 1024 * 1024;

/// The external collaborators every connection consumes
#[derive(Clone)]
pub struct Collaborators {
    /// On-disk article store
    pub store: Arc<dyn ArticleStore>,
    /// Metadata database
    pub db: Arc<dyn Database>,
    /// Daemon surface (infeed, fetch queue, TLS configs)
    pub daemon: Arc<dyn Daemon>,
}

/// Dial a peer with tuned socket options.
///
/// Sets `TCP_NODELAY` for the command round-trips and enlarged buffers for
/// article bulk transfer; the blocking connect runs on a blocking task
/// before conversion to a tokio stream.
pub async fn dial(addr: &str) -> Result<TcpStream> {
    use std::net::ToSocketAddrs;
    debug!("dialing peer {}", addr);
    let socket_addr = addr
        .to_socket_addrs()
        .map_err(PeerError::Io)?
        .next()
        .ok_or_else(|| {
            PeerError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "no address resolved",
            ))
        })?;

    use socket2::{Domain, Protocol, Socket, Type};
    let domain = if socket_addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(PeerError::Io)?;
    socket.set_nodelay(true).map_err(PeerError::Io)?;
    if let Err(e) = socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE) {
        warn!("failed to set receive buffer size: {}", e);
    }
    if let Err(e) = socket.set_send_buffer_size(SOCKET_BUFFER_SIZE) {
        warn!("failed to set send buffer size: {}", e);
    }

    // connect while the socket is still blocking, then flip to non-blocking
    let tcp_stream = timeout(
        Duration::from_secs(TCP_CONNECT_TIMEOUT_SECS),
        tokio::task::spawn_blocking(move || -> std::io::Result<std::net::TcpStream> {
            socket.connect(&socket_addr.into())?;
            socket.set_nonblocking(true)?;
            Ok(socket.into())
        }),
    )
    .await
    .map_err(|_| PeerError::Timeout)?
    .map_err(|e| PeerError::Io(std::io::Error::other(format!("task join error: {}", e))))?
    .map_err(PeerError::Io)?;

    TcpStream::from_std(tcp_stream).map_err(PeerError::Io)
}

/// Build the shared state for an outbound feed connection.
///
/// The daemon keeps the returned [`Connection`] to submit offers and to
/// shut the connection down; the channels go to [`run_outbound`].
pub fn outbound_connection(feed: &FeedConfig) -> (Arc<Connection>, ConnectionChannels) {
    Connection::new(&feed.name, &feed.name, &feed.addr, &feed.hostname)
}

/// Dial a feed and drive it until it ends
pub async fn connect_feed(
    feed: FeedConfig,
    config: DaemonConfig,
    collab: Collaborators,
) -> Result<()> {
    let (conn, channels) = outbound_connection(&feed);
    let stream = dial(&feed.addr).await?;
    run_outbound(feed, config, collab, conn, channels, Box::new(stream)).await
}

/// Drive an outbound connection over an established transport.
///
/// Runs the handshake and the selected engine to completion; all transport
/// failures surface here and close the connection.
pub async fn run_outbound(
    feed: FeedConfig,
    config: DaemonConfig,
    collab: Collaborators,
    conn: Arc<Connection>,
    channels: ConnectionChannels,
    transport: BoxedTransport,
) -> Result<()> {
    let mut codec = LineCodec::new(transport);

    let greeting = Reply::parse(&codec.read_line().await?)?;
    let posting_allowed = match greeting.code {
        codes::READY_POSTING_ALLOWED => true,
        codes::READY_NO_POSTING => false,
        other => {
            return Err(PeerError::Protocol {
                code: other,
                message: greeting.message,
            });
        }
    };
    debug!(
        "{}: connected, posting allowed: {}",
        conn.display_name, posting_allowed
    );

    if !feed.tls_off && collab.daemon.can_tls() {
        let tls_config = collab
            .daemon
            .get_tls_config(&feed.hostname)
            .unwrap_or_else(|| tls::client_tls_config(feed.tls_insecure));
        let (upgraded, record) =
            tls::initiate_starttls(codec, tls_config, &feed.hostname).await?;
        codec = upgraded;
        conn.set_tls_record(record);
        conn.set_authenticated(true);
    }

    codec.send_command(commands::capabilities()).await?;
    let reply = Reply::parse(&codec.read_line().await?)?;
    if reply.code != codes::CAPABILITY_LIST {
        return Err(PeerError::Protocol {
            code: reply.code,
            message: reply.message,
        });
    }
    let caps = Capabilities::parse(&codec.read_dot_lines().await?);

    if feed.has_credentials() {
        authenticate(&mut codec, &feed).await?;
        conn.set_authenticated(true);
        conn.set_username(&feed.username);
    }

    if feed.mode == FeedMode::Stream && caps.supports_streaming() && conn.is_authenticated() {
        codec.send_command(commands::mode_stream()).await?;
        let reply = Reply::parse(&codec.read_line().await?)?;
        if reply.is_success() {
            info!("{}: streaming to peer", conn.display_name);
            conn.set_mode(Mode::Stream);
            return run_stream_loop(codec, conn, collab, channels).await;
        }
        warn!(
            "{}: peer refused MODE STREAM: {}",
            conn.display_name, reply.code
        );
    }

    if caps.supports_reader() {
        codec.send_command(commands::mode_reader()).await?;
        let reply = Reply::parse(&codec.read_line().await?)?;
        if reply.is_success() {
            info!("{}: reading from peer", conn.display_name);
            conn.set_mode(Mode::Reader);
            let (reader, writer) = codec.split();
            let mut engine = ReaderEngine::new(
                conn.clone(),
                collab.store,
                collab.db,
                collab.daemon,
                config,
                Some(feed.policy),
                reader,
                SharedWriter::new(writer),
                channels,
            );
            if feed.scrape_on_connect {
                engine.scrape_server().await?;
            }
            return engine.run().await;
        }
    }

    debug!("{}: no usable mode with peer", conn.display_name);
    codec.send_command(commands::quit()).await?;
    Ok(())
}

async fn authenticate(codec: &mut LineCodec, feed: &FeedConfig) -> Result<()> {
    codec
        .send_command(&commands::authinfo_user(&feed.username))
        .await?;
    let reply = Reply::parse(&codec.read_line().await?)?;
    if reply.code == codes::AUTH_CONTINUE {
        codec
            .send_command(&commands::authinfo_pass(&feed.password))
            .await?;
        let reply = Reply::parse(&codec.read_line().await?)?;
        if reply.code != codes::AUTH_ACCEPTED {
            return Err(PeerError::AuthFailed(reply.message));
        }
    } else if reply.code != codes::AUTH_ACCEPTED {
        return Err(PeerError::AuthFailed(reply.message));
    }
    Ok(())
}

/// The two-task STREAM topology: the sender owns all writes, this loop owns
/// the read half and feeds coded replies back into the pending bookkeeping.
async fn run_stream_loop(
    codec: LineCodec,
    conn: Arc<Connection>,
    collab: Collaborators,
    channels: ConnectionChannels,
) -> Result<()> {
    let mut abort_rx = channels.abort_rx.clone();
    let (mut reader, writer) = codec.split();
    let engine = StreamEngine::new(
        conn.clone(),
        collab.store.clone(),
        SharedWriter::new(writer),
        channels,
    );
    let sender = tokio::spawn(engine.run());

    let result = loop {
        tokio::select! {
            _ = abort_rx.changed() => {
                debug!("{}: aborted", conn.display_name);
                break Ok(());
            }
            line = reader.read_line() => match line {
                Ok(line) => {
                    if line.is_empty() {
                        continue;
                    }
                    match Reply::parse(&line) {
                        Ok(reply) => {
                            stream::handle_stream_reply(&conn, &collab.store, &reply).await;
                        }
                        Err(e) => {
                            warn!("{}: unparseable reply: {}", conn.display_name, e);
                        }
                    }
                }
                Err(PeerError::ConnectionClosed) => {
                    debug!("{}: peer closed", conn.display_name);
                    break Ok(());
                }
                Err(e) => break Err(e),
            }
        }
    };
    // dropping the halves closes the transport; the sender cannot make
    // progress without it
    sender.abort();
    result
}

/// Build the shared state and session for an accepted inbound connection.
///
/// The daemon keeps the [`Connection`] so it can offer articles back over
/// the same link once the peer negotiates MODE STREAM.
pub fn accept_connection(
    transport: BoxedTransport,
    remote_addr: String,
    collab: Collaborators,
    config: DaemonConfig,
    policy: Option<FeedPolicy>,
) -> (Arc<Connection>, ServerSession) {
    let display = format!("inbound-{}", remote_addr);
    let (conn, channels) = Connection::new("inbound", display, remote_addr, "");
    let session = ServerSession::new(
        conn.clone(),
        channels,
        LineCodec::new(transport),
        collab.store,
        collab.db,
        collab.daemon,
        config,
        policy,
    );
    (conn, session)
}

/// Accept inbound peers forever, one task per connection
pub async fn serve(
    listener: TcpListener,
    collab: Collaborators,
    config: DaemonConfig,
    policy: Option<FeedPolicy>,
) -> Result<()> {
    loop {
        let (stream, addr) = listener.accept().await.map_err(PeerError::Io)?;
        debug!("accepted peer {}", addr);
        let (_conn, session) = accept_connection(
            Box::new(stream),
            addr.to_string(),
            collab.clone(),
            config.clone(),
            policy.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = session.run().await {
                warn!("connection from {} failed: {}", addr, e);
            }
        });
    }
}
