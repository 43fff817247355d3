//! Shared per-connection state
//!
//! One `Connection` is shared between the supervisor, the engines and the
//! daemon's feed dispatcher. The offer channels are the backpressure
//! surface: their bounded depth blocks the dispatcher once a slow peer has
//! 1024 unresolved offers outstanding.

use crate::pending::{OfferState, PendingTable};
use crate::storage::ArticleEntry;
use crate::tls::HandshakeRecord;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

/// Reserved keepalive identifier; never stored, never forwarded
pub const DUMMY_MSGID: &str = "<keepalive@dummy.tld>";

/// Bounded depth of each offer channel
pub const OFFER_CHANNEL_DEPTH: usize = 1024;

/// Negotiated connection mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Nothing negotiated yet; only STARTTLS, CAPABILITIES, MODE, AUTHINFO
    /// and QUIT are legal
    #[default]
    Unset,
    /// ARTICLE-based reading
    Reader,
    /// Pipelined CHECK/TAKETHIS
    Stream,
}

/// Receiver ends handed to whichever engine drives the connection
pub struct ConnectionChannels {
    /// CHECK offers awaiting transmission
    pub check_rx: mpsc::Receiver<String>,
    /// TAKETHIS transfers awaiting transmission
    pub takethis_rx: mpsc::Receiver<String>,
    /// ARTICLE fetches awaiting transmission (reader mode)
    pub article_rx: mpsc::Receiver<ArticleEntry>,
    /// Graceful-shutdown requests carrying their acknowledgement channel
    pub die_rx: mpsc::Receiver<oneshot::Sender<()>>,
    /// Force-close signal
    pub abort_rx: watch::Receiver<bool>,
}

/// State shared across the tasks of one peer connection
pub struct Connection {
    /// Feed this connection belongs to
    pub feed_name: String,
    /// Human-readable name for logs
    pub display_name: String,
    /// Remote socket address
    pub remote_addr: String,
    /// Remote hostname (TLS server name)
    pub hostname: String,
    /// Offer bookkeeping
    pub pending: PendingTable,

    mode: Mutex<Mode>,
    authenticated: AtomicBool,
    username: Mutex<Option<String>>,
    tls: Mutex<Option<HandshakeRecord>>,

    check_tx: mpsc::Sender<String>,
    takethis_tx: mpsc::Sender<String>,
    article_tx: mpsc::Sender<ArticleEntry>,
    die_tx: mpsc::Sender<oneshot::Sender<()>>,
    abort_tx: watch::Sender<bool>,
}

impl Connection {
    /// Build the shared state and the engine-side channel ends
    pub fn new(
        feed_name: impl Into<String>,
        display_name: impl Into<String>,
        remote_addr: impl Into<String>,
        hostname: impl Into<String>,
    ) -> (std::sync::Arc<Self>, ConnectionChannels) {
        let (check_tx, check_rx) = mpsc::channel(OFFER_CHANNEL_DEPTH);
        let (takethis_tx, takethis_rx) = mpsc::channel(OFFER_CHANNEL_DEPTH);
        let (article_tx, article_rx) = mpsc::channel(OFFER_CHANNEL_DEPTH);
        let (die_tx, die_rx) = mpsc::channel(1);
        let (abort_tx, abort_rx) = watch::channel(false);
        let conn = std::sync::Arc::new(Self {
            feed_name: feed_name.into(),
            display_name: display_name.into(),
            remote_addr: remote_addr.into(),
            hostname: hostname.into(),
            pending: PendingTable::new(),
            mode: Mutex::new(Mode::Unset),
            authenticated: AtomicBool::new(false),
            username: Mutex::new(None),
            tls: Mutex::new(None),
            check_tx,
            takethis_tx,
            article_tx,
            die_tx,
            abort_tx,
        });
        let channels = ConnectionChannels {
            check_rx,
            takethis_rx,
            article_rx,
            die_rx,
            abort_rx,
        };
        (conn, channels)
    }

    /// Current negotiated mode
    pub fn mode(&self) -> Mode {
        *self.mode.lock().unwrap()
    }

    /// Record the negotiated mode
    pub fn set_mode(&self, mode: Mode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// Whether the peer has authenticated (credentials or TLS handshake)
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// Flip the authenticated flag
    pub fn set_authenticated(&self, authed: bool) {
        self.authenticated.store(authed, Ordering::SeqCst);
    }

    /// Accepted username, if credentials were used
    pub fn username(&self) -> Option<String> {
        self.username.lock().unwrap().clone()
    }

    /// Record the accepted username
    pub fn set_username(&self, username: &str) {
        *self.username.lock().unwrap() = Some(username.to_string());
    }

    /// Handshake record of a completed STARTTLS upgrade
    pub fn tls_record(&self) -> Option<HandshakeRecord> {
        self.tls.lock().unwrap().clone()
    }

    /// Store the handshake record after a STARTTLS upgrade
    pub fn set_tls_record(&self, record: HandshakeRecord) {
        *self.tls.lock().unwrap() = Some(record);
    }

    /// Offer an article for streaming push.
    ///
    /// No-op when the id is already pending (or is the keepalive dummy);
    /// otherwise the size joins the backlog and a CHECK is queued. Blocks
    /// once the channel is full, propagating peer slowness upstream.
    pub async fn offer_stream(&self, msgid: &str, size: u64) {
        if msgid == DUMMY_MSGID || self.pending.is_queued(msgid) {
            return;
        }
        self.pending.set_state(msgid, OfferState::Queued, size);
        if self.check_tx.send(msgid.to_string()).await.is_err() {
            debug!("{}: offer after sender stopped: {}", self.display_name, msgid);
            self.pending.set_processed(msgid);
        }
    }

    /// Queue a TAKETHIS transfer after the peer answered 238
    pub(crate) async fn push_takethis(&self, msgid: &str) {
        if self.takethis_tx.send(msgid.to_string()).await.is_err() {
            debug!(
                "{}: takethis after sender stopped: {}",
                self.display_name, msgid
            );
            self.pending.set_processed(msgid);
        }
    }

    /// Queue an ARTICLE fetch on a reader-mode connection
    pub async fn ask_for_article(&self, entry: ArticleEntry) {
        if entry.msgid == DUMMY_MSGID || self.pending.is_queued(&entry.msgid) {
            return;
        }
        self.pending.set_state(&entry.msgid, OfferState::Queued, 0);
        if self.article_tx.send(entry.clone()).await.is_err() {
            debug!(
                "{}: fetch after reader stopped: {}",
                self.display_name, entry.msgid
            );
            self.pending.set_processed(&entry.msgid);
        }
    }

    /// Ask the running engine to QUIT, close and acknowledge
    pub async fn quit_and_wait(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.die_tx.send(ack_tx).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Force-close the underlying transport
    pub fn abort(&self) {
        let _ = self.abort_tx.send(true);
    }
}
