//! Collaborator interfaces
//!
//! The peer core drives the article store, the metadata database and the
//! daemon through these narrow traits and depends on none of their
//! internals. Implementations are expected to be internally thread-safe;
//! every method is synchronous and bounded (bodies are size-limited before
//! they reach the store).

use crate::headers::Headers;
use std::io::{self, Write};
use std::sync::Arc;

/// One parsed overview (XOVER) line
#[derive(Debug, Clone)]
pub struct OverviewEntry {
    /// Article number within the group
    pub number: u64,
    /// Subject header
    pub subject: String,
    /// From header
    pub from: String,
    /// Date header
    pub date: String,
    /// Message identifier
    pub msgid: String,
    /// First References token, empty for thread roots
    pub reference: String,
}

impl OverviewEntry {
    /// Parse a tab-separated overview line
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split('\t');
        let number = fields.next()?.trim().parse().ok()?;
        let subject = fields.next()?.to_string();
        let from = fields.next()?.to_string();
        let date = fields.next()?.to_string();
        let msgid = fields.next()?.to_string();
        let reference = fields.next().unwrap_or("").to_string();
        Some(Self {
            number,
            subject,
            from,
            date,
            msgid,
            reference,
        })
    }

    /// Serialize back to the tab-separated wire form
    pub fn wire_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            self.number, self.subject, self.from, self.date, self.msgid, self.reference
        )
    }
}

/// A fetch request queued for a reader-mode connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleEntry {
    /// Message identifier to fetch
    pub msgid: String,
    /// Newsgroup the request came from
    pub newsgroup: String,
}

impl ArticleEntry {
    /// Convenience constructor
    pub fn new(msgid: impl Into<String>, newsgroup: impl Into<String>) -> Self {
        Self {
            msgid: msgid.into(),
            newsgroup: newsgroup.into(),
        }
    }
}

/// On-disk article store surface consumed by the peer core
pub trait ArticleStore: Send + Sync {
    /// Whether the store holds the article
    fn has_article(&self, msgid: &str) -> bool;

    /// Full raw article (headers, separator, body) for transmission
    fn open_message(&self, msgid: &str) -> io::Result<Vec<u8>>;

    /// Begin writing a new article file.
    ///
    /// Returns `None` when another writer is already producing the same
    /// message-id; the caller must discard the body without error.
    fn create_file(&self, msgid: &str) -> Option<Box<dyn Write + Send>>;

    /// Feed a size-limited body through the store's processing (attachment
    /// extraction etc.) into an open file
    fn process_message_body(
        &self,
        file: &mut dyn Write,
        headers: &Headers,
        body: &[u8],
    ) -> io::Result<()>;

    /// Stored size in bytes
    fn get_message_size(&self, msgid: &str) -> io::Result<u64>;

    /// Parsed header block of a stored article
    fn get_headers(&self, msgid: &str) -> Option<Headers>;

    /// MIME header block of a stored article (identical shape, separate
    /// lookup path so implementations can serve it from cache)
    fn get_mime_header(&self, msgid: &str) -> Option<Headers>;

    /// Store-relative filename for a message
    fn get_filename(&self, msgid: &str) -> String;
}

/// Metadata database surface consumed by the peer core
pub trait Database: Send + Sync {
    /// Whether the database knows the article (including expired rows)
    fn has_article(&self, msgid: &str) -> bool;

    /// Whether the article body is present locally
    fn has_article_local(&self, msgid: &str) -> bool;

    /// Whether the article id is banned
    fn article_banned(&self, msgid: &str) -> bool;

    /// Add an article id to the ban list
    fn ban_article(&self, msgid: &str, reason: &str);

    /// Whether the newsgroup is banned
    fn newsgroup_banned(&self, group: &str) -> bool;

    /// Whether an Ed25519 pubkey (hex) is banned
    fn pubkey_banned(&self, pubkey: &str) -> bool;

    /// Whether an encrypted poster address is banned
    fn enc_ip_banned(&self, encaddr: &str) -> bool;

    /// Encrypted form of a remote address, minted on first use
    fn get_enc_address(&self, addr: &str) -> io::Result<String>;

    /// Whether the article existed but has been expired
    fn is_expired(&self, msgid: &str) -> bool;

    /// Whether the group exists locally
    fn has_newsgroup(&self, group: &str) -> bool;

    /// Every group known to the instance
    fn get_all_newsgroups(&self) -> Vec<String>;

    /// Highest and lowest article numbers for a group
    fn get_last_and_first_for_group(&self, group: &str) -> Option<(u64, u64)>;

    /// Total article count in a group
    fn count_all_articles_in_group(&self, group: &str) -> u64;

    /// Count of root posts in a group
    fn count_posts_in_group(&self, group: &str) -> u64;

    /// Translate a group-local article number to a message-id
    fn get_msgid_for_nntp_id(&self, group: &str, number: u64) -> Option<String>;

    /// Translate a message-id to its group-local article number
    fn get_nntp_id_for_msgid(&self, group: &str, msgid: &str) -> Option<u64>;

    /// Overview data for every article in a group, ordered by number
    fn get_nntp_posts_in_group(&self, group: &str) -> Vec<OverviewEntry>;

    /// Whether an NNTP login exists; an `Err` is a lookup failure, not a
    /// failed authentication
    fn check_nntp_user_exists(&self, username: &str) -> io::Result<bool>;

    /// Verify NNTP credentials
    fn check_nntp_login(&self, username: &str, password: &str) -> io::Result<bool>;
}

/// Daemon surface consumed by the peer core
pub trait Daemon: Send + Sync {
    /// Hand a freshly stored article to the daemon's infeed pipeline
    fn load_from_infeed(&self, msgid: &str);

    /// Queue a fetch request for a reader-mode connection
    fn ask_for_article(&self, entry: ArticleEntry);

    /// Per-newsgroup article size limit in bytes
    fn message_size_limit_for(&self, group: &str) -> u64;

    /// Whether TLS is configured at all
    fn can_tls(&self) -> bool;

    /// Client-side TLS config for dialing the named host
    fn get_tls_config(&self, host: &str) -> Option<Arc<rustls::ClientConfig>>;

    /// Server-side TLS config for accepting STARTTLS
    fn get_our_tls_config(&self) -> Option<Arc<rustls::ServerConfig>>;

    /// Verify a frontend signature over a message-id
    fn verify_frontend_signature(&self, pubkey: &str, signature: &str, msgid: &str) -> bool;
}
