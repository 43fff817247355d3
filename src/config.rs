//! Peer and instance configuration
//!
//! `FeedConfig` describes one outbound peering arrangement; `DaemonConfig`
//! captures the instance-wide admission toggles immutably at connection
//! setup, so a running connection never observes a config flip mid-flight.

/// Preferred mode for an outbound feed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FeedMode {
    /// Pipelined CHECK/TAKETHIS push
    Stream,
    /// ARTICLE-based fetching and scraping
    Reader,
}

/// One ordered newsgroup wildcard rule
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PolicyRule {
    /// Group pattern: exact name, `prefix.*`, or `*`
    pub pattern: String,
    /// Whether a match allows or refuses the group
    pub allow: bool,
}

/// Per-feed newsgroup allow/deny policy; first matching rule wins
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeedPolicy {
    /// Ordered rules; an empty policy allows everything
    pub rules: Vec<PolicyRule>,
}

impl FeedPolicy {
    /// Whether this policy lets the named group through
    pub fn allows_newsgroup(&self, group: &str) -> bool {
        for rule in &self.rules {
            if pattern_matches(&rule.pattern, group) {
                return rule.allow;
            }
        }
        true
    }
}

fn pattern_matches(pattern: &str, group: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return group == prefix || group.starts_with(&format!("{}.", prefix));
    }
    pattern == group
}

/// Configuration for one outbound feed
#[must_use]
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeedConfig {
    /// Feed name used in logs and the pending bookkeeping
    pub name: String,

    /// Peer address as `host:port`
    pub addr: String,

    /// Peer hostname for TLS server-name verification
    pub hostname: String,

    /// Username for AUTHINFO, empty to skip authentication
    pub username: String,

    /// Password for AUTHINFO
    pub password: String,

    /// Skip the opportunistic STARTTLS upgrade
    #[cfg_attr(feature = "serde", serde(default))]
    pub tls_off: bool,

    /// Accept self-signed peer certificates.
    ///
    /// Disables certificate validation for this feed; only for peers you
    /// trust on a network you trust.
    #[cfg_attr(feature = "serde", serde(default))]
    pub tls_insecure: bool,

    /// Preferred mode once capabilities allow it
    pub mode: FeedMode,

    /// Walk the peer's NEWSGROUPS/GROUP/XOVER surface once after connecting
    /// in reader mode
    #[cfg_attr(feature = "serde", serde(default))]
    pub scrape_on_connect: bool,

    /// Newsgroup policy applied to articles offered to and fetched from
    /// this feed
    #[cfg_attr(feature = "serde", serde(default))]
    pub policy: FeedPolicy,
}

impl FeedConfig {
    /// Create a streaming feed configuration
    pub fn stream(
        name: impl Into<String>,
        addr: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let addr = addr.into();
        let hostname = addr.split(':').next().unwrap_or_default().to_string();
        Self {
            name: name.into(),
            addr,
            hostname,
            username: username.into(),
            password: password.into(),
            tls_off: false,
            tls_insecure: false,
            mode: FeedMode::Stream,
            scrape_on_connect: false,
            policy: FeedPolicy::default(),
        }
    }

    /// Create a reader/scraper feed configuration (no credentials)
    pub fn reader(name: impl Into<String>, addr: impl Into<String>) -> Self {
        let mut config = Self::stream(name, addr, "", "");
        config.mode = FeedMode::Reader;
        config
    }

    /// Whether AUTHINFO credentials are configured
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }
}

/// Instance-wide knobs captured at connection setup
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DaemonConfig {
    /// Instance name prepended to Path and used in synthesized Message-IDs
    pub instance_name: String,

    /// Accept articles from anonymous posters
    pub allow_anon: bool,

    /// Accept attachments on anonymous articles
    pub allow_anon_attachments: bool,

    /// Accept attachments at all
    pub allow_attachments: bool,

    /// Use the corrected message-id/reference admission predicate.
    ///
    /// When unset, a malformed message-id is tolerated whenever the
    /// article's reference is also malformed, which is what older daemons
    /// on the network do; set it once every peer validates strictly.
    pub strict_msgid: bool,
}

impl DaemonConfig {
    /// Config with everything closed down except authenticated peering
    pub fn restrictive(instance_name: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
            allow_anon: false,
            allow_anon_attachments: false,
            allow_attachments: false,
            strict_msgid: false,
        }
    }

    /// Config accepting anonymous posts and attachments
    pub fn permissive(instance_name: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
            allow_anon: true,
            allow_anon_attachments: true,
            allow_attachments: true,
            strict_msgid: false,
        }
    }
}
