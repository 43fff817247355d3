//! Inbound article admission control
//!
//! `check` is a pure function over the parsed header block, the connection's
//! auth state and a set of already-fetched predicates, so every branch of
//! the decision table is unit-testable without a database in the room.

use crate::config::DaemonConfig;
use crate::headers::{Headers, first_newsgroup, first_reference};
use crate::validation::{valid_message_id, valid_newsgroup, well_formed_pubkey};

/// Outcome of the admission decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Store the article
    Accept,
    /// Discard the article
    Reject {
        /// Human-readable reason reported to the peer
        reason: String,
    },
    /// Discard the article and add its message-id to the ban list
    Ban {
        /// Human-readable reason reported to the peer
        reason: String,
    },
}

impl Admission {
    fn reject(reason: impl Into<String>) -> Self {
        Admission::Reject {
            reason: reason.into(),
        }
    }

    fn ban(reason: impl Into<String>) -> Self {
        Admission::Ban {
            reason: reason.into(),
        }
    }

    /// Whether the article should be stored
    pub fn is_accept(&self) -> bool {
        matches!(self, Admission::Accept)
    }

    /// Whether the message-id should be banned
    pub fn is_ban(&self) -> bool {
        matches!(self, Admission::Ban { .. })
    }

    /// The rejection reason, if any
    pub fn reason(&self) -> Option<&str> {
        match self {
            Admission::Accept => None,
            Admission::Reject { reason } | Admission::Ban { reason } => Some(reason),
        }
    }
}

/// External lookups prefetched by the caller.
///
/// Defaults are the permissive answers, so a test can override only the
/// predicate it exercises.
#[derive(Debug, Clone)]
pub struct AdmissionFacts {
    /// The article's frontend pubkey is on the banned-pubkey list
    pub frontend_pubkey_banned: bool,
    /// The frontend signature verifies over the message-id
    pub frontend_sig_valid: bool,
    /// The newsgroup is on the banned list
    pub newsgroup_banned: bool,
    /// The poster pubkey is on the banned list
    pub poster_pubkey_banned: bool,
    /// The feed policy accepts the newsgroup
    pub policy_allows: bool,
    /// The store already holds the article
    pub store_has: bool,
    /// The message-id is on the article-ban list
    pub article_banned: bool,
    /// The first reference is on the article-ban list
    pub reference_banned: bool,
    /// The database already records the article (expired rows included)
    pub db_has: bool,
    /// The poster's encrypted address is banned
    pub enc_ip_banned: bool,
}

impl Default for AdmissionFacts {
    fn default() -> Self {
        Self {
            frontend_pubkey_banned: false,
            frontend_sig_valid: true,
            newsgroup_banned: false,
            poster_pubkey_banned: false,
            policy_allows: true,
            store_has: false,
            article_banned: false,
            reference_banned: false,
            db_has: false,
            enc_ip_banned: false,
        }
    }
}

/// Decide whether to accept, reject or reject-and-ban an offered article.
///
/// First matching rule wins. The reader-mode ingest path passes
/// `authed = true`, which skips the authentication rule.
pub fn check(
    headers: &Headers,
    authed: bool,
    facts: &AdmissionFacts,
    config: &DaemonConfig,
) -> Admission {
    if !authed {
        return Admission::reject("not authenticated");
    }

    if let Some(pubkey) = headers.get("X-Frontend-Pubkey") {
        if well_formed_pubkey(pubkey) {
            if facts.frontend_pubkey_banned {
                return Admission::ban("frontend pubkey banned");
            }
            if !facts.frontend_sig_valid {
                return Admission::ban("invalid frontend signature");
            }
        } else {
            return Admission::ban("malformed frontend pubkey");
        }
    }

    let group = first_newsgroup(headers);
    if !valid_newsgroup(group) {
        return Admission::ban(format!("invalid newsgroup: {}", group));
    }
    if facts.newsgroup_banned {
        return Admission::ban(format!("newsgroup banned: {}", group));
    }
    if facts.poster_pubkey_banned {
        return Admission::ban("poster pubkey banned");
    }
    if !facts.policy_allows {
        return Admission::ban(format!("newsgroup not wanted: {}", group));
    }

    let msgid_ok = valid_message_id(headers.get_or_empty("Message-ID"));
    let bad_reference = first_reference(headers).is_some_and(|r| !valid_message_id(r));
    let invalid_ids = if config.strict_msgid {
        !msgid_ok || bad_reference
    } else {
        // Older daemons on the network only reject a bad message-id when
        // the reference is well-formed; keep their predicate until every
        // peer validates strictly (see DaemonConfig::strict_msgid).
        !msgid_ok && !bad_reference
    };
    if invalid_ids {
        return Admission::ban("invalid reference or message id");
    }

    if facts.store_has {
        return Admission::reject("we have this article locally");
    }
    if facts.article_banned {
        return Admission::ban("article banned");
    }
    if facts.reference_banned {
        return Admission::ban("thread banned");
    }
    if facts.db_has {
        return Admission::reject("article already recorded");
    }

    let signed = headers.has("X-Pubkey-Ed25519");
    if group == "ctl" && signed {
        return Admission::Accept;
    }

    let mixed = headers
        .get_or_empty("Content-Type")
        .to_ascii_lowercase()
        .contains("multipart/mixed");
    let anonymous = !headers.has("X-Encrypted-Ip")
        && !headers.has("X-Tor-Poster")
        && !headers.has("X-I2p-Desthash");

    if anonymous {
        if !config.allow_anon {
            return Admission::reject("anonymous posting disallowed");
        }
        if mixed && !(config.allow_anon_attachments && config.allow_attachments) {
            return Admission::reject("anonymous attachments disallowed");
        }
    } else if headers.has("X-Encrypted-Ip") && facts.enc_ip_banned {
        return Admission::reject("poster remote address is banned");
    }

    if !config.allow_attachments && group != "ctl" {
        if signed {
            return Admission::reject("signed articles disallowed");
        }
        if mixed {
            return Admission::reject("attachments disallowed");
        }
    }

    Admission::Accept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(fields: &[(&str, &str)]) -> Headers {
        let mut h = Headers::new();
        for (k, v) in fields {
            h.append(k, v);
        }
        h
    }

    fn base_headers() -> Headers {
        headers(&[
            ("Message-ID", "<a@x>"),
            ("Newsgroups", "overchan.test"),
            ("X-Encrypted-Ip", "enc-addr"),
        ])
    }

    fn permissive() -> DaemonConfig {
        DaemonConfig::permissive("node.example")
    }

    #[test]
    fn test_accepts_clean_article() {
        let verdict = check(
            &base_headers(),
            true,
            &AdmissionFacts::default(),
            &permissive(),
        );
        assert!(verdict.is_accept());
    }

    #[test]
    fn test_unauthenticated_rejected() {
        let verdict = check(
            &base_headers(),
            false,
            &AdmissionFacts::default(),
            &permissive(),
        );
        assert_eq!(verdict.reason(), Some("not authenticated"));
        assert!(!verdict.is_ban());
    }

    #[test]
    fn test_invalid_newsgroup_banned() {
        let h = headers(&[("Message-ID", "<a@x>"), ("Newsgroups", "not a group")]);
        let verdict = check(&h, true, &AdmissionFacts::default(), &permissive());
        assert!(verdict.is_ban());
        assert_eq!(verdict.reason(), Some("invalid newsgroup: not a group"));
    }

    #[test]
    fn test_banned_newsgroup() {
        let facts = AdmissionFacts {
            newsgroup_banned: true,
            ..AdmissionFacts::default()
        };
        let verdict = check(&base_headers(), true, &facts, &permissive());
        assert!(verdict.is_ban());
    }

    #[test]
    fn test_frontend_pubkey_malformed() {
        let mut h = base_headers();
        h.append("X-Frontend-Pubkey", "nothex");
        let verdict = check(&h, true, &AdmissionFacts::default(), &permissive());
        assert!(verdict.is_ban());
        assert_eq!(verdict.reason(), Some("malformed frontend pubkey"));
    }

    #[test]
    fn test_frontend_signature_invalid() {
        let mut h = base_headers();
        h.append("X-Frontend-Pubkey", &"a".repeat(64));
        let facts = AdmissionFacts {
            frontend_sig_valid: false,
            ..AdmissionFacts::default()
        };
        let verdict = check(&h, true, &facts, &permissive());
        assert!(verdict.is_ban());
        assert_eq!(verdict.reason(), Some("invalid frontend signature"));
    }

    #[test]
    fn test_local_duplicate_is_plain_reject() {
        let facts = AdmissionFacts {
            store_has: true,
            ..AdmissionFacts::default()
        };
        let verdict = check(&base_headers(), true, &facts, &permissive());
        assert_eq!(verdict.reason(), Some("we have this article locally"));
        assert!(!verdict.is_ban());
    }

    #[test]
    fn test_thread_ban() {
        let mut h = base_headers();
        h.append("References", "<root@x>");
        let facts = AdmissionFacts {
            reference_banned: true,
            ..AdmissionFacts::default()
        };
        let verdict = check(&h, true, &facts, &permissive());
        assert!(verdict.is_ban());
        assert_eq!(verdict.reason(), Some("thread banned"));
    }

    #[test]
    fn test_legacy_msgid_predicate() {
        // bad message-id with a bad reference slips through the legacy branch
        let h = headers(&[
            ("Message-ID", "no-brackets"),
            ("Newsgroups", "overchan.test"),
            ("References", "also-bad"),
            ("X-Encrypted-Ip", "enc-addr"),
        ]);
        let config = permissive();
        assert!(check(&h, true, &AdmissionFacts::default(), &config).is_accept());

        // with a good reference the bad message-id is banned either way
        let h2 = headers(&[
            ("Message-ID", "no-brackets"),
            ("Newsgroups", "overchan.test"),
            ("References", "<root@x>"),
            ("X-Encrypted-Ip", "enc-addr"),
        ]);
        let verdict = check(&h2, true, &AdmissionFacts::default(), &config);
        assert_eq!(verdict.reason(), Some("invalid reference or message id"));
    }

    #[test]
    fn test_strict_msgid_predicate() {
        let mut config = permissive();
        config.strict_msgid = true;

        let h = headers(&[
            ("Message-ID", "no-brackets"),
            ("Newsgroups", "overchan.test"),
            ("References", "also-bad"),
            ("X-Encrypted-Ip", "enc-addr"),
        ]);
        let verdict = check(&h, true, &AdmissionFacts::default(), &config);
        assert!(verdict.is_ban());

        // strict branch also bans a good message-id with a bad reference
        let h2 = headers(&[
            ("Message-ID", "<a@x>"),
            ("Newsgroups", "overchan.test"),
            ("References", "bad-ref"),
            ("X-Encrypted-Ip", "enc-addr"),
        ]);
        assert!(check(&h2, true, &AdmissionFacts::default(), &config).is_ban());
    }

    #[test]
    fn test_ctl_with_signature_bypasses() {
        let h = headers(&[
            ("Message-ID", "<a@x>"),
            ("Newsgroups", "ctl"),
            ("X-Pubkey-Ed25519", &"a".repeat(64)),
        ]);
        let mut config = permissive();
        config.allow_anon = false;
        config.allow_attachments = false;
        assert!(check(&h, true, &AdmissionFacts::default(), &config).is_accept());
    }

    #[test]
    fn test_anonymous_gating() {
        let h = headers(&[("Message-ID", "<a@x>"), ("Newsgroups", "overchan.test")]);
        let mut config = permissive();
        config.allow_anon = false;
        let verdict = check(&h, true, &AdmissionFacts::default(), &config);
        assert_eq!(verdict.reason(), Some("anonymous posting disallowed"));

        config.allow_anon = true;
        assert!(check(&h, true, &AdmissionFacts::default(), &config).is_accept());
    }

    #[test]
    fn test_anonymous_attachment_gating() {
        let h = headers(&[
            ("Message-ID", "<a@x>"),
            ("Newsgroups", "overchan.test"),
            ("Content-Type", "multipart/mixed; boundary=b"),
        ]);
        let mut config = permissive();
        config.allow_anon_attachments = false;
        let verdict = check(&h, true, &AdmissionFacts::default(), &config);
        assert_eq!(verdict.reason(), Some("anonymous attachments disallowed"));
    }

    #[test]
    fn test_banned_enc_ip() {
        let facts = AdmissionFacts {
            enc_ip_banned: true,
            ..AdmissionFacts::default()
        };
        let verdict = check(&base_headers(), true, &facts, &permissive());
        assert_eq!(verdict.reason(), Some("poster remote address is banned"));
        assert!(!verdict.is_ban());
    }

    #[test]
    fn test_attachments_disallowed() {
        let mut h = base_headers();
        h.append("Content-Type", "multipart/mixed; boundary=b");
        let mut config = permissive();
        config.allow_attachments = false;
        let verdict = check(&h, true, &AdmissionFacts::default(), &config);
        assert_eq!(verdict.reason(), Some("attachments disallowed"));
    }

    #[test]
    fn test_signed_rejected_without_attachments() {
        let mut h = base_headers();
        h.append("X-Pubkey-Ed25519", &"a".repeat(64));
        let mut config = permissive();
        config.allow_attachments = false;
        let verdict = check(&h, true, &AdmissionFacts::default(), &config);
        assert_eq!(verdict.reason(), Some("signed articles disallowed"));
    }

    #[test]
    fn test_unrelated_headers_do_not_change_decision() {
        let mut h = base_headers();
        let before = check(&h, true, &AdmissionFacts::default(), &permissive());
        h.append("User-Agent", "some agent");
        h.append("Organization", "none");
        let after = check(&h, true, &AdmissionFacts::default(), &permissive());
        assert_eq!(before, after);
    }
}
