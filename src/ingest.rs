//! Shared article ingest pipeline
//!
//! TAKETHIS, IHAVE, POST and the reader-mode fetcher all funnel through the
//! same steps: prefetch the admission predicates, decide, then write the
//! article through the store. Keeping the lookups here keeps
//! [`crate::admission::check`] pure.

use crate::admission::AdmissionFacts;
use crate::config::FeedPolicy;
use crate::headers::{Headers, first_newsgroup, first_reference};
use crate::storage::{ArticleEntry, ArticleStore, Daemon, Database};
use crate::validation::{valid_message_id, well_formed_pubkey};
use std::io::Write;
use tracing::{debug, info, warn};

/// Result of writing an accepted article into the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Article stored and handed to the infeed
    Stored,
    /// Another writer is already producing this message-id; body discarded
    Duplicate,
    /// The store failed mid-write; partial data discarded
    Failed,
}

/// Prefetch every external predicate the admission decision needs
pub fn gather_facts(
    headers: &Headers,
    policy: Option<&FeedPolicy>,
    store: &dyn ArticleStore,
    db: &dyn Database,
    daemon: &dyn Daemon,
) -> AdmissionFacts {
    let msgid = headers.get_or_empty("Message-ID");
    let group = first_newsgroup(headers);
    let mut facts = AdmissionFacts::default();

    if let Some(pubkey) = headers.get("X-Frontend-Pubkey") {
        if well_formed_pubkey(pubkey) {
            facts.frontend_pubkey_banned = db.pubkey_banned(pubkey);
            let signature = headers.get_or_empty("X-Frontend-Signature");
            facts.frontend_sig_valid = !signature.is_empty()
                && daemon.verify_frontend_signature(pubkey, signature, msgid);
        }
    }
    facts.newsgroup_banned = db.newsgroup_banned(group);
    if let Some(pubkey) = headers.get("X-Pubkey-Ed25519") {
        facts.poster_pubkey_banned = db.pubkey_banned(pubkey);
    }
    facts.policy_allows = policy.map(|p| p.allows_newsgroup(group)).unwrap_or(true);
    facts.store_has = store.has_article(msgid);
    facts.article_banned = db.article_banned(msgid);
    facts.reference_banned = first_reference(headers).is_some_and(|r| db.article_banned(r));
    facts.db_has = db.has_article(msgid) || db.is_expired(msgid);
    if let Some(encaddr) = headers.get("X-Encrypted-Ip") {
        facts.enc_ip_banned = db.enc_ip_banned(encaddr);
    }
    facts
}

/// Queue a fetch for the referenced thread root when it is valid, absent
/// locally and not banned
pub fn request_missing_root(
    headers: &Headers,
    store: &dyn ArticleStore,
    db: &dyn Database,
    daemon: &dyn Daemon,
) {
    let Some(reference) = first_reference(headers) else {
        return;
    };
    if valid_message_id(reference)
        && !store.has_article(reference)
        && !db.has_article(reference)
        && !db.article_banned(reference)
    {
        debug!("requesting missing thread root {}", reference);
        daemon.ask_for_article(ArticleEntry::new(reference, first_newsgroup(headers)));
    }
}

/// Write an accepted article into the store and hand it to the infeed.
///
/// Prepends the instance name to Path, writes the header block, then feeds
/// the (already size-limited) body through the store's processing.
pub fn store_article(
    headers: &mut Headers,
    body: &[u8],
    instance: &str,
    store: &dyn ArticleStore,
    daemon: &dyn Daemon,
) -> IngestOutcome {
    let msgid = headers.get_or_empty("Message-ID").to_string();
    headers.prepend_path(instance);

    let Some(mut file) = store.create_file(&msgid) else {
        debug!("duplicate in-flight write for {}", msgid);
        return IngestOutcome::Duplicate;
    };
    let written = file
        .write_all(headers.wire_format().as_bytes())
        .and_then(|()| store.process_message_body(file.as_mut(), headers, body));
    match written {
        Ok(()) => {
            drop(file);
            daemon.load_from_infeed(&msgid);
            info!("stored article {}", msgid);
            IngestOutcome::Stored
        }
        Err(e) => {
            warn!("failed to store {}: {}", msgid, e);
            IngestOutcome::Failed
        }
    }
}
