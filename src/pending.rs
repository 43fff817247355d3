//! Per-connection offer bookkeeping
//!
//! Tracks every article offered on a connection until the peer's reply
//! resolves it, and maintains the running backlog byte count. One mutex
//! guards the whole table; every critical section is O(1) and no callback
//! ever fires under the lock.

use std::collections::HashMap;
use std::sync::Mutex;

/// Lifecycle state of an offered article
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OfferState {
    /// Queued locally, nothing sent yet
    Queued,
    /// CHECK transmitted
    Check,
    /// TAKETHIS transmitted (or requested by the peer)
    TakeThis,
    /// ARTICLE fetch issued (reader mode)
    Article,
}

/// One tracked offer
#[derive(Debug, Clone)]
pub struct OfferRecord {
    /// Message identifier
    pub msgid: String,
    /// Stored article size in bytes, 0 if unknown at queue time
    pub size: u64,
    /// Current lifecycle state
    pub state: OfferState,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, OfferRecord>,
    backlog: u64,
}

/// Thread-safe map from message-id to offer record
#[derive(Default)]
pub struct PendingTable {
    inner: Mutex<Inner>,
}

impl PendingTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the message-id has a live entry
    pub fn is_queued(&self, msgid: &str) -> bool {
        self.inner.lock().unwrap().records.contains_key(msgid)
    }

    /// Upsert an entry and move it to `state`.
    ///
    /// `size` only takes effect on creation, where it is also added to the
    /// backlog; transitions never touch the recorded size.
    pub fn set_state(&self, msgid: &str, state: OfferState, size: u64) {
        let mut inner = self.inner.lock().unwrap();
        match inner.records.get_mut(msgid) {
            Some(record) => record.state = state,
            None => {
                inner.records.insert(
                    msgid.to_string(),
                    OfferRecord {
                        msgid: msgid.to_string(),
                        size,
                        state,
                    },
                );
                inner.backlog += size;
            }
        }
    }

    /// Resolve an entry, decrementing the backlog by its recorded size.
    ///
    /// Returns the removed record, or `None` if the id was not pending.
    pub fn set_processed(&self, msgid: &str) -> Option<OfferRecord> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner.records.remove(msgid)?;
        inner.backlog -= record.size;
        Some(record)
    }

    /// Sum of sizes over all live entries
    pub fn backlog(&self) -> u64 {
        self.inner.lock().unwrap().backlog
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().records.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().records.is_empty()
    }

    /// Snapshot of message-ids currently in `state`
    pub fn articles_in_state(&self, state: OfferState) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .records
            .values()
            .filter(|r| r.state == state)
            .map(|r| r.msgid.clone())
            .collect()
    }
}
