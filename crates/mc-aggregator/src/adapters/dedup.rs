//! # Time-Bounded Dedup Store
//!
//! Remembers processed message ids for a retention window.
//!
//! The check-and-set is a single `DashMap` entry operation: it holds only the
//! shard lock for that id and never touches the correlation key locks.
//! Expired records are purged by the sweeper; a lapsed record found on `admit`
//! is simply overwritten.

use crate::domain::config::duration_millis;
use crate::ports::outbound::DedupStore;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use shared_types::Timestamp;
use std::time::Duration;

/// Dedup store kept in process memory.
pub struct InMemoryDedupStore {
    /// Message id -> time the record lapses.
    records: DashMap<String, Timestamp>,
    retention_ms: u64,
}

impl InMemoryDedupStore {
    /// Remember ids for `retention`.
    pub fn new(retention: Duration) -> Self {
        Self {
            records: DashMap::new(),
            retention_ms: duration_millis(retention),
        }
    }
}

impl DedupStore for InMemoryDedupStore {
    fn admit(&self, id: &str, now: Timestamp) -> bool {
        let lapses_at = now.saturating_add(self.retention_ms);
        match self.records.entry(id.to_owned()) {
            Entry::Occupied(mut record) => {
                if *record.get() > now {
                    return false;
                }
                record.insert(lapses_at);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(lapses_at);
                true
            }
        }
    }

    fn forget(&self, id: &str) {
        self.records.remove(id);
    }

    fn purge_expired(&self, now: Timestamp) -> usize {
        let before = self.records.len();
        self.records.retain(|_, lapses_at| *lapses_at > now);
        before.saturating_sub(self.records.len())
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}
