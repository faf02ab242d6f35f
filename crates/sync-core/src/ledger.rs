//! Unread/total counter bookkeeping for one target.

use std::collections::HashMap;

use tracing::debug;

use crate::types::{CounterState, ResolvedRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Unread,
    Read,
}

/// Tracks per-item read state and derives `total`/`unread` counts.
///
/// Authoritative snapshots rebuild the per-item states wholesale (push wins
/// over earlier optimistic local transitions); between snapshots, optimistic
/// transitions adjust the counts immediately and are never rolled back.
#[derive(Debug, Clone, Default)]
pub struct CounterLedger {
    entries: HashMap<String, ReadState>,
    total_override: Option<u64>,
    unread_override: Option<u64>,
}

impl CounterLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild per-item read states from an authoritative record set.
    ///
    /// The total override from a counter subscription survives; the unread
    /// override does not, since the records carry fresher per-item flags.
    pub fn sync_from_records(&mut self, records: &[ResolvedRecord]) {
        self.entries = records
            .iter()
            .map(|item| {
                let state = if item.record.unread {
                    ReadState::Unread
                } else {
                    ReadState::Read
                };
                (item.record.id.clone(), state)
            })
            .collect();
        self.unread_override = None;
    }

    /// One-way `Unread -> Read` transition; marking twice is a no-op.
    pub fn mark_read(&mut self, id: &str) -> bool {
        match self.entries.get_mut(id) {
            Some(state) if *state == ReadState::Unread => {
                *state = ReadState::Read;
                if let Some(unread) = &mut self.unread_override {
                    *unread = unread.saturating_sub(1);
                }
                true
            }
            _ => false,
        }
    }

    /// Drop one item; removing an unread item also decrements `unread`.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(state) = self.entries.remove(id) else {
            return false;
        };
        if let Some(total) = &mut self.total_override {
            *total = total.saturating_sub(1);
        }
        if state == ReadState::Unread
            && let Some(unread) = &mut self.unread_override
        {
            *unread = unread.saturating_sub(1);
        }
        true
    }

    /// Drop everything; both counts become zero.
    pub fn remove_all(&mut self) {
        self.entries.clear();
        self.total_override = None;
        self.unread_override = None;
    }

    /// Authoritative total from the secondary counter subscription.
    pub fn reconcile_total(&mut self, total: u64) {
        debug!(total, "reconciling total from counter snapshot");
        self.total_override = Some(total);
    }

    /// Authoritative override of both counts; may move them in either
    /// direction.
    pub fn reconcile(&mut self, counters: CounterState) {
        self.total_override = Some(counters.total);
        self.unread_override = Some(counters.unread);
    }

    /// Current counts, overrides taking precedence over derived values.
    pub fn counters(&self) -> CounterState {
        let derived_unread = self
            .entries
            .values()
            .filter(|state| **state == ReadState::Unread)
            .count() as u64;
        CounterState {
            total: self.total_override.unwrap_or(self.entries.len() as u64),
            unread: self.unread_override.unwrap_or(derived_unread),
        }
    }
}
