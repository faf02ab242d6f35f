//! Ordering/deduplication of a live window plus loaded older pages.

use std::collections::HashSet;

use tracing::trace;

use crate::types::{Cursor, ResolvedRecord, SortDirection};

/// Merged working set for one target.
///
/// The push model delivers the whole current live window on every change, so
/// [`PageMerger::apply_initial_snapshot`] replaces the window instead of
/// appending; the window never grows unbounded or duplicates. Older pages
/// loaded through the cursor accumulate separately and are deduplicated by id
/// against the window (the window copy wins).
#[derive(Debug, Clone)]
pub struct PageMerger {
    direction: SortDirection,
    page_size: usize,
    live: Vec<ResolvedRecord>,
    older: Vec<ResolvedRecord>,
    cursor: Option<Cursor>,
    has_more: bool,
}

impl PageMerger {
    pub fn new(direction: SortDirection, page_size: usize) -> Self {
        Self {
            direction,
            page_size: page_size.max(1),
            live: Vec::new(),
            older: Vec::new(),
            cursor: None,
            has_more: false,
        }
    }

    /// Replace the live window with a freshly delivered snapshot.
    ///
    /// `raw_len` is the raw delivered length before any deduplication; a full
    /// window implies further pages may exist.
    pub fn apply_initial_snapshot(
        &mut self,
        records: Vec<ResolvedRecord>,
        cursor: Option<Cursor>,
        raw_len: usize,
    ) {
        trace!(raw_len, "applying live window snapshot");
        self.live = records;
        self.cursor = cursor;
        self.has_more = raw_len >= self.page_size;
    }

    /// Append an older page fetched after the current cursor.
    ///
    /// `has_more` is computed from `raw_len`, the raw fetched length, never
    /// from the post-dedup length.
    pub fn apply_older_page(
        &mut self,
        records: Vec<ResolvedRecord>,
        cursor: Option<Cursor>,
        raw_len: usize,
    ) {
        trace!(raw_len, "appending older page");
        self.has_more = raw_len >= self.page_size;
        if cursor.is_some() {
            self.cursor = cursor;
        }

        let mut seen: HashSet<String> = self
            .live
            .iter()
            .chain(self.older.iter())
            .map(|item| item.record.id.clone())
            .collect();
        for item in records {
            if seen.insert(item.record.id.clone()) {
                self.older.push(item);
            }
        }
    }

    /// Discard everything; pagination restarts from page one.
    pub fn reset(&mut self) {
        self.live.clear();
        self.older.clear();
        self.cursor = None;
        self.has_more = false;
    }

    /// Remove one item from wherever it lives. Returns whether it existed.
    pub fn remove(&mut self, id: &str) -> bool {
        let live_before = self.live.len();
        let older_before = self.older.len();
        self.live.retain(|item| item.record.id != id);
        self.older.retain(|item| item.record.id != id);
        live_before != self.live.len() || older_before != self.older.len()
    }

    /// Flip one item's unread flag off as a local echo of mark-read.
    pub fn mark_read(&mut self, id: &str) -> bool {
        for item in self.live.iter_mut().chain(self.older.iter_mut()) {
            if item.record.id == id && item.record.unread {
                item.record.unread = false;
                return true;
            }
        }
        false
    }

    /// Materialized view: deduplicated by id, stably ordered by sort key in
    /// the query direction (ties keep insertion order, window before pages).
    pub fn items(&self) -> Vec<ResolvedRecord> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut view: Vec<ResolvedRecord> = Vec::with_capacity(self.live.len() + self.older.len());
        for item in self.live.iter().chain(self.older.iter()) {
            if seen.insert(item.record.id.as_str()) {
                view.push(item.clone());
            }
        }

        match self.direction {
            SortDirection::Ascending => {
                view.sort_by(|a, b| a.record.sort_key_ms.cmp(&b.record.sort_key_ms));
            }
            SortDirection::Descending => {
                view.sort_by(|a, b| b.record.sort_key_ms.cmp(&a.record.sort_key_ms));
            }
        }
        view
    }

    /// Ids of every merged item, in view order.
    pub fn ids(&self) -> Vec<String> {
        self.items()
            .into_iter()
            .map(|item| item.record.id)
            .collect()
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty() && self.older.is_empty()
    }
}
