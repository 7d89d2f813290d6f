//! Bounded clipboard history
//!
//! Every clipboard value accepted over the network is recorded in a
//! fixed-capacity ring; the oldest entry is dropped once the ring is full.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::HISTORY_CAPACITY;

/// One received clipboard value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The clipboard text
    pub content: String,
    /// Hostname or address of the sending node
    pub from_host: String,
    /// Arrival time (UTC)
    pub at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(content: impl Into<String>, from_host: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            from_host: from_host.into(),
            at: Utc::now(),
        }
    }
}

/// Fixed-capacity ring of received clipboard values
///
/// Cloned handles share the same ring. The lock is held only for the
/// push or copy, never across an await point.
#[derive(Clone)]
pub struct HistoryStore {
    inner: Arc<Mutex<VecDeque<HistoryEntry>>>,
    capacity: usize,
}

impl HistoryStore {
    /// Create a store with the standard capacity
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest beyond capacity
    pub fn push(&self, entry: HistoryEntry) {
        let mut ring = self.inner.lock().unwrap();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(entry);
    }

    /// Snapshot of the ring, newest first
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        let ring = self.inner.lock().unwrap();
        ring.iter().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_snapshot_newest_first() {
        let store = HistoryStore::new();
        store.push(HistoryEntry::new("one", "host-a"));
        store.push(HistoryEntry::new("two", "host-b"));
        store.push(HistoryEntry::new("three", "host-a"));

        let entries = store.snapshot();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].content, "three");
        assert_eq!(entries[1].content, "two");
        assert_eq!(entries[2].content, "one");
    }

    #[test]
    fn ring_evicts_oldest_at_capacity() {
        let store = HistoryStore::new();
        for i in 0..(HISTORY_CAPACITY + 1) {
            store.push(HistoryEntry::new(format!("value-{i}"), "host"));
        }

        let entries = store.snapshot();
        assert_eq!(entries.len(), HISTORY_CAPACITY);
        // Newest first; value-0 was evicted.
        assert_eq!(entries[0].content, format!("value-{}", HISTORY_CAPACITY));
        assert_eq!(entries.last().unwrap().content, "value-1");
    }

    #[test]
    fn snapshot_is_a_copy() {
        let store = HistoryStore::new();
        store.push(HistoryEntry::new("stable", "host"));

        let before = store.snapshot();
        store.push(HistoryEntry::new("later", "host"));
        assert_eq!(before.len(), 1);
        assert_eq!(store.snapshot().len(), 2);
    }

    #[test]
    fn entry_serializes_with_snake_case_fields() {
        let entry = HistoryEntry::new("text", "peer-1");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["content"], "text");
        assert_eq!(json["from_host"], "peer-1");
        assert!(json["at"].is_string());
    }
}
