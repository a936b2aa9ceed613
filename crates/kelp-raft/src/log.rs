//! Log store port and the in-memory implementation.
//!
//! The consensus core does not own persistence; it consumes this contract.
//! Indices are 1-based and dense from `first_index` to `last_index` except
//! where `skip` has reserved empty slots; `recycle` releases a prefix whose
//! entries are then no longer readable.

use crate::error::Result;
use crate::types::{LogEntry, LogIndex};
use std::collections::BTreeMap;

/// Ordered, indexed entry store supplied to the consensus core.
pub trait LogStore: Send {
    /// Whether the log has never been appended to.
    fn is_empty(&self) -> bool;

    /// First readable index, or 0 when empty.
    fn first_index(&self) -> LogIndex;

    /// Last index, or 0 when empty. Recycled and skipped slots still count.
    fn last_index(&self) -> LogIndex;

    /// Whether an entry is readable at the given index.
    ///
    /// False for skipped slots and recycled prefixes.
    fn contains(&self, index: LogIndex) -> bool;

    /// Read the entry at the given index.
    fn entry(&self, index: LogIndex) -> Result<Option<LogEntry>>;

    /// Append an entry at the next slot and return the assigned index.
    ///
    /// The stored entry carries the assigned index regardless of the index
    /// the caller put on it; callers that require a specific slot compare
    /// the return value.
    fn append(&mut self, entry: LogEntry) -> Result<LogIndex>;

    /// Reserve `count` empty slots before the next append.
    fn skip(&mut self, count: u64) -> Result<()>;

    /// Drop all entries with index greater than `index`.
    fn truncate(&mut self, index: LogIndex) -> Result<()>;

    /// Release storage for all indices up to and including `index`.
    fn recycle(&mut self, index: LogIndex) -> Result<()>;
}

/// In-memory [`LogStore`].
///
/// A sparse `BTreeMap` holds the readable entries; `first`/`last` track the
/// index window so skipped and recycled slots behave like a segmented
/// on-disk log.
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: BTreeMap<u64, LogEntry>,
    first: u64,
    last: u64,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogStore for MemoryLog {
    fn is_empty(&self) -> bool {
        self.last == 0
    }

    fn first_index(&self) -> LogIndex {
        LogIndex(self.first)
    }

    fn last_index(&self) -> LogIndex {
        LogIndex(self.last)
    }

    fn contains(&self, index: LogIndex) -> bool {
        self.entries.contains_key(&index.as_u64())
    }

    fn entry(&self, index: LogIndex) -> Result<Option<LogEntry>> {
        Ok(self.entries.get(&index.as_u64()).cloned())
    }

    fn append(&mut self, mut entry: LogEntry) -> Result<LogIndex> {
        let index = self.last + 1;
        entry.index = LogIndex(index);
        if self.first == 0 {
            self.first = index;
        }
        self.entries.insert(index, entry);
        self.last = index;
        Ok(LogIndex(index))
    }

    fn skip(&mut self, count: u64) -> Result<()> {
        self.last += count;
        Ok(())
    }

    fn truncate(&mut self, index: LogIndex) -> Result<()> {
        let index = index.as_u64();
        self.entries.split_off(&(index + 1));
        self.last = self.last.min(index);
        if self.last == 0 {
            self.first = 0;
        }
        Ok(())
    }

    fn recycle(&mut self, index: LogIndex) -> Result<()> {
        let index = index.as_u64();
        self.entries = self.entries.split_off(&(index + 1));
        self.first = self.first.max(index + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntryKind, Term};
    use bytes::Bytes;

    fn entry(term: u64) -> LogEntry {
        LogEntry::new(
            LogIndex::ZERO,
            Term(term),
            EntryKind::Command,
            Bytes::from_static(b"k"),
            Bytes::from_static(b"v"),
        )
    }

    #[test]
    fn append_assigns_dense_indices() {
        let mut log = MemoryLog::new();
        assert!(log.is_empty());

        assert_eq!(log.append(entry(1)).unwrap(), LogIndex(1));
        assert_eq!(log.append(entry(1)).unwrap(), LogIndex(2));

        assert_eq!(log.first_index(), LogIndex(1));
        assert_eq!(log.last_index(), LogIndex(2));
        assert_eq!(log.entry(LogIndex(2)).unwrap().unwrap().index, LogIndex(2));
    }

    #[test]
    fn skip_reserves_unreadable_slots() {
        let mut log = MemoryLog::new();
        log.append(entry(1)).unwrap();
        log.skip(2).unwrap();
        assert_eq!(log.append(entry(1)).unwrap(), LogIndex(4));

        assert!(!log.contains(LogIndex(2)));
        assert!(!log.contains(LogIndex(3)));
        assert_eq!(log.entry(LogIndex(3)).unwrap(), None);
        assert!(log.contains(LogIndex(4)));
    }

    #[test]
    fn truncate_retains_prefix() {
        let mut log = MemoryLog::new();
        for t in 1..=5 {
            log.append(entry(t)).unwrap();
        }

        log.truncate(LogIndex(2)).unwrap();
        assert_eq!(log.last_index(), LogIndex(2));
        assert!(log.contains(LogIndex(2)));
        assert!(!log.contains(LogIndex(3)));

        // Appends continue from the truncation point.
        assert_eq!(log.append(entry(9)).unwrap(), LogIndex(3));
    }

    #[test]
    fn truncate_to_zero_empties_the_log() {
        let mut log = MemoryLog::new();
        log.append(entry(1)).unwrap();
        log.truncate(LogIndex::ZERO).unwrap();

        assert!(log.is_empty());
        assert_eq!(log.first_index(), LogIndex::ZERO);
        assert_eq!(log.append(entry(2)).unwrap(), LogIndex(1));
    }

    #[test]
    fn recycle_releases_prefix_but_keeps_indices() {
        let mut log = MemoryLog::new();
        for t in 1..=4 {
            log.append(entry(t)).unwrap();
        }

        log.recycle(LogIndex(2)).unwrap();
        assert!(!log.is_empty());
        assert_eq!(log.first_index(), LogIndex(3));
        assert_eq!(log.last_index(), LogIndex(4));
        assert_eq!(log.entry(LogIndex(1)).unwrap(), None);
        assert!(!log.contains(LogIndex(2)));
        assert!(log.contains(LogIndex(3)));
    }
}
