use std::collections::VecDeque;

use crate::entry::LogEntry;
use crate::entry::Severity;

/// Append-only, timestamp-ordered sequence of captured lines. Entries only
/// ever leave from the front.
#[derive(Debug, Default)]
pub(crate) struct LogBuffer {
    entries: VecDeque<LogEntry>,
    /// Highest timestamp handed out so far, kept across eviction.
    last_stamp: Option<i64>,
    total_appended: u64,
    total_evicted: u64,
}

impl LogBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// `now_ms` raised to the highest timestamp handed out so far. Does not
    /// record anything.
    pub(crate) fn latest(&self, now_ms: i64) -> i64 {
        self.last_stamp.map_or(now_ms, |last| last.max(now_ms))
    }

    /// Hands out a timestamp no lower than any earlier one. A clock that
    /// stepped backwards is clamped so lines and windows share one ordering.
    pub(crate) fn stamp(&mut self, now_ms: i64) -> i64 {
        let timestamp = self.latest(now_ms);
        self.last_stamp = Some(timestamp);
        timestamp
    }

    /// Appends a line stamped via [`stamp`](Self::stamp).
    pub(crate) fn push(&mut self, now_ms: i64, severity: Severity, message: String) -> i64 {
        let timestamp = self.stamp(now_ms);
        self.entries.push_back(LogEntry {
            timestamp,
            severity,
            message,
        });
        self.total_appended += 1;
        timestamp
    }

    /// Entries with `start <= timestamp <= end`, oldest first.
    pub(crate) fn between(&self, start: i64, end: i64) -> Vec<LogEntry> {
        if start > end {
            return Vec::new();
        }
        let lo = self.entries.partition_point(|entry| entry.timestamp < start);
        let hi = self.entries.partition_point(|entry| entry.timestamp <= end);
        if hi <= lo {
            return Vec::new();
        }
        self.entries.range(lo..hi).cloned().collect()
    }

    /// Drops every entry older than `floor`. Returns how many were removed.
    pub(crate) fn evict_before(&mut self, floor: i64) -> usize {
        let cut = self.entries.partition_point(|entry| entry.timestamp < floor);
        self.entries.drain(..cut);
        self.total_evicted += cut as u64;
        cut
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn oldest_timestamp(&self) -> Option<i64> {
        self.entries.front().map(|entry| entry.timestamp)
    }

    pub(crate) fn total_appended(&self) -> u64 {
        self.total_appended
    }

    pub(crate) fn total_evicted(&self) -> u64 {
        self.total_evicted
    }
}
