/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Bounded log of the most recent normalised webhook events, for display.

use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Default number of entries kept.
pub const DEFAULT_CAPACITY: usize = 5;

/// Longest payload summary kept per entry, in characters.
const SUMMARY_MAX_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventLogEntry {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub summary: String,
}

impl EventLogEntry {
    pub fn new(event_type: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type: event_type.into(),
            summary: truncate(summary.into()),
        }
    }
}

fn truncate(mut s: String) -> String {
    if let Some((idx, _)) = s.char_indices().nth(SUMMARY_MAX_CHARS) {
        s.truncate(idx);
        s.push('…');
    }
    s
}

/// Append-only ring of [`EventLogEntry`], oldest evicted first.
///
/// Only the engine appends; readers take snapshots at any time.
#[derive(Debug)]
pub struct EventLog {
    capacity: usize,
    entries: RwLock<VecDeque<EventLogEntry>>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventLog {
    /// `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn append(&self, entry: EventLogEntry) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// All entries, oldest first.
    pub fn snapshot(&self) -> Vec<EventLogEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn last(&self) -> Option<EventLogEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .back()
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let log = EventLog::default();
        for i in 0..7 {
            log.append(EventLogEntry::new(format!("e{i}"), "{}"));
        }
        let types: Vec<_> = log.snapshot().into_iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec!["e2", "e3", "e4", "e5", "e6"]);
        assert_eq!(log.last().unwrap().event_type, "e6");
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let log = EventLog::new(0);
        log.append(EventLogEntry::new("a", ""));
        log.append(EventLogEntry::new("b", ""));
        assert_eq!(log.len(), 1);
        assert_eq!(log.capacity(), 1);
    }

    #[test]
    fn long_summaries_are_truncated_on_char_boundary() {
        let entry = EventLogEntry::new("x", "é".repeat(500));
        assert_eq!(entry.summary.chars().count(), SUMMARY_MAX_CHARS + 1);
        assert!(entry.summary.ends_with('…'));
    }
}
