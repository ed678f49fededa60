//! Liveness tracker.
//!
//! Correlates outbound keysend-style actions with their later "ping"
//! confirmations. Keys are payment hashes or payment tags; several keys may
//! share one timestamp when they describe the same round trip.
//!
//! # Invariants
//!
//! - Completing a key purges every key sharing its timestamp
//! - Completion is idempotent: a purged key completes to `None`
//! - Entries are only removed by completion or [`LivenessTracker::clear`],
//!   never by age

use std::collections::BTreeMap;

/// Map of payment key to round-trip timestamp.
#[derive(Debug, Clone, Default)]
pub struct LivenessTracker {
    entries: BTreeMap<String, u64>,
}

impl LivenessTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `key` as belonging to the round trip stamped `timestamp`.
    ///
    /// Empty keys are ignored.
    pub fn record(&mut self, key: &str, timestamp: u64) {
        if key.is_empty() {
            return;
        }
        tracing::debug!(key, timestamp, "liveness recorded");
        self.entries.insert(key.to_string(), timestamp);
    }

    /// Timestamp recorded for `key`.
    pub fn timestamp(&self, key: &str) -> Option<u64> {
        self.entries.get(key).copied()
    }

    /// Complete the round trip `key` belongs to.
    ///
    /// Returns the timestamp to confirm, after purging every key that shares
    /// it. Returns `None` if `key` is unknown (never recorded, or already
    /// completed).
    pub fn complete(&mut self, key: &str) -> Option<u64> {
        let timestamp = self.entries.get(key).copied()?;
        let before = self.entries.len();
        self.entries.retain(|_, ts| *ts != timestamp);
        tracing::debug!(key, timestamp, purged = before - self.entries.len(), "liveness completed");
        Some(timestamp)
    }

    /// First tracked key that occurs inside `error`.
    ///
    /// Async-pay failures name the tag inside a free-form error string.
    pub fn key_mentioned_in(&self, error: &str) -> Option<String> {
        self.entries.keys().find(|key| error.contains(key.as_str())).cloned()
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry (on disconnect).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
