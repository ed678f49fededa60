//! Deferred settlement queue.
//!
//! Holds effect bundles whose side effects were only partially applied: a
//! one-way settlement or async-pay publish went out, and the rest of the
//! bundle must wait for an out-of-band confirmation. The confirmation names
//! the parked bundle by one of its messages' `index` (settled-status) or
//! `tag` (async-pay).
//!
//! # Invariants
//!
//! - At most one bundle is handed back per confirmation
//! - Taking removes every bundle sharing the key in the same step

use crate::bundle::EffectBundle;

/// How a confirmation identifies a parked bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementKey<'a> {
    /// Settled-status `htlc_id`, matched against message indices.
    Index(&'a str),
    /// Async-pay tag, matched against message tags.
    Tag(&'a str),
}

impl SettlementKey<'_> {
    fn matches(&self, bundle: &EffectBundle) -> bool {
        match self {
            Self::Index(index) => bundle.carries_index(index),
            Self::Tag(tag) => bundle.carries_tag(tag),
        }
    }
}

/// Bundles awaiting a settlement or async-pay confirmation.
#[derive(Debug, Clone, Default)]
pub struct SettlementQueue {
    pending: Vec<EffectBundle>,
}

impl SettlementQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a bundle until its confirmation arrives.
    pub fn enqueue(&mut self, bundle: EffectBundle) {
        self.pending.push(bundle);
        tracing::debug!(pending = self.pending.len(), "settlement parked");
    }

    /// Remove every bundle matching `key` and return the oldest of them.
    pub fn take(&mut self, key: SettlementKey<'_>) -> Option<EffectBundle> {
        let mut taken = None;
        let mut dropped = 0usize;

        self.pending.retain(|bundle| {
            if !key.matches(bundle) {
                return true;
            }
            if taken.is_none() {
                taken = Some(bundle.clone());
            } else {
                dropped += 1;
            }
            false
        });

        if taken.is_some() {
            tracing::debug!(?key, dropped, pending = self.pending.len(), "settlement released");
        }
        taken
    }

    /// Number of parked bundles.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is parked.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop every parked bundle (on disconnect).
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
