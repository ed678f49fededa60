//! Fuzz target for the [`SettlementQueue`] and [`LivenessTracker`]
//!
//! Confirmations arrive duplicated, reordered, or for keys that were never
//! parked.
//!
//! # Invariants
//!
//! - A take returns a bundle iff some parked bundle carried the key
//! - After a take, no parked bundle carries the key
//! - Completing a liveness key twice yields `None` the second time
//! - NEVER panic

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use switchboard_core::{EffectBundle, LivenessTracker, Msg, SettlementKey, SettlementQueue};

#[derive(Debug, Arbitrary)]
enum Op {
    Park { index: u8, tag: u8 },
    SettleIndex(u8),
    SettleTag(u8),
    Record { key: u8, ts: u8 },
    Complete(u8),
    Clear,
}

fuzz_target!(|ops: Vec<Op>| {
    let mut queue = SettlementQueue::new();
    let mut parked: Vec<(String, String)> = Vec::new();
    let mut liveness = LivenessTracker::new();

    for op in ops {
        match op {
            Op::Park { index, tag } => {
                let (index, tag) = (index.to_string(), format!("t{tag}"));
                queue.enqueue(EffectBundle {
                    msgs: vec![Msg {
                        index: Some(index.clone()),
                        tag: Some(tag.clone()),
                        ..Msg::default()
                    }],
                    ..EffectBundle::default()
                });
                parked.push((index, tag));
            },
            Op::SettleIndex(index) => {
                let index = index.to_string();
                let expected = parked.iter().any(|(i, _)| *i == index);
                let taken = queue.take(SettlementKey::Index(&index));
                assert_eq!(taken.is_some(), expected);
                parked.retain(|(i, _)| *i != index);
                assert!(queue.take(SettlementKey::Index(&index)).is_none());
            },
            Op::SettleTag(tag) => {
                let tag = format!("t{tag}");
                let expected = parked.iter().any(|(_, t)| *t == tag);
                let taken = queue.take(SettlementKey::Tag(&tag));
                assert_eq!(taken.is_some(), expected);
                parked.retain(|(_, t)| *t != tag);
            },
            Op::Record { key, ts } => liveness.record(&format!("k{key}"), u64::from(ts)),
            Op::Complete(key) => {
                let key = format!("k{key}");
                if liveness.complete(&key).is_some() {
                    assert!(liveness.complete(&key).is_none());
                    assert_eq!(liveness.timestamp(&key), None);
                }
            },
            Op::Clear => {
                queue.clear();
                parked.clear();
                liveness.clear();
            },
        }
        assert_eq!(queue.len(), parked.len());
    }
});
