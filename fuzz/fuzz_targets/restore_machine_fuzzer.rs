//! Fuzz target for the [`RestoreMachine`]
//!
//! # Strategy
//!
//! - Event sequences: arbitrary interleavings of restore/sync entry, counts,
//!   pages on batch and live topics, resumption after a reconnect, and
//!   cancellation
//! - Full `u64` index range, including the top index
//! - Duplicate and out-of-order pages, counts arriving twice or never
//!
//! # Invariants
//!
//! - Emitted progress never decreases within one restore
//! - Progress 100 is emitted only together with `Finished`
//! - `Finished` is never emitted twice for one restore
//! - No action other than `Cancelled` follows a cancel
//! - NEVER panic

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use switchboard_core::{Msg, MsgsCounts, RestoreAction, RestoreMachine, RestoreState};

#[derive(Debug, Arbitrary)]
enum Event {
    BeginRestore,
    BeginSync(Option<u64>),
    Counts { total: Option<u64>, contacts: Option<u64>, newest: Option<u64> },
    Page { indices: Vec<u64>, batch: bool },
    Resume,
    Cancel,
}

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    contacts_page_size: u8,
    messages_page_size: u8,
    events: Vec<Event>,
}

fuzz_target!(|input: FuzzInput| {
    let mut machine = RestoreMachine::new(
        u32::from(input.contacts_page_size.max(1)),
        u32::from(input.messages_page_size.max(1)),
    );
    let mut last_progress = 0u8;
    let mut finished = false;

    for event in input.events {
        let before = machine.state();
        let actions = match event {
            Event::BeginRestore => {
                last_progress = 0;
                finished = false;
                machine.begin_restore()
            },
            Event::BeginSync(index) => machine.begin_sync(index),
            Event::Counts { total, contacts, newest } => machine.on_counts(&MsgsCounts {
                total,
                first_for_each_scid_highest_index: contacts,
                total_highest_index: newest,
                ..MsgsCounts::default()
            }),
            Event::Page { indices, batch } => {
                let msgs: Vec<Msg> = indices
                    .into_iter()
                    .map(|i| Msg { index: Some(i.to_string()), ..Msg::default() })
                    .collect();
                let topic = if batch { "fuzz/batch" } else { "fuzz/stream" };
                machine.on_batch(&msgs, topic)
            },
            Event::Resume => {
                let actions = machine.resume();
                assert!(actions.len() <= 1, "resume issues at most one fetch: {actions:?}");
                assert_eq!(actions.is_empty(), !before.is_restoring());
                assert_eq!(machine.state(), before);
                continue;
            },
            Event::Cancel => {
                let actions = machine.cancel();
                if before.is_restoring() {
                    assert_eq!(actions, [RestoreAction::Cancelled]);
                    assert_eq!(machine.state(), RestoreState::Cancelled);
                } else {
                    assert!(actions.is_empty());
                }
                continue;
            },
        };

        if matches!(before, RestoreState::Cancelled | RestoreState::Finished)
            && !machine.state().is_restoring()
        {
            assert!(
                actions.iter().all(|a| !matches!(a, RestoreAction::Progress(_))),
                "progress after {before:?}: {actions:?}"
            );
        }

        let has_finished = actions.contains(&RestoreAction::Finished);
        for action in &actions {
            if let RestoreAction::Progress(p) = action {
                assert!(*p >= last_progress, "progress went from {last_progress} to {p}");
                assert!(*p < 100 || has_finished, "100 without Finished: {actions:?}");
                last_progress = *p;
            }
        }
        if has_finished {
            assert!(!finished, "Finished emitted twice");
            finished = true;
        }
    }
});
