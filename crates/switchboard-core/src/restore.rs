//! Restore and sync state machine.
//!
//! Drives the first-run backfill of a pre-existing account (contacts first,
//! then messages newest-first) and the incremental sync of a known account.
//! Both end in the same catch-up path.
//!
//! # Architecture: Action-Based State Machine
//!
//! Methods take the inputs that matter (counts, a message page, its topic)
//! and return [`RestoreAction`]s. The session executes them: fetch requests
//! become crypto-core calls, progress and completion become listener events.
//! Fetches already in flight when a restore is cancelled are not aborted;
//! their pages simply produce no actions. A fetch lost with a dropped
//! connection is re-issued by [`RestoreMachine::resume`].
//!
//! # State Machine
//!
//! ```text
//!                 begin_restore              counts + contact pages
//! ┌──────────────┐ ───────────> ┌───────────────────┐ ──────────────> ┌───────────────────┐
//! │ NotRestoring │              │ RestoringContacts │                 │ RestoringMessages │
//! └──────────────┘              └───────────────────┘                 └───────────────────┘
//!        │ batch pages                    │ cancel                             │ last page
//!        ↓ (incremental sync)             ↓                                    ↓
//!   catch-up on empty page          ┌───────────┐                        ┌──────────┐
//!                                   │ Cancelled │                        │ Finished │
//!                                   └───────────┘                        └──────────┘
//! ```
//!
//! # Progress
//!
//! The contacts phase owns [`CONTACTS_RESTORE_WEIGHT`] percent, the messages
//! phase the rest. Emitted progress never decreases, and 100 is only emitted
//! together with [`RestoreAction::Finished`].

use crate::{
    bundle::Msg,
    constants::{CONTACTS_RESTORE_WEIGHT, MESSAGES_RESTORE_WEIGHT, PAGE_SIZE},
    payload::{MsgsCounts, is_batch_topic},
};

/// Restore phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestoreState {
    /// Normal operation (incremental sync only).
    #[default]
    NotRestoring,
    /// Backfilling contact-key records.
    RestoringContacts,
    /// Backfilling messages, newest first.
    RestoringMessages,
    /// Backfill complete.
    Finished,
    /// Cancelled by the user.
    Cancelled,
}

impl RestoreState {
    /// Whether a backfill is in progress.
    pub fn is_restoring(self) -> bool {
        matches!(self, Self::RestoringContacts | Self::RestoringMessages)
    }
}

/// Restore counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RestoreProgress {
    /// Contact records restored so far.
    pub contacts_restored: u64,
    /// Highest contact-record index seen so far.
    pub contacts_highest_index: u64,
    /// Highest contact-record index to restore.
    pub contacts_total: u64,
    /// Messages restored so far.
    pub messages_restored: u64,
    /// Messages to restore.
    pub messages_total: u64,
}

impl RestoreProgress {
    /// Percentage for the contacts phase, in `0..=CONTACTS_RESTORE_WEIGHT`.
    ///
    /// The total is an index, so the phase is measured by the highest index
    /// reached rather than by the record count.
    pub fn contacts_percentage(&self) -> u8 {
        weighted(self.contacts_highest_index, self.contacts_total, CONTACTS_RESTORE_WEIGHT)
    }

    /// Percentage once in the messages phase, in
    /// `CONTACTS_RESTORE_WEIGHT..=100`.
    pub fn messages_percentage(&self) -> u8 {
        if self.messages_restored >= self.messages_total {
            return 100;
        }
        CONTACTS_RESTORE_WEIGHT
            + weighted(self.messages_restored, self.messages_total, MESSAGES_RESTORE_WEIGHT)
    }
}

fn weighted(restored: u64, total: u64, weight: u8) -> u8 {
    if total == 0 {
        return weight;
    }
    let share = u128::from(restored.min(total)) * u128::from(weight) / u128::from(total);
    u8::try_from(share).unwrap_or(weight)
}

/// Actions the session executes on behalf of the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreAction {
    /// Request aggregate message/contact counts.
    FetchCounts,
    /// Request a page of first-messages-per-key, ascending from `last_index`.
    FetchContacts {
        /// First index to return.
        last_index: u64,
        /// Page size.
        limit: u32,
    },
    /// Request a page of messages from `last_index`.
    FetchMessages {
        /// Starting index (inclusive).
        last_index: u64,
        /// Page size.
        limit: u32,
        /// Walk toward lower indices.
        reverse: bool,
    },
    /// Request outstanding liveness pings.
    FetchPings,
    /// Request read markers.
    FetchReadMarkers,
    /// Request mute levels.
    FetchMuteLevels,
    /// Tell the persistence layer to mark pending invoices paid.
    MarkInvoicesPaid,
    /// Report restore progress (percent).
    Progress(u8),
    /// Restore finished.
    Finished,
    /// Restore cancelled.
    Cancelled,
    /// Incremental sync reached the end of the backlog.
    SyncFinished,
}

/// Restore and sync state machine.
#[derive(Debug, Clone)]
pub struct RestoreMachine {
    state: RestoreState,
    progress: RestoreProgress,
    contacts_page_size: u32,
    messages_page_size: u32,
    /// Counts requested but not yet received.
    awaiting_counts: bool,
    /// Index the reverse message walk starts from.
    newest_index: u64,
    /// Next contacts page starts here.
    contacts_cursor: u64,
    /// Next reverse messages page starts here.
    messages_cursor: u64,
    /// Highest message index observed (incremental sync cursor).
    highest_index: Option<u64>,
    /// Last progress value emitted.
    emitted: u8,
}

impl Default for RestoreMachine {
    fn default() -> Self {
        Self::new(PAGE_SIZE, PAGE_SIZE)
    }
}

impl RestoreMachine {
    /// Create an idle machine with the given page sizes.
    pub fn new(contacts_page_size: u32, messages_page_size: u32) -> Self {
        Self {
            state: RestoreState::NotRestoring,
            progress: RestoreProgress::default(),
            contacts_page_size,
            messages_page_size,
            awaiting_counts: false,
            newest_index: 0,
            contacts_cursor: 0,
            messages_cursor: 0,
            highest_index: None,
            emitted: 0,
        }
    }

    /// Current phase.
    pub fn state(&self) -> RestoreState {
        self.state
    }

    /// Current counters.
    pub fn progress(&self) -> RestoreProgress {
        self.progress
    }

    /// Highest message index observed so far.
    pub fn highest_index(&self) -> Option<u64> {
        self.highest_index
    }

    /// Derived percentage for the current phase.
    pub fn percentage(&self) -> u8 {
        match self.state {
            RestoreState::NotRestoring | RestoreState::Cancelled => 0,
            RestoreState::RestoringContacts => self.progress.contacts_percentage(),
            RestoreState::RestoringMessages => self.progress.messages_percentage(),
            RestoreState::Finished => 100,
        }
    }

    /// Start a restore: request counts and enter the contacts phase.
    pub fn begin_restore(&mut self) -> Vec<RestoreAction> {
        tracing::info!("restore started");
        self.state = RestoreState::RestoringContacts;
        self.progress = RestoreProgress::default();
        self.awaiting_counts = true;
        self.newest_index = 0;
        self.contacts_cursor = 0;
        self.messages_cursor = 0;
        self.emitted = 0;
        vec![RestoreAction::FetchCounts]
    }

    /// Re-request whatever the current phase is waiting for.
    ///
    /// The answer to a fetch in flight when the connection dropped is lost
    /// with it. Outside a restore there is nothing to resume.
    pub fn resume(&mut self) -> Vec<RestoreAction> {
        match self.state {
            RestoreState::RestoringContacts if self.awaiting_counts => {
                vec![RestoreAction::FetchCounts]
            },
            RestoreState::RestoringContacts => vec![RestoreAction::FetchContacts {
                last_index: self.contacts_cursor,
                limit: self.contacts_page_size,
            }],
            RestoreState::RestoringMessages => vec![RestoreAction::FetchMessages {
                last_index: self.messages_cursor,
                limit: self.messages_page_size,
                reverse: true,
            }],
            RestoreState::NotRestoring | RestoreState::Finished | RestoreState::Cancelled => {
                vec![]
            },
        }
    }

    /// Start incremental sync for a non-restoring account.
    ///
    /// With a known owner message index, page forward from the next index;
    /// otherwise there is nothing to backfill and only pings are fetched.
    pub fn begin_sync(&mut self, last_index: Option<u64>) -> Vec<RestoreAction> {
        self.state = RestoreState::NotRestoring;
        match last_index {
            Some(index) => {
                self.observe_index(index);
                vec![self.fetch_forward(index.saturating_add(1))]
            },
            None => vec![RestoreAction::FetchPings],
        }
    }

    /// Aggregate counts arrived.
    pub fn on_counts(&mut self, counts: &MsgsCounts) -> Vec<RestoreAction> {
        if self.state != RestoreState::RestoringContacts || !self.awaiting_counts {
            return vec![];
        }
        self.awaiting_counts = false;
        self.progress.contacts_total = counts.contacts_total();
        self.progress.messages_total = counts.messages_total();
        self.newest_index = counts.newest_index();
        self.messages_cursor = self.newest_index;
        tracing::info!(
            contacts = self.progress.contacts_total,
            messages = self.progress.messages_total,
            "restore totals known"
        );

        if self.progress.contacts_total == 0 {
            return self.complete_contacts();
        }
        vec![RestoreAction::FetchContacts { last_index: 0, limit: self.contacts_page_size }]
    }

    /// A page of messages arrived on `topic`.
    ///
    /// Pages from non-batch topics are live traffic: they only move the sync
    /// cursor.
    pub fn on_batch(&mut self, msgs: &[Msg], topic: &str) -> Vec<RestoreAction> {
        let max_index = msgs.iter().filter_map(Msg::index_value).max();

        if !is_batch_topic(topic) {
            if let Some(index) = max_index {
                self.observe_index(index);
            }
            return vec![];
        }

        match self.state {
            RestoreState::RestoringContacts if !self.awaiting_counts => {
                self.on_contacts_page(msgs.len() as u64, max_index)
            },
            RestoreState::RestoringMessages => {
                let min_index = msgs.iter().filter_map(Msg::index_value).min();
                self.on_messages_page(msgs.len() as u64, min_index)
            },
            RestoreState::NotRestoring => self.on_sync_page(max_index),
            RestoreState::RestoringContacts | RestoreState::Finished | RestoreState::Cancelled => {
                vec![]
            },
        }
    }

    /// Cancel an in-progress restore.
    pub fn cancel(&mut self) -> Vec<RestoreAction> {
        if !self.state.is_restoring() {
            return vec![];
        }
        tracing::info!(state = ?self.state, "restore cancelled");
        self.state = RestoreState::Cancelled;
        self.progress = RestoreProgress::default();
        self.awaiting_counts = false;
        self.emitted = 0;
        vec![RestoreAction::Cancelled]
    }

    fn on_contacts_page(&mut self, count: u64, max_index: Option<u64>) -> Vec<RestoreAction> {
        let Some(max_index) = max_index.filter(|_| count > 0) else {
            return self.complete_contacts();
        };

        self.progress.contacts_restored = self.progress.contacts_restored.saturating_add(count);
        self.progress.contacts_highest_index = self.progress.contacts_highest_index.max(max_index);
        if max_index >= self.progress.contacts_total {
            return self.complete_contacts();
        }

        self.contacts_cursor = max_index.saturating_add(1);
        let mut actions = self.emit_progress();
        actions.push(RestoreAction::FetchContacts {
            last_index: self.contacts_cursor,
            limit: self.contacts_page_size,
        });
        actions
    }

    fn complete_contacts(&mut self) -> Vec<RestoreAction> {
        self.state = RestoreState::RestoringMessages;
        self.progress.contacts_restored =
            self.progress.contacts_restored.max(self.progress.contacts_total);
        self.progress.contacts_highest_index =
            self.progress.contacts_highest_index.max(self.progress.contacts_total);
        tracing::info!(restored = self.progress.contacts_restored, "contacts restored");

        if self.progress.messages_total == 0 {
            return self.finish();
        }

        let mut actions = vec![];
        if self.emitted < CONTACTS_RESTORE_WEIGHT {
            self.emitted = CONTACTS_RESTORE_WEIGHT;
            actions.push(RestoreAction::Progress(CONTACTS_RESTORE_WEIGHT));
        }
        actions.push(RestoreAction::FetchMessages {
            last_index: self.newest_index,
            limit: self.messages_page_size,
            reverse: true,
        });
        actions
    }

    fn on_messages_page(&mut self, count: u64, min_index: Option<u64>) -> Vec<RestoreAction> {
        let Some(min_index) = min_index.filter(|_| count > 0) else {
            return self.finish();
        };

        self.progress.messages_restored = self.progress.messages_restored.saturating_add(count);
        if self.progress.messages_restored >= self.progress.messages_total || min_index == 0 {
            return self.finish();
        }

        self.messages_cursor = min_index - 1;
        let mut actions = self.emit_progress();
        actions.push(RestoreAction::FetchMessages {
            last_index: self.messages_cursor,
            limit: self.messages_page_size,
            reverse: true,
        });
        actions
    }

    fn on_sync_page(&mut self, max_index: Option<u64>) -> Vec<RestoreAction> {
        match max_index {
            Some(index) => {
                self.observe_index(index);
                let next = self.highest_index.map_or(0, |h| h.saturating_add(1));
                vec![self.fetch_forward(next)]
            },
            None => {
                tracing::debug!(highest = ?self.highest_index, "sync caught up");
                let mut actions = vec![RestoreAction::SyncFinished];
                actions.extend(catch_up());
                actions
            },
        }
    }

    fn finish(&mut self) -> Vec<RestoreAction> {
        self.state = RestoreState::Finished;
        self.progress.messages_restored =
            self.progress.messages_restored.max(self.progress.messages_total);
        self.emitted = 100;
        tracing::info!(messages = self.progress.messages_restored, "restore finished");

        let mut actions = vec![RestoreAction::Progress(100), RestoreAction::Finished];
        actions.extend(catch_up());
        actions
    }

    /// Emit progress if it moved forward. 100 is reserved for `finish`.
    fn emit_progress(&mut self) -> Vec<RestoreAction> {
        let pct = self.percentage().min(99);
        if pct > self.emitted {
            self.emitted = pct;
            vec![RestoreAction::Progress(pct)]
        } else {
            vec![]
        }
    }

    fn observe_index(&mut self, index: u64) {
        self.highest_index = Some(self.highest_index.map_or(index, |h| h.max(index)));
    }

    fn fetch_forward(&self, last_index: u64) -> RestoreAction {
        RestoreAction::FetchMessages { last_index, limit: self.messages_page_size, reverse: false }
    }
}

fn catch_up() -> [RestoreAction; 4] {
    [
        RestoreAction::MarkInvoicesPaid,
        RestoreAction::FetchReadMarkers,
        RestoreAction::FetchMuteLevels,
        RestoreAction::FetchPings,
    ]
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const BATCH: &str = "x/batch";

    fn page(indices: impl IntoIterator<Item = u64>) -> Vec<Msg> {
        indices
            .into_iter()
            .map(|i| Msg { index: Some(i.to_string()), ..Msg::default() })
            .collect()
    }

    fn counts(contacts: u64, messages: u64) -> MsgsCounts {
        MsgsCounts {
            total: Some(messages),
            first_for_each_scid_highest_index: Some(contacts),
            total_highest_index: Some(messages),
            ..MsgsCounts::default()
        }
    }

    fn restoring(contacts: u64, messages: u64) -> RestoreMachine {
        let mut machine = RestoreMachine::default();
        assert_eq!(machine.begin_restore(), vec![RestoreAction::FetchCounts]);
        machine.on_counts(&counts(contacts, messages));
        machine
    }

    #[test]
    fn counts_start_contacts_paging() {
        let mut machine = RestoreMachine::default();
        machine.begin_restore();
        let actions = machine.on_counts(&counts(150, 10));
        assert_eq!(actions, vec![RestoreAction::FetchContacts { last_index: 0, limit: 100 }]);
        assert_eq!(machine.state(), RestoreState::RestoringContacts);
    }

    #[test]
    fn contacts_page_below_total_requests_next_page() {
        let mut machine = restoring(150, 10);
        let actions = machine.on_batch(&page(0..100), BATCH);
        assert_eq!(
            actions,
            vec![
                RestoreAction::Progress(2),
                RestoreAction::FetchContacts { last_index: 100, limit: 100 }
            ]
        );
    }

    #[test]
    fn empty_batch_at_contacts_total_moves_to_messages() {
        let mut machine = restoring(3, 10);
        machine.on_batch(&page([0, 1, 2]), BATCH);
        assert_eq!(machine.progress().contacts_restored, 3);

        let mut machine = restoring(3, 10);
        machine.progress.contacts_restored = 3;
        let actions = machine.on_batch(&[], BATCH);

        assert_eq!(machine.state(), RestoreState::RestoringMessages);
        assert_eq!(actions[0], RestoreAction::Progress(CONTACTS_RESTORE_WEIGHT));
        assert_eq!(
            actions[1],
            RestoreAction::FetchMessages { last_index: 10, limit: 100, reverse: true }
        );
    }

    #[test]
    fn contacts_page_reaching_total_moves_to_messages() {
        let mut machine = restoring(5, 300);
        let actions = machine.on_batch(&page([3, 4, 5]), BATCH);
        assert_eq!(machine.state(), RestoreState::RestoringMessages);
        assert_eq!(
            actions,
            vec![
                RestoreAction::Progress(4),
                RestoreAction::FetchMessages { last_index: 300, limit: 100, reverse: true }
            ]
        );
    }

    #[test]
    fn messages_walk_backwards_until_total() {
        let mut machine = restoring(0, 150);
        assert_eq!(machine.state(), RestoreState::RestoringMessages);

        let actions = machine.on_batch(&page(51..=150), BATCH);
        assert_eq!(
            actions,
            vec![
                RestoreAction::Progress(68),
                RestoreAction::FetchMessages { last_index: 50, limit: 100, reverse: true }
            ]
        );

        let actions = machine.on_batch(&page(1..=50), BATCH);
        assert_eq!(machine.state(), RestoreState::Finished);
        assert_eq!(
            actions,
            vec![
                RestoreAction::Progress(100),
                RestoreAction::Finished,
                RestoreAction::MarkInvoicesPaid,
                RestoreAction::FetchReadMarkers,
                RestoreAction::FetchMuteLevels,
                RestoreAction::FetchPings,
            ]
        );
    }

    #[test]
    fn no_messages_finishes_after_contacts() {
        let mut machine = restoring(2, 0);
        let actions = machine.on_batch(&page([1, 2]), BATCH);
        assert_eq!(machine.state(), RestoreState::Finished);
        assert!(actions.contains(&RestoreAction::Finished));
    }

    #[test]
    fn live_traffic_does_not_advance_restore() {
        let mut machine = restoring(10, 10);
        assert!(machine.on_batch(&page([500]), "x/stream").is_empty());
        assert_eq!(machine.state(), RestoreState::RestoringContacts);
    }

    #[test]
    fn pages_before_counts_are_ignored() {
        let mut machine = RestoreMachine::default();
        machine.begin_restore();
        assert!(machine.on_batch(&[], BATCH).is_empty());
        assert_eq!(machine.state(), RestoreState::RestoringContacts);
    }

    #[test]
    fn cancel_clears_progress_and_ignores_late_pages() {
        let mut machine = restoring(150, 10);
        machine.on_batch(&page(0..100), BATCH);

        assert_eq!(machine.cancel(), vec![RestoreAction::Cancelled]);
        assert_eq!(machine.state(), RestoreState::Cancelled);
        assert_eq!(machine.progress(), RestoreProgress::default());

        assert!(machine.on_batch(&page(100..150), BATCH).is_empty());
        assert!(machine.cancel().is_empty());
    }

    #[test]
    fn sync_without_index_fetches_pings() {
        let mut machine = RestoreMachine::default();
        assert_eq!(machine.begin_sync(None), vec![RestoreAction::FetchPings]);
    }

    #[test]
    fn sync_pages_forward_until_empty_batch() {
        let mut machine = RestoreMachine::default();
        assert_eq!(
            machine.begin_sync(Some(41)),
            vec![RestoreAction::FetchMessages { last_index: 42, limit: 100, reverse: false }]
        );

        let actions = machine.on_batch(&page(42..60), BATCH);
        assert_eq!(
            actions,
            vec![RestoreAction::FetchMessages { last_index: 60, limit: 100, reverse: false }]
        );
        assert_eq!(machine.highest_index(), Some(59));

        let actions = machine.on_batch(&[], BATCH);
        assert_eq!(actions[0], RestoreAction::SyncFinished);
        assert!(actions.contains(&RestoreAction::FetchPings));
        assert_eq!(machine.state(), RestoreState::NotRestoring);
    }

    #[test]
    fn percentage_per_phase() {
        let p = RestoreProgress {
            contacts_restored: 50,
            contacts_highest_index: 50,
            contacts_total: 100,
            messages_restored: 0,
            messages_total: 0,
        };
        assert_eq!(p.contacts_percentage(), 2);
        assert_eq!(p.messages_percentage(), 100);

        let p = RestoreProgress { messages_restored: 500, messages_total: 1000, ..p };
        assert_eq!(p.messages_percentage(), 4 + 48);
    }

    #[test]
    fn contacts_progress_follows_the_highest_index() {
        // Two contacts whose first messages sit at indices 60 and 120.
        let mut machine = restoring(120, 300);
        let actions = machine.on_batch(&page([60]), BATCH);

        assert_eq!(machine.progress().contacts_restored, 1);
        assert_eq!(machine.progress().contacts_highest_index, 60);
        assert_eq!(
            actions,
            vec![
                RestoreAction::Progress(2),
                RestoreAction::FetchContacts { last_index: 61, limit: 100 }
            ]
        );
    }

    #[test]
    fn resume_reissues_the_pending_fetch() {
        let mut machine = RestoreMachine::default();
        assert!(machine.resume().is_empty());

        machine.begin_restore();
        assert_eq!(machine.resume(), vec![RestoreAction::FetchCounts]);

        machine.on_counts(&counts(150, 300));
        assert_eq!(machine.resume(), vec![RestoreAction::FetchContacts { last_index: 0, limit: 100 }]);

        machine.on_batch(&page(0..100), BATCH);
        assert_eq!(
            machine.resume(),
            vec![RestoreAction::FetchContacts { last_index: 100, limit: 100 }]
        );

        machine.on_batch(&page(100..=150), BATCH);
        assert_eq!(
            machine.resume(),
            vec![RestoreAction::FetchMessages { last_index: 300, limit: 100, reverse: true }]
        );

        machine.on_batch(&page(201..=300), BATCH);
        assert_eq!(
            machine.resume(),
            vec![RestoreAction::FetchMessages { last_index: 200, limit: 100, reverse: true }]
        );

        machine.cancel();
        assert!(machine.resume().is_empty());
    }

    #[test]
    fn sync_cursor_saturates_at_the_top_index() {
        let mut machine = RestoreMachine::default();
        assert_eq!(
            machine.begin_sync(Some(u64::MAX)),
            vec![RestoreAction::FetchMessages { last_index: u64::MAX, limit: 100, reverse: false }]
        );
        assert_eq!(
            machine.on_batch(&page([u64::MAX]), BATCH),
            vec![RestoreAction::FetchMessages { last_index: u64::MAX, limit: 100, reverse: false }]
        );

        let mut machine = restoring(u64::MAX, 10);
        let actions = machine.on_batch(&page([u64::MAX - 1]), BATCH);
        assert_eq!(actions.last(), Some(&RestoreAction::FetchContacts { last_index: u64::MAX, limit: 100 }));
    }

    proptest! {
        #[test]
        fn prop_progress_monotonic_and_100_only_at_finish(
            contacts in 0u64..400,
            messages in 0u64..400,
            contact_pages in proptest::collection::vec(1u64..120, 0..8),
            message_pages in proptest::collection::vec(1u64..120, 0..8),
        ) {
            let mut machine = RestoreMachine::default();
            let mut emitted = Vec::new();
            let mut finished = false;
            machine.begin_restore();
            let actions = machine.on_counts(&counts(contacts, messages));
            collect(&actions, &mut emitted, &mut finished);

            let mut next = 0;
            for size in contact_pages {
                let actions = machine.on_batch(&page(next..next + size), BATCH);
                next += size;
                collect(&actions, &mut emitted, &mut finished);
            }
            let actions = machine.on_batch(&[], BATCH);
            collect(&actions, &mut emitted, &mut finished);

            let mut top = messages;
            for size in message_pages {
                let low = top.saturating_sub(size - 1);
                let actions = machine.on_batch(&page(low..=top), BATCH);
                top = low.saturating_sub(1);
                collect(&actions, &mut emitted, &mut finished);
            }
            let actions = machine.on_batch(&[], BATCH);
            collect(&actions, &mut emitted, &mut finished);

            prop_assert!(emitted.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {:?}", emitted);
            prop_assert!(finished);
            prop_assert_eq!(emitted.last().copied(), Some(100));
            prop_assert_eq!(emitted.iter().filter(|p| **p == 100).count(), 1);
        }
    }

    fn collect(actions: &[RestoreAction], emitted: &mut Vec<u8>, finished: &mut bool) {
        for action in actions {
            match action {
                RestoreAction::Progress(p) => {
                    if *p == 100 {
                        assert!(actions.contains(&RestoreAction::Finished));
                    }
                    emitted.push(*p);
                },
                RestoreAction::Finished => *finished = true,
                _ => {},
            }
        }
    }
}
