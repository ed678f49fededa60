//! Message batch pipeline.
//!
//! Persistence runs in a fixed order: tribe-membership messages, then
//! contact-key messages, then every message individually. Each step awaits
//! the listeners before the next starts. The restore machine sees the batch
//! last.

use std::collections::VecDeque;

use switchboard_core::{Environment, Msg, is_batch_topic};

use crate::{dispatcher::Work, listener::EngineEvent, session::Session};

impl<E: Environment> Session<E> {
    pub(crate) async fn process_batch(
        &self,
        msgs: &[Msg],
        topic: Option<&str>,
        queue: &mut VecDeque<Work>,
    ) {
        let topic = topic.unwrap_or_default();

        if msgs.is_empty() {
            // End-of-phase marker for paged fetches.
            if is_batch_topic(topic) {
                tracing::debug!(topic, "empty batch page");
                let actions = self.inner.restore.lock().on_batch(&[], topic);
                self.queue_restore_actions(actions, queue);
            }
            return;
        }

        let tribes: Vec<Msg> = msgs.iter().filter(|m| m.affects_tribe_membership()).cloned().collect();
        if !tribes.is_empty() {
            self.inner.listeners.upsert_tribes(&tribes).await;
        }

        let contacts: Vec<Msg> = msgs.iter().filter(|m| m.affects_contact_keys()).cloned().collect();
        if !contacts.is_empty() {
            self.inner.listeners.upsert_contacts(&contacts).await;
        }

        for msg in msgs {
            self.inner.listeners.deliver_message(msg).await;
        }
        tracing::debug!(
            topic,
            count = msgs.len(),
            tribes = tribes.len(),
            contacts = contacts.len(),
            "batch delivered"
        );

        self.advance_message_index(msgs);

        let actions = self.inner.restore.lock().on_batch(msgs, topic);
        self.queue_restore_actions(actions, queue);
    }

    /// Raise the owner's message index to the highest index in `msgs`.
    fn advance_message_index(&self, msgs: &[Msg]) {
        let Some(highest) = msgs.iter().filter_map(Msg::index_value).max() else {
            return;
        };
        let advanced = {
            let mut owner = self.inner.owner.lock();
            if owner.message_last_index.is_some_and(|last| last >= highest) {
                false
            } else {
                owner.message_last_index = Some(highest);
                true
            }
        };
        if advanced {
            self.notify(EngineEvent::MessageIndex(highest));
        }
    }
}
