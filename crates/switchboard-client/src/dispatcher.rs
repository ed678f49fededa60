//! Effect dispatcher.
//!
//! Interprets every field of an [`EffectBundle`] in a fixed order, then runs
//! the publish phase. Follow-up work (re-dispatching a settled bundle,
//! follow-up core calls, re-running the subscription bootstrap) is pushed
//! onto an explicit work queue and drained in FIFO order, so the call stack
//! stays flat.
//!
//! # Field order
//!
//! ```text
//! state delta → deletions → ping → balance → messages → ping-done
//!   → new tribe → tribe members → my contact info → inviter contact info
//!   → new invite → msgs counts → msgs total → last read → initial tribe
//!   → error → sent status → settled status → async-pay tag → lsp host
//!   → mute levels → payments → payments total → tags → subscriptions
//!   → publish phase
//! ```
//!
//! # Publish phase
//!
//! A settlement publish parks the whole bundle and stops. Otherwise a
//! register publish goes out first and the rest waits for the configured
//! register delay; an async-pay publish then parks the bundle, and only
//! without one do the remaining publishes go out, in order.
//!
//! The register delay is a fixed wait, not a broker acknowledgement. A
//! PUBACK-driven continuation would be the stronger signal.

use std::collections::VecDeque;

use switchboard_core::{
    ContactInfo, EffectBundle, Environment, Msg, MsgsCounts, Ping, Publish, RestoreAction,
    SentStatus, SettledStatus, SettlementKey,
};

use crate::{
    crypto::CoreCall,
    error::ClientError,
    listener::EngineEvent,
    session::Session,
};

/// Flags carried with a bundle through dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchContext {
    /// Do not publish the settlement topic (the bundle already settled).
    pub skip_settlement: bool,
    /// Do not publish the async-pay topic (the payment already completed).
    pub skip_async_pay: bool,
    /// Topic the bundle's payload arrived on, for inbound bundles.
    pub originating_topic: Option<String>,
    /// Timestamp of a round trip the caller started with this bundle. The
    /// bundle's own messages never complete it.
    pub started_ping: Option<u64>,
}

impl DispatchContext {
    /// Context for an inbound payload that arrived on `topic`.
    pub fn inbound(topic: impl Into<String>) -> Self {
        Self { originating_topic: Some(topic.into()), ..Self::default() }
    }

    /// Context for a bundle that started the round trip at `ping_ts`.
    pub fn started(ping_ts: u64) -> Self {
        Self { started_ping: Some(ping_ts), ..Self::default() }
    }

    fn settled() -> Self {
        Self { skip_settlement: true, ..Self::default() }
    }

    fn async_paid() -> Self {
        Self { skip_settlement: true, skip_async_pay: true, ..Self::default() }
    }
}

/// One unit of dispatcher work.
#[derive(Debug)]
pub(crate) enum Work {
    /// Apply a bundle.
    Dispatch(EffectBundle, DispatchContext),
    /// Run a core call and dispatch its bundle.
    Core(CoreCall),
    /// Decode an inbound payload and dispatch it with its topic.
    Inbound { topic: String, payload: Vec<u8> },
    /// Run initial setup, then enter restore or incremental sync.
    ///
    /// With `resume_paging`, a restore already in progress re-issues the
    /// fetch it is waiting for.
    Bootstrap { resume_paging: bool },
}

impl<E: Environment> Session<E> {
    /// Apply a bundle produced outside the engine.
    pub async fn dispatch(&self, bundle: EffectBundle) {
        self.dispatch_with(bundle, DispatchContext::default()).await;
    }

    /// Apply a bundle with explicit dispatch flags.
    pub async fn dispatch_with(&self, bundle: EffectBundle, ctx: DispatchContext) {
        self.drain(VecDeque::from([Work::Dispatch(bundle, ctx)])).await;
    }

    pub(crate) async fn drain(&self, mut queue: VecDeque<Work>) {
        while let Some(work) = queue.pop_front() {
            match work {
                Work::Dispatch(bundle, ctx) => self.apply(bundle, ctx, &mut queue).await,
                Work::Core(call) => match self.run_core(&call) {
                    Ok((bundle, _)) => {
                        queue.push_back(Work::Dispatch(bundle, DispatchContext::default()));
                    },
                    Err(e) => self.report(e),
                },
                Work::Inbound { topic, payload } => {
                    let call = CoreCall::HandleInbound { topic: topic.clone(), payload };
                    match self.run_core(&call) {
                        Ok((bundle, _)) => {
                            queue.push_back(Work::Dispatch(bundle, DispatchContext::inbound(topic)));
                        },
                        Err(e) => self.report(e),
                    }
                },
                Work::Bootstrap { resume_paging } => self.bootstrap(resume_paging, &mut queue),
            }
        }
    }

    /// Subscription bootstrap: initial setup, then restore or sync entry.
    fn bootstrap(&self, resume_paging: bool, queue: &mut VecDeque<Work>) {
        let account = self.inner.account.lock().clone();
        let Some(account) = account else {
            self.report(ClientError::NoSession);
            return;
        };

        let call = CoreCall::InitialSetup {
            device: self.inner.config.device.clone(),
            invite_code: account.invite_code.clone(),
        };
        match self.run_core(&call) {
            Ok((bundle, _)) => queue.push_back(Work::Dispatch(bundle, DispatchContext::default())),
            Err(e) => {
                self.report(e);
                return;
            },
        }

        let last_index = self.inner.owner.lock().message_last_index;
        let actions = {
            let mut restore = self.inner.restore.lock();
            if restore.state().is_restoring() && resume_paging {
                tracing::info!(state = ?restore.state(), "resuming restore after reconnect");
                restore.resume()
            } else if restore.state().is_restoring() {
                tracing::debug!("bootstrap while restoring, paging continues");
                Vec::new()
            } else if account.restoring {
                restore.begin_restore()
            } else {
                restore.begin_sync(last_index)
            }
        };
        tracing::info!(restoring = account.restoring, ?last_index, "bootstrapped");
        self.queue_restore_actions(actions, queue);
    }

    /// Turn restore actions into queued core calls and listener events.
    pub(crate) fn queue_restore_actions(
        &self,
        actions: Vec<RestoreAction>,
        queue: &mut VecDeque<Work>,
    ) {
        for action in actions {
            match action {
                RestoreAction::FetchCounts => queue.push_back(Work::Core(CoreCall::FetchMessageCounts)),
                RestoreAction::FetchContacts { last_index, limit } => {
                    queue.push_back(Work::Core(CoreCall::FetchFirstMessagesPerKey {
                        last_index,
                        limit,
                        reverse: false,
                    }));
                },
                RestoreAction::FetchMessages { last_index, limit, reverse } => {
                    queue.push_back(Work::Core(CoreCall::FetchMessagesBatch {
                        last_index,
                        limit,
                        reverse,
                    }));
                },
                RestoreAction::FetchPings => queue.push_back(Work::Core(CoreCall::FetchPings)),
                RestoreAction::FetchReadMarkers => queue.push_back(Work::Core(CoreCall::ReadMarkers)),
                RestoreAction::FetchMuteLevels => queue.push_back(Work::Core(CoreCall::MuteLevels)),
                RestoreAction::MarkInvoicesPaid => self.notify(EngineEvent::PendingInvoicesPaid),
                RestoreAction::Progress(percent) => {
                    self.notify(EngineEvent::RestoreProgress(percent));
                },
                RestoreAction::Finished => {
                    if let Some(account) = self.inner.account.lock().as_mut() {
                        account.restoring = false;
                    }
                    self.notify(EngineEvent::RestoreFinished);
                },
                RestoreAction::Cancelled => self.notify(EngineEvent::RestoreCancelled),
                RestoreAction::SyncFinished => self.notify(EngineEvent::SyncFinished),
            }
        }
    }

    async fn apply(&self, bundle: EffectBundle, ctx: DispatchContext, queue: &mut VecDeque<Work>) {
        if !self.has_session() {
            self.report(ClientError::NoSession);
            return;
        }

        self.apply_user_state(&bundle);
        let round_trip = self.record_ping(&bundle);

        if let Some(msat) = bundle.balance_msat {
            self.notify(EngineEvent::Balance(msat / 1000));
        }

        self.process_batch(&bundle.msgs, ctx.originating_topic.as_deref(), queue).await;
        self.complete_pings(&bundle.msgs, round_trip.or(ctx.started_ping), queue);

        if let Some(tribe) = &bundle.new_tribe {
            self.notify(EngineEvent::NewTribe(tribe.clone()));
        }
        if let Some(members) = &bundle.tribe_members {
            self.notify(EngineEvent::TribeMembers(members.clone()));
        }
        if let Some(raw) = &bundle.my_contact_info {
            self.on_my_contact_info(raw);
        }
        if let Some(raw) = &bundle.inviter_contact_info {
            self.on_inviter_contact_info(raw, queue);
        }
        if let Some(invite) = &bundle.new_invite {
            tracing::debug!(tag = %invite.tag, "invite in flight");
            self.inner.dashboard.lock().in_flight_invite = Some(invite.clone());
        }
        if let Some(raw) = &bundle.msgs_counts {
            self.on_msgs_counts(raw, queue);
        }
        if let Some(total) = bundle.msgs_total {
            self.notify(EngineEvent::MsgsTotal(total));
        }
        if let Some(last_read) = &bundle.last_read {
            self.notify(EngineEvent::LastRead(last_read.clone()));
        }
        if let Some(tribe) = &bundle.initial_tribe {
            self.inner.dashboard.lock().initial_tribe = Some(tribe.clone());
            self.notify(EngineEvent::InitialTribe(tribe.clone()));
        }
        if let Some(error) = &bundle.error {
            self.on_error(error, queue);
        }
        if let Some(raw) = &bundle.sent_status {
            self.on_sent_status(raw);
        }
        if let Some(raw) = &bundle.settled_status {
            self.on_settled_status(raw, queue);
        }
        if let Some(tag) = &bundle.async_pay_tag {
            self.on_async_pay_tag(tag, queue);
        }
        if let Some(host) = &bundle.lsp_host {
            self.on_lsp_host(host);
        }
        if let Some(levels) = &bundle.mute_levels {
            self.notify(EngineEvent::MuteLevels(levels.clone()));
        }
        if let Some(payments) = &bundle.payments {
            self.notify(EngineEvent::Payments(payments.clone()));
        }
        if let Some(total) = bundle.payments_total {
            self.notify(EngineEvent::PaymentsTotal(total));
        }
        if let Some(tags) = &bundle.tags {
            self.notify(EngineEvent::Tags(tags.clone()));
        }
        if !bundle.subscription_topics.is_empty() {
            self.subscribe(&bundle.subscription_topics).await;
        }

        self.publish_phase(bundle, ctx).await;
    }

    fn apply_user_state(&self, bundle: &EffectBundle) {
        if let Some(delta) = &bundle.state_delta {
            let result = {
                let mut owner = self.inner.owner.lock();
                owner.user_state.apply_delta(delta).and_then(|_| owner.user_state.to_stored())
            };
            match result {
                Ok(stored) => self.notify(EngineEvent::UserStateChanged { stored }),
                Err(e) => self.report(e.into()),
            }
        }

        if !bundle.deletions.is_empty() {
            let result = {
                let mut owner = self.inner.owner.lock();
                let removed = owner.user_state.remove_keys(&bundle.deletions);
                tracing::debug!(removed, "user state keys removed");
                owner.user_state.to_stored()
            };
            match result {
                Ok(stored) => self.notify(EngineEvent::UserStateChanged { stored }),
                Err(e) => self.report(e.into()),
            }
        }
    }

    /// Track the payment hash and message tags of an outbound round trip.
    ///
    /// Returns the round-trip timestamp.
    fn record_ping(&self, bundle: &EffectBundle) -> Option<u64> {
        let raw = bundle.ping.as_deref()?;
        match Ping::parse(raw) {
            Ok(ping) => {
                let mut liveness = self.inner.liveness.lock();
                liveness.record(&ping.payment_hash, ping.timestamp);
                for tag in bundle.message_tags() {
                    liveness.record(tag, ping.timestamp);
                }
                Some(ping.timestamp)
            },
            Err(e) => {
                self.report(e.into());
                None
            },
        }
    }

    /// Confirm round trips whose payment hash came back in `msgs`.
    ///
    /// The round trip started by the same bundle is never completed by it.
    fn complete_pings(&self, msgs: &[Msg], started: Option<u64>, queue: &mut VecDeque<Work>) {
        for msg in msgs {
            let Some(hash) = msg.payment_hash() else {
                continue;
            };
            let completed = {
                let mut liveness = self.inner.liveness.lock();
                match liveness.timestamp(hash) {
                    Some(ts) if Some(ts) != started => liveness.complete(hash),
                    _ => None,
                }
            };
            if let Some(ping_ts) = completed {
                tracing::info!(hash, ping_ts, "payment round trip confirmed");
                queue.push_back(Work::Core(CoreCall::PingDone { ping_ts }));
            }
        }
    }

    fn on_my_contact_info(&self, raw: &str) {
        let info = match ContactInfo::parse_own(raw) {
            Ok(info) => info,
            Err(e) => return self.report(e.into()),
        };
        let (restoring, router, default_tribe) = {
            let account = self.inner.account.lock();
            account.as_ref().map_or((false, None, None), |a| {
                (a.restoring, a.router.clone(), a.default_tribe.clone())
            })
        };
        tracing::info!(pubkey = %info.pubkey, restoring, "owner registered");
        self.notify(EngineEvent::OwnerRegistered {
            pubkey: info.pubkey,
            route_hint: info.route_hint,
            restoring,
            production: self.inner.config.production,
            router,
            default_tribe,
        });
    }

    fn on_inviter_contact_info(&self, raw: &str, queue: &mut VecDeque<Work>) {
        let inviter = match ContactInfo::parse_inviter(raw) {
            Ok(inviter) => inviter,
            Err(e) => return self.report(e.into()),
        };
        let changed = {
            let mut dashboard = self.inner.dashboard.lock();
            if dashboard.pending_inviter.as_ref() == Some(&inviter) {
                false
            } else {
                dashboard.pending_inviter = Some(inviter.clone());
                true
            }
        };
        if changed {
            tracing::info!(pubkey = %inviter.pubkey, "pending inviter, re-running bootstrap");
            self.notify(EngineEvent::PendingInviter(inviter));
            queue.push_back(Work::Bootstrap { resume_paging: false });
        }
    }

    fn on_msgs_counts(&self, raw: &str, queue: &mut VecDeque<Work>) {
        let counts = match MsgsCounts::parse(raw) {
            Ok(counts) => counts,
            Err(e) => return self.report(e.into()),
        };
        self.notify(EngineEvent::MsgsCounts(counts));
        let actions = self.inner.restore.lock().on_counts(&counts);
        self.queue_restore_actions(actions, queue);
    }

    /// An error naming a tracked key completes that round trip; anything
    /// else is reported.
    fn on_error(&self, error: &str, queue: &mut VecDeque<Work>) {
        let completed = {
            let mut liveness = self.inner.liveness.lock();
            liveness.key_mentioned_in(error).and_then(|key| liveness.complete(&key))
        };
        match completed {
            Some(ping_ts) => {
                tracing::info!(ping_ts, "async payment resolved by error");
                queue.push_back(Work::Core(CoreCall::PingDone { ping_ts }));
            },
            None => self.report(ClientError::Protocol { message: error.to_string() }),
        }
    }

    fn on_sent_status(&self, raw: &str) {
        let status = match SentStatus::parse(raw) {
            Ok(status) => status,
            Err(e) => return self.report(e.into()),
        };
        let invite = {
            let mut dashboard = self.inner.dashboard.lock();
            let matches = status.is_complete()
                && dashboard.in_flight_invite.as_ref().is_some_and(|i| i.tag == status.tag);
            if matches { dashboard.in_flight_invite.take() } else { None }
        };
        match invite {
            Some(invite) => {
                tracing::info!(tag = %invite.tag, "invite created");
                self.notify(EngineEvent::InviteCreated { code: invite.code, tag: invite.tag });
            },
            None => self.notify(EngineEvent::SentStatus(status)),
        }
    }

    fn on_settled_status(&self, raw: &str, queue: &mut VecDeque<Work>) {
        let status = match SettledStatus::parse(raw) {
            Ok(status) => status,
            Err(e) => return self.report(e.into()),
        };
        if !status.is_complete() {
            tracing::debug!(htlc_id = %status.htlc_id, status = %status.status, "settlement pending");
            return;
        }
        let parked = self.inner.settlements.lock().take(SettlementKey::Index(&status.htlc_id));
        match parked {
            Some(bundle) => {
                tracing::info!(htlc_id = %status.htlc_id, "settlement complete, resuming bundle");
                queue.push_back(Work::Dispatch(bundle, DispatchContext::settled()));
            },
            None => tracing::debug!(htlc_id = %status.htlc_id, "no parked bundle for settlement"),
        }
    }

    fn on_async_pay_tag(&self, tag: &str, queue: &mut VecDeque<Work>) {
        let parked = self.inner.settlements.lock().take(SettlementKey::Tag(tag));
        match parked {
            Some(bundle) => {
                tracing::info!(tag, "async payment complete, resuming bundle");
                queue.push_back(Work::Dispatch(bundle, DispatchContext::async_paid()));
            },
            None => tracing::debug!(tag, "no parked bundle for async payment"),
        }
    }

    fn on_lsp_host(&self, host: &str) {
        if let Some(account) = self.inner.account.lock().as_mut() {
            account.mixer = host.to_string();
        }
        tracing::info!(host, "mixer address changed");
        self.notify(EngineEvent::MixerChanged(host.to_string()));
    }

    async fn subscribe(&self, topics: &[String]) {
        tracing::debug!(count = topics.len(), "subscribing");
        if let Err(e) = self.inner.transport.subscribe(topics).await {
            self.transport_failed(e.into()).await;
        }
    }

    async fn publish(&self, publish: &Publish) {
        tracing::debug!(topic = %publish.topic, bytes = publish.payload.len(), "publishing");
        if let Err(e) = self.inner.transport.publish(&publish.topic, &publish.payload).await {
            self.transport_failed(e.into()).await;
        }
    }

    async fn publish_phase(&self, bundle: EffectBundle, ctx: DispatchContext) {
        if bundle.publishes_nothing() {
            return;
        }

        if !ctx.skip_settlement {
            if let Some(settlement) = &bundle.settlement {
                self.publish(settlement).await;
                tracing::info!(topic = %settlement.topic, "awaiting settlement");
                self.inner.settlements.lock().enqueue(bundle);
                return;
            }
        }

        let Some(register) = bundle.register.clone() else {
            self.continue_publishing(bundle, ctx).await;
            return;
        };

        self.publish(&register).await;
        let session = self.clone();
        let delay = self.inner.config.register_delay;
        tokio::spawn(async move {
            session.inner.env.sleep(delay).await;
            session.continue_publishing(bundle, ctx).await;
        });
    }

    /// Everything after the register publish.
    async fn continue_publishing(&self, bundle: EffectBundle, ctx: DispatchContext) {
        if !self.has_session() {
            tracing::debug!("session gone before dependent publishes");
            return;
        }

        if !ctx.skip_async_pay {
            if let Some(async_pay) = &bundle.async_pay {
                self.publish(async_pay).await;
                tracing::info!(topic = %async_pay.topic, "awaiting async payment");
                self.inner.settlements.lock().enqueue(bundle);
                return;
            }
        }

        for publish in &bundle.publishes {
            self.publish(publish).await;
        }
    }
}
