//! Session and account lifecycle.
//!
//! A [`Session`] owns at most one live broker connection plus the shared
//! engine state: owner info, liveness tracker, settlement queue, restore
//! machine and listener set. Each structure sits behind its own lock; no lock
//! is held across an `.await`.
//!
//! ```text
//!  Uninitialized ──create/restore/initialize──> Connecting ──Connected──> Connected
//!                                                    ^                        │
//!                                                    └──── reconnect ─────────┤
//!                                                                 Disconnected
//! ```
//!
//! Transport events for every connection attempt are tagged with a
//! generation number and funneled into one pump task; events from a
//! superseded attempt are dropped.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;
use switchboard_core::{
    ContactInfo, EffectBundle, Environment, LivenessTracker, MessageType, NewInvite, Ping,
    RestoreMachine, RestoreProgress, RestoreState, SettlementQueue, UniqueClock, UserState,
    constants::{delete_cost, tribe_message_amount},
};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::{
    config::{BrokerEndpoint, Network, SessionConfig},
    crypto::{CoreCall, CoreContext, CryptoCore, Mnemonic},
    dispatcher::{DispatchContext, Work},
    error::{ClientError, ErrorClass},
    listener::{ConnectionStatus, EngineEvent, Listener, ListenerSet},
    transport::{ConnectOptions, Transport, TransportEvent},
};

/// Entropy for a fresh 12-word mnemonic.
const MNEMONIC_ENTROPY_BYTES: usize = 16;

/// Owner profile and persisted state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerInfo {
    /// Display alias.
    pub alias: String,
    /// Avatar URL.
    pub avatar: Option<String>,
    /// Opaque key/value state round-tripped through the crypto core.
    pub user_state: UserState,
    /// Highest message index already stored locally.
    pub message_last_index: Option<u64>,
}

/// Parameters for restoring an existing account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreParams {
    /// Tribe to join by default.
    pub default_tribe: Option<String>,
    /// Tribe server host.
    pub tribe_host: Option<String>,
    /// Mixer (broker) address.
    pub mixer_address: String,
    /// Router URL.
    pub router: Option<String>,
}

/// A message to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Contact or tribe pubkey.
    pub recipient: String,
    /// Message type.
    pub msg_type: MessageType,
    /// JSON content.
    pub content: String,
    /// Requested amount in sats.
    pub amount_sats: Option<u64>,
    /// Recipient is a tribe.
    pub is_tribe: bool,
}

/// Parameters for creating an invite.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InviteRequest {
    /// Nickname of the invitee.
    pub nickname: String,
    /// Amount to fund the invitee with, in sats.
    pub amount_sats: u64,
    /// Welcome message.
    pub message: String,
    /// Tribe server the invitee should use.
    pub tribe_host: Option<String>,
}

/// Parameters for joining a tribe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TribeJoin {
    /// Tribe pubkey.
    pub tribe_pubkey: String,
    /// Route hint to the tribe.
    pub route_hint: Option<String>,
    /// Alias to use in the tribe.
    pub alias: String,
    /// Join price in sats.
    pub amount_sats: u64,
    /// Tribe requires approval.
    pub is_private: bool,
}

/// Connection-scoped account material.
#[derive(Debug, Clone)]
pub(crate) struct Account {
    pub(crate) seed: String,
    pub(crate) network: Network,
    pub(crate) mixer: String,
    pub(crate) tribe_server: Option<String>,
    pub(crate) router: Option<String>,
    pub(crate) default_tribe: Option<String>,
    pub(crate) invite_code: Option<String>,
    pub(crate) restoring: bool,
}

/// State re-primed on every `initialize_and_subscribe`.
#[derive(Debug, Default)]
pub(crate) struct Dashboard {
    pub(crate) pending_inviter: Option<ContactInfo>,
    pub(crate) initial_tribe: Option<String>,
    pub(crate) in_flight_invite: Option<NewInvite>,
}

/// Last parameters used to bring the session up.
#[derive(Debug, Clone)]
struct InitParams {
    address: String,
    mnemonic: Mnemonic,
    tribe_server: Option<String>,
    router: Option<String>,
    default_tribe: Option<String>,
}

impl InitParams {
    fn new(address: impl Into<String>, mnemonic: Mnemonic) -> Self {
        Self {
            address: address.into(),
            mnemonic,
            tribe_server: None,
            router: None,
            default_tribe: None,
        }
    }
}

pub(crate) struct Inner<E: Environment> {
    pub(crate) env: E,
    pub(crate) config: SessionConfig,
    pub(crate) core: Arc<dyn CryptoCore>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) listeners: ListenerSet,

    pub(crate) account: Mutex<Option<Account>>,
    pub(crate) owner: Mutex<OwnerInfo>,
    pub(crate) liveness: Mutex<LivenessTracker>,
    pub(crate) settlements: Mutex<SettlementQueue>,
    pub(crate) restore: Mutex<RestoreMachine>,
    pub(crate) dashboard: Mutex<Dashboard>,
    clock: Mutex<UniqueClock>,
    last_init: Mutex<Option<InitParams>>,
    pending_restore: Mutex<Option<Mnemonic>>,

    connected: AtomicBool,
    first_reconnect_attempted: AtomicBool,
    bootstrapped: AtomicBool,
    generation: AtomicU64,

    events_tx: UnboundedSender<(u64, TransportEvent)>,
    events_rx: Mutex<Option<UnboundedReceiver<(u64, TransportEvent)>>>,
}

/// The messaging engine.
///
/// Cheap to clone; clones share the same session.
///
/// # Type Parameters
///
/// - `E`: Environment implementation for time/randomness/sleeping
#[derive(Clone)]
pub struct Session<E: Environment> {
    pub(crate) inner: Arc<Inner<E>>,
}

impl<E: Environment> Session<E> {
    /// Create an engine with no live session.
    pub fn new(
        env: E,
        config: SessionConfig,
        core: Arc<dyn CryptoCore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (events_tx, events_rx) = unbounded_channel();
        let restore = RestoreMachine::new(config.contacts_page_size, config.messages_page_size);
        Self {
            inner: Arc::new(Inner {
                env,
                config,
                core,
                transport,
                listeners: ListenerSet::default(),
                account: Mutex::new(None),
                owner: Mutex::new(OwnerInfo::default()),
                liveness: Mutex::new(LivenessTracker::new()),
                settlements: Mutex::new(SettlementQueue::new()),
                restore: Mutex::new(restore),
                dashboard: Mutex::new(Dashboard::default()),
                clock: Mutex::new(UniqueClock::new()),
                last_init: Mutex::new(None),
                pending_restore: Mutex::new(None),
                connected: AtomicBool::new(false),
                first_reconnect_attempted: AtomicBool::new(false),
                bootstrapped: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
            }),
        }
    }

    /// Register a listener.
    pub fn add_listener(&self, listener: Arc<dyn Listener>) {
        self.inner.listeners.add(listener);
    }

    /// Broker connection is up.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// A session (account material) is live.
    pub fn has_session(&self) -> bool {
        self.inner.account.lock().is_some()
    }

    /// Current restore phase.
    pub fn restore_state(&self) -> RestoreState {
        self.inner.restore.lock().state()
    }

    /// Current restore counters.
    pub fn restore_progress(&self) -> RestoreProgress {
        self.inner.restore.lock().progress()
    }

    /// Number of parked settlement bundles.
    pub fn pending_settlements(&self) -> usize {
        self.inner.settlements.lock().len()
    }

    /// Number of tracked liveness keys.
    pub fn liveness_entries(&self) -> usize {
        self.inner.liveness.lock().len()
    }

    /// Current mixer address.
    pub fn mixer_address(&self) -> Option<String> {
        self.inner.account.lock().as_ref().map(|a| a.mixer.clone())
    }

    /// Snapshot of the owner info.
    pub fn owner(&self) -> OwnerInfo {
        self.inner.owner.lock().clone()
    }

    /// Mark the next account creation as a restore from `mnemonic`.
    pub fn begin_restore(&self, mnemonic: Mnemonic) {
        tracing::info!("next account creation restores an existing account");
        *self.inner.pending_restore.lock() = Some(mnemonic);
    }

    /// Create a new account and connect.
    ///
    /// Defers to [`Session::restore_account`] when a restore was requested
    /// with [`Session::begin_restore`].
    pub async fn create_account(
        &self,
        alias: &str,
        mixer_address: &str,
        invite_code: Option<&str>,
    ) -> Result<(), ClientError> {
        let result = self.try_create_account(alias, mixer_address, invite_code).await;
        self.reported(result)
    }

    async fn try_create_account(
        &self,
        alias: &str,
        mixer_address: &str,
        invite_code: Option<&str>,
    ) -> Result<(), ClientError> {
        if self.is_connected() {
            return Err(ClientError::AlreadyConnecting);
        }
        let restoring = self.inner.pending_restore.lock().is_some();
        if restoring {
            let params =
                RestoreParams { mixer_address: mixer_address.to_string(), ..RestoreParams::default() };
            return self.try_restore_account(params).await;
        }

        let mut entropy = [0u8; MNEMONIC_ENTROPY_BYTES];
        self.inner.env.random_bytes(&mut entropy);
        let mnemonic = self
            .inner
            .core
            .mnemonic_from_entropy(&entropy)
            .map_err(|e| ClientError::KeyDerivation { reason: e.reason })?;
        self.notify(EngineEvent::MnemonicGenerated(mnemonic.clone()));
        let seed = self.derive_seed(&mnemonic)?;

        let mut mixer = mixer_address.to_string();
        if let Some(code) = invite_code {
            let invite = self
                .inner
                .core
                .parse_invite(code)
                .map_err(|e| ClientError::Core { operation: "parse_invite", reason: e.reason })?;
            if let Some(host) = invite.lsp_host {
                mixer = host;
            }
            if let Some(info) = invite.inviter_contact_info {
                let inviter = ContactInfo::parse_inviter(&info)?;
                self.inner.dashboard.lock().pending_inviter = Some(inviter.clone());
                self.notify(EngineEvent::PendingInviter(inviter));
            }
            if let Some(tribe) = invite.initial_tribe {
                self.inner.dashboard.lock().initial_tribe = Some(tribe.clone());
                self.notify(EngineEvent::InitialTribe(tribe));
            }
        }

        tracing::info!(%mixer, invited = invite_code.is_some(), "creating account");
        let account = Account {
            seed,
            network: self.inner.config.network,
            mixer: mixer.clone(),
            tribe_server: None,
            router: None,
            default_tribe: None,
            invite_code: invite_code.map(str::to_string),
            restoring: false,
        };
        *self.inner.last_init.lock() = Some(InitParams::new(mixer, mnemonic));
        let owner = OwnerInfo { alias: alias.to_string(), ..OwnerInfo::default() };
        self.open_session(account, owner, false).await
    }

    /// Restore an existing account from the mnemonic given to
    /// [`Session::begin_restore`] and connect.
    pub async fn restore_account(&self, params: RestoreParams) -> Result<(), ClientError> {
        let result = self.try_restore_account(params).await;
        self.reported(result)
    }

    async fn try_restore_account(&self, params: RestoreParams) -> Result<(), ClientError> {
        if self.is_connected() {
            return Err(ClientError::AlreadyConnecting);
        }
        let mnemonic = self.inner.pending_restore.lock().take().ok_or_else(|| {
            ClientError::KeyDerivation { reason: "no mnemonic to restore from".to_string() }
        })?;
        let seed = self.derive_seed(&mnemonic)?;

        tracing::info!(mixer = %params.mixer_address, "restoring account");
        let account = Account {
            seed,
            network: self.inner.config.network,
            mixer: params.mixer_address.clone(),
            tribe_server: params.tribe_host.clone(),
            router: params.router.clone(),
            default_tribe: params.default_tribe.clone(),
            invite_code: None,
            restoring: true,
        };
        *self.inner.last_init.lock() = Some(InitParams {
            address: params.mixer_address,
            mnemonic,
            tribe_server: params.tribe_host,
            router: params.router,
            default_tribe: params.default_tribe,
        });
        self.open_session(account, OwnerInfo::default(), false).await
    }

    /// App-start entry point.
    ///
    /// When already connected, only re-primes dashboard state and reports the
    /// connection; otherwise derives the seed and connects.
    pub async fn initialize_and_subscribe(
        &self,
        address: &str,
        mnemonic: Mnemonic,
        owner: OwnerInfo,
    ) -> Result<(), ClientError> {
        let result = self.try_initialize(InitParams::new(address, mnemonic), owner, false).await;
        self.reported(result)
    }

    /// Bring the session up from `params`.
    ///
    /// With `resume`, the restore machine survives: a restore in progress
    /// picks up paging from its current phase once connected.
    async fn try_initialize(
        &self,
        params: InitParams,
        owner: OwnerInfo,
        resume: bool,
    ) -> Result<(), ClientError> {
        *self.inner.last_init.lock() = Some(params.clone());

        if self.is_connected() {
            tracing::debug!("already connected, re-priming dashboard");
            self.reprime_dashboard().await;
            return Ok(());
        }

        let seed = self.derive_seed(&params.mnemonic)?;
        let restoring = resume && self.inner.restore.lock().state().is_restoring();
        let account = Account {
            seed,
            network: self.inner.config.network,
            mixer: params.address,
            tribe_server: params.tribe_server,
            router: params.router,
            default_tribe: params.default_tribe,
            invite_code: None,
            restoring,
        };
        self.open_session(account, owner, resume).await
    }

    /// Reconnect using the last-known parameters.
    ///
    /// When still connected, only refreshes read markers and mute levels.
    /// A restore in progress continues from where it stopped.
    pub async fn reconnect_with_backoff(&self) -> Result<(), ClientError> {
        if self.is_connected() {
            self.drain(VecDeque::from([
                Work::Core(CoreCall::ReadMarkers),
                Work::Core(CoreCall::MuteLevels),
            ]))
            .await;
            self.notify(EngineEvent::Connection(ConnectionStatus::Connected));
            return Ok(());
        }

        let params = self.inner.last_init.lock().clone();
        let Some(params) = params else {
            return self.reported(Err(ClientError::NoSession));
        };
        let owner = self.owner();

        tracing::info!(address = %params.address, "reconnecting");
        self.disconnect().await;
        let result = self.try_initialize(params, owner, true).await;
        self.reported(result)
    }

    /// Tear down the connection. Errors from the transport are ignored.
    ///
    /// Clears the liveness tracker and the settlement queue; keeps the owner
    /// info and last init parameters for [`Session::reconnect_with_backoff`].
    pub async fn disconnect(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let had_session = self.inner.account.lock().take().is_some();
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.bootstrapped.store(false, Ordering::SeqCst);

        if let Err(e) = self.inner.transport.disconnect().await {
            tracing::debug!("disconnect error ignored: {}", e);
        }

        self.inner.liveness.lock().clear();
        self.inner.settlements.lock().clear();
        self.inner.dashboard.lock().in_flight_invite = None;

        tracing::info!(had_session, "disconnected");
        self.notify(EngineEvent::Connection(ConnectionStatus::Disconnected));
    }

    /// Send a message. Tribe messages are bumped to the minimum amount.
    pub async fn send_message(&self, message: OutgoingMessage) -> Result<(), ClientError> {
        let amount_sats = if message.is_tribe {
            tribe_message_amount(message.amount_sats)
        } else {
            message.amount_sats.unwrap_or(0)
        };
        let call = CoreCall::Send {
            recipient: message.recipient,
            msg_type: message.msg_type.to_u8(),
            content: message.content,
            amount_sats,
            is_tribe: message.is_tribe,
        };
        let result = self.execute(call).await;
        self.reported(result)
    }

    /// Delete a previously sent message.
    pub async fn delete_message(
        &self,
        recipient: &str,
        uuid: &str,
        is_tribe: bool,
    ) -> Result<(), ClientError> {
        let content = serde_json::json!({ "content": uuid }).to_string();
        let call = CoreCall::Send {
            recipient: recipient.to_string(),
            msg_type: MessageType::Delete.to_u8(),
            content,
            amount_sats: delete_cost(is_tribe),
            is_tribe,
        };
        let result = self.execute(call).await;
        self.reported(result)
    }

    /// Pay a bolt11 invoice.
    ///
    /// The invoice's payment hash is tracked so the later ping completion can
    /// be correlated with this payment.
    pub async fn pay_invoice(&self, invoice: &str) -> Result<(), ClientError> {
        let result = self.try_pay_invoice(invoice).await;
        self.reported(result)
    }

    async fn try_pay_invoice(&self, invoice: &str) -> Result<(), ClientError> {
        let hash = self.inner.core.payment_hash_from_invoice(invoice).map_err(|e| {
            ClientError::Core { operation: "payment_hash_from_invoice", reason: e.reason }
        })?;
        let (bundle, time) =
            self.run_core(&CoreCall::PayInvoice { invoice: invoice.to_string() })?;

        let timestamp = bundle
            .ping
            .as_deref()
            .and_then(|raw| Ping::parse(raw).ok())
            .map_or(time, |ping| ping.timestamp);
        self.inner.liveness.lock().record(&hash, timestamp);

        self.dispatch_with(bundle, DispatchContext::started(timestamp)).await;
        Ok(())
    }

    /// Create an invite. The invite is reported once its payment completes.
    pub async fn create_invite(&self, request: InviteRequest) -> Result<(), ClientError> {
        let call = CoreCall::MakeInvite {
            nickname: request.nickname,
            amount_sats: request.amount_sats,
            message: request.message,
            tribe_host: request.tribe_host,
        };
        let result = self.execute(call).await;
        self.reported(result)
    }

    /// Join a tribe.
    pub async fn join_tribe(&self, join: TribeJoin) -> Result<(), ClientError> {
        let call = CoreCall::JoinTribe {
            tribe_pubkey: join.tribe_pubkey,
            route_hint: join.route_hint,
            alias: join.alias,
            amount_sats: join.amount_sats,
            is_private: join.is_private,
        };
        let result = self.execute(call).await;
        self.reported(result)
    }

    /// Set the mute level of a contact or tribe.
    pub async fn set_mute_level(&self, pubkey: &str, level: u8) -> Result<(), ClientError> {
        let result =
            self.execute(CoreCall::SetMuteLevel { pubkey: pubkey.to_string(), level }).await;
        self.reported(result)
    }

    /// Mark a conversation read up to `index`.
    pub async fn mark_read(&self, pubkey: &str, index: u64) -> Result<(), ClientError> {
        let result = self.execute(CoreCall::MarkRead { pubkey: pubkey.to_string(), index }).await;
        self.reported(result)
    }

    /// Request a page of payment history.
    pub async fn fetch_payments(
        &self,
        last_index: Option<u64>,
        limit: u32,
    ) -> Result<(), ClientError> {
        let result = self.execute(CoreCall::FetchPayments { last_index, limit }).await;
        self.reported(result)
    }

    /// Cancel an in-progress restore. Fetches in flight are not aborted;
    /// their pages are ignored.
    pub fn cancel_restore(&self) {
        let actions = self.inner.restore.lock().cancel();
        if actions.is_empty() {
            tracing::debug!("no restore to cancel");
            return;
        }
        if let Some(account) = self.inner.account.lock().as_mut() {
            account.restoring = false;
        }
        let mut queue = VecDeque::new();
        self.queue_restore_actions(actions, &mut queue);
    }

    async fn execute(&self, call: CoreCall) -> Result<(), ClientError> {
        let (bundle, _) = self.run_core(&call)?;
        self.dispatch(bundle).await;
        Ok(())
    }

    async fn reprime_dashboard(&self) {
        let (inviter, tribe) = {
            let dashboard = self.inner.dashboard.lock();
            (dashboard.pending_inviter.clone(), dashboard.initial_tribe.clone())
        };
        if let Some(inviter) = inviter {
            self.notify(EngineEvent::PendingInviter(inviter));
        }
        if let Some(tribe) = tribe {
            self.notify(EngineEvent::InitialTribe(tribe));
        }
        self.drain(VecDeque::from([Work::Core(CoreCall::ReadMarkers)])).await;
        self.notify(EngineEvent::Connection(ConnectionStatus::Connected));
    }

    fn derive_seed(&self, mnemonic: &Mnemonic) -> Result<String, ClientError> {
        self.inner
            .core
            .mnemonic_to_seed(mnemonic)
            .map_err(|e| ClientError::KeyDerivation { reason: e.reason })
    }

    async fn open_session(
        &self,
        account: Account,
        owner: OwnerInfo,
        resume: bool,
    ) -> Result<(), ClientError> {
        *self.inner.account.lock() = Some(account);
        *self.inner.owner.lock() = owner;
        if !resume {
            *self.inner.restore.lock() = RestoreMachine::new(
                self.inner.config.contacts_page_size,
                self.inner.config.messages_page_size,
            );
        }
        self.inner.first_reconnect_attempted.store(false, Ordering::SeqCst);
        self.inner.bootstrapped.store(false, Ordering::SeqCst);
        self.inner.connected.store(false, Ordering::SeqCst);

        self.ensure_pump();

        match self.connect_transport().await {
            Ok(()) => Ok(()),
            Err(ClientError::Connect { reason }) => {
                self.on_connection_failed(reason).await;
                Ok(())
            },
            Err(e) => Err(e),
        }
    }

    /// Start one transport connection attempt for the live session.
    async fn connect_transport(&self) -> Result<(), ClientError> {
        let (seed, network, mixer) = {
            let account = self.inner.account.lock();
            let account = account.as_ref().ok_or(ClientError::NoSession)?;
            (account.seed.clone(), account.network, account.mixer.clone())
        };
        let endpoint = BrokerEndpoint::parse(&mixer, &self.inner.config)?;

        let time = self.unique_time();
        let username = self
            .inner
            .core
            .xpub_from_seed(&seed, time, network)
            .map_err(|e| ClientError::KeyDerivation { reason: e.reason })?;
        let password = self
            .inner
            .core
            .sign_ms(&seed, time, network)
            .map_err(|e| ClientError::KeyDerivation { reason: e.reason })?;

        let options = ConnectOptions {
            endpoint,
            client_id: format!("switchboard_{:016x}", self.inner.env.random_u64()),
            username,
            password,
            keep_alive: self.inner.config.keep_alive,
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, mut rx) = unbounded_channel();
        let forward = self.inner.events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if forward.send((generation, event)).is_err() {
                    break;
                }
            }
        });

        tracing::info!(generation, endpoint = ?options.endpoint, "connecting");
        self.notify(EngineEvent::Connection(ConnectionStatus::Connecting));
        self.inner.transport.connect(options, tx).await.map_err(ClientError::from)
    }

    /// Spawn the task that feeds transport events into the engine.
    fn ensure_pump(&self) {
        let Some(mut events) = self.inner.events_rx.lock().take() else {
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some((generation, event)) = events.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let session = Self { inner };
                if session.inner.generation.load(Ordering::SeqCst) != generation {
                    tracing::debug!(generation, "dropping event from superseded connection");
                    continue;
                }
                session.on_transport_event(event).await;
            }
        });
    }

    async fn on_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                self.inner.connected.store(true, Ordering::SeqCst);
                tracing::info!("connected");
                self.notify(EngineEvent::Connection(ConnectionStatus::Connected));
                if !self.inner.bootstrapped.swap(true, Ordering::SeqCst) {
                    self.drain(VecDeque::from([Work::Bootstrap { resume_paging: true }])).await;
                }
            },
            TransportEvent::ConnectionFailed { reason } => {
                self.on_connection_failed(reason).await;
            },
            TransportEvent::ConnectionLost { reason } => {
                self.inner.connected.store(false, Ordering::SeqCst);
                tracing::warn!(%reason, "connection lost");
                self.notify(EngineEvent::Connection(ConnectionStatus::Disconnected));
                self.transport_failed(ClientError::ConnectionLost { reason }).await;
            },
            TransportEvent::Message { topic, payload } => {
                tracing::debug!(%topic, bytes = payload.len(), "message arrived");
                self.drain(VecDeque::from([Work::Inbound { topic, payload }])).await;
            },
        }
    }

    async fn on_connection_failed(&self, reason: String) {
        self.inner.connected.store(false, Ordering::SeqCst);
        tracing::warn!(%reason, "connection failed");
        self.report(ClientError::Connect { reason });
        self.notify(EngineEvent::Connection(ConnectionStatus::Disconnected));
        self.reconnect_once().await;
    }

    /// Report a transport failure (connection lost, publish or subscribe
    /// rejected) and spend the session's one automatic reconnect on it.
    pub(crate) async fn transport_failed(&self, err: ClientError) {
        self.report(err);
        self.reconnect_once().await;
    }

    /// The first transport failure of a session triggers exactly one
    /// reconnect; later failures wait for the caller.
    async fn reconnect_once(&self) {
        if !self.has_session() {
            return;
        }
        if self.inner.first_reconnect_attempted.swap(true, Ordering::SeqCst) {
            tracing::debug!("reconnect already attempted, waiting for caller");
            return;
        }

        tracing::info!("reconnecting after first failure");
        // A fresh broker session needs its subscriptions back.
        self.inner.bootstrapped.store(false, Ordering::SeqCst);
        if let Err(e) = self.connect_transport().await {
            self.report(e);
        }
    }

    pub(crate) fn unique_time(&self) -> u64 {
        let wall = self.inner.env.unix_millis();
        self.inner.clock.lock().next(wall)
    }

    pub(crate) fn core_context(&self) -> Result<CoreContext, ClientError> {
        let seed = self
            .inner
            .account
            .lock()
            .as_ref()
            .map(|a| a.seed.clone())
            .ok_or(ClientError::NoSession)?;
        let (user_state, alias, avatar) = {
            let owner = self.inner.owner.lock();
            (owner.user_state.to_core_bytes()?, owner.alias.clone(), owner.avatar.clone())
        };
        Ok(CoreContext { seed, unique_time: self.unique_time(), user_state, alias, avatar })
    }

    /// Run a core call; returns the bundle and the call's unique time.
    pub(crate) fn run_core(
        &self,
        call: &CoreCall,
    ) -> Result<(EffectBundle, u64), ClientError> {
        let ctx = self.core_context()?;
        tracing::debug!(operation = call.name(), time = ctx.unique_time, "core call");
        let bundle = self
            .inner
            .core
            .run(&ctx, call)
            .map_err(|e| ClientError::Core { operation: call.name(), reason: e.reason })?;
        Ok((bundle, ctx.unique_time))
    }

    pub(crate) fn notify(&self, event: EngineEvent) {
        self.inner.listeners.notify(&event);
    }

    /// Log and deliver an error to listeners.
    pub(crate) fn report(&self, err: ClientError) {
        match err.class() {
            ErrorClass::Transport | ErrorClass::Core => tracing::warn!("{}", err),
            ErrorClass::Malformed => tracing::warn!("dropping malformed payload: {}", err),
            ErrorClass::Protocol => tracing::info!("{}", err),
            ErrorClass::Session => tracing::debug!("{}", err),
        }
        self.notify(EngineEvent::Error(err));
    }

    fn reported<T>(&self, result: Result<T, ClientError>) -> Result<T, ClientError> {
        if let Err(e) = &result {
            self.report(e.clone());
        }
        result
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::{Duration, Instant};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        crypto::{CoreError, ParsedInvite},
        transport::TransportError,
    };

    #[derive(Clone, Default)]
    struct FixedEnv;

    impl Environment for FixedEnv {
        fn now(&self) -> Instant {
            Instant::now()
        }

        fn unix_millis(&self) -> u64 {
            1_000
        }

        fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            tokio::time::sleep(duration)
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            buffer.fill(7);
        }
    }

    struct EchoCore;

    impl CryptoCore for EchoCore {
        fn mnemonic_from_entropy(&self, _entropy: &[u8]) -> Result<Mnemonic, CoreError> {
            Ok(Mnemonic::new("abandon"))
        }

        fn mnemonic_to_seed(&self, mnemonic: &Mnemonic) -> Result<String, CoreError> {
            if mnemonic.expose().is_empty() {
                return Err(CoreError::new("empty mnemonic"));
            }
            Ok("00ff".to_string())
        }

        fn xpub_from_seed(&self, _: &str, _: u64, _: Network) -> Result<String, CoreError> {
            Ok("xpub".to_string())
        }

        fn sign_ms(&self, _: &str, _: u64, _: Network) -> Result<String, CoreError> {
            Ok("sig".to_string())
        }

        fn payment_hash_from_invoice(&self, _: &str) -> Result<String, CoreError> {
            Ok("hash".to_string())
        }

        fn parse_invite(&self, _: &str) -> Result<ParsedInvite, CoreError> {
            Ok(ParsedInvite::default())
        }

        fn run(&self, _: &CoreContext, _: &CoreCall) -> Result<EffectBundle, CoreError> {
            Ok(EffectBundle::default())
        }
    }

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn connect(
            &self,
            _: ConnectOptions,
            _: UnboundedSender<TransportEvent>,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        async fn publish(&self, _: &str, _: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }

        async fn subscribe(&self, _: &[String]) -> Result<(), TransportError> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn session() -> Session<FixedEnv> {
        Session::new(
            FixedEnv,
            SessionConfig::test(),
            Arc::new(EchoCore),
            Arc::new(NullTransport),
        )
    }

    #[test]
    fn unique_time_is_strictly_increasing_under_a_frozen_clock() {
        let session = session();
        let a = session.unique_time();
        let b = session.unique_time();
        assert_eq!(a, 1_000);
        assert_eq!(b, 1_001);
    }

    #[test]
    fn core_context_requires_a_session() {
        assert_eq!(session().core_context(), Err(ClientError::NoSession));
    }

    #[tokio::test]
    async fn restore_without_mnemonic_fails() {
        let err = session().restore_account(RestoreParams::default()).await;
        assert!(matches!(err, Err(ClientError::KeyDerivation { .. })));
    }

    #[tokio::test]
    async fn create_account_opens_a_session() {
        let session = session();
        session.create_account("alice", "localhost", None).await.unwrap();
        assert!(session.has_session());
        assert_eq!(session.mixer_address().as_deref(), Some("localhost"));
        assert_eq!(session.owner().alias, "alice");

        session.disconnect().await;
        assert!(!session.has_session());
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn bad_address_is_reported() {
        let session = session();
        let err = session.create_account("alice", "host:nope", None).await;
        assert!(matches!(err, Err(ClientError::InvalidAddress { .. })));
    }
}
