//! Listener boundary: how the persistence and UI layers observe the engine.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use switchboard_core::{ContactInfo, Msg, MsgsCounts, SentStatus};

use crate::{crypto::Mnemonic, error::ClientError};

/// Broker connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// A connection attempt is in progress.
    Connecting,
    /// Connected and bootstrapped.
    Connected,
    /// Not connected.
    Disconnected,
}

/// Externally visible engine changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Connection status changed.
    Connection(ConnectionStatus),
    /// User state changed; `stored` is the new persisted form.
    UserStateChanged {
        /// Base64 JSON object of base64 values.
        stored: String,
    },
    /// Highest owner message index advanced.
    MessageIndex(u64),
    /// Lightning balance in sats.
    Balance(u64),
    /// A tribe was created (JSON).
    NewTribe(String),
    /// Tribe member listing (JSON).
    TribeMembers(String),
    /// Our contact info is known: the account is registered.
    OwnerRegistered {
        /// Our pubkey.
        pubkey: String,
        /// Our route hint.
        route_hint: Option<String>,
        /// The account is being restored.
        restoring: bool,
        /// Production mode.
        production: bool,
        /// Router URL, if configured.
        router: Option<String>,
        /// Default tribe, if configured.
        default_tribe: Option<String>,
    },
    /// The inviter contact to create once onboarding completes.
    PendingInviter(ContactInfo),
    /// Aggregate counts.
    MsgsCounts(MsgsCounts),
    /// Total number of messages on the server.
    MsgsTotal(u64),
    /// Read markers (JSON).
    LastRead(String),
    /// Tribe to auto-join (JSON).
    InitialTribe(String),
    /// Outcome of an outbound payment.
    SentStatus(SentStatus),
    /// An invite was paid for and is ready to share.
    InviteCreated {
        /// Shareable invite code.
        code: String,
        /// Payment tag of the invite.
        tag: String,
    },
    /// Mute levels (JSON).
    MuteLevels(String),
    /// Payment history page (JSON).
    Payments(String),
    /// Total number of payments.
    PaymentsTotal(u64),
    /// Tag listing (JSON).
    Tags(String),
    /// Mixer address changed.
    MixerChanged(String),
    /// A fresh mnemonic was generated for a new account.
    MnemonicGenerated(Mnemonic),
    /// Restore progress in percent.
    RestoreProgress(u8),
    /// Restore finished.
    RestoreFinished,
    /// Restore cancelled.
    RestoreCancelled,
    /// Incremental sync caught up.
    SyncFinished,
    /// Pending invoices should be marked paid.
    PendingInvoicesPaid,
    /// An operation failed.
    Error(ClientError),
}

/// Receives engine events.
///
/// `notify` must return quickly. The async hooks are awaited in order: tribes
/// before contacts before each message, so persistence of one step completes
/// before the next starts.
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    /// An engine event.
    fn notify(&self, event: EngineEvent);

    /// Persist tribe-membership messages (joins, member approvals).
    async fn upsert_tribes(&self, _msgs: &[Msg]) {}

    /// Persist contact-key messages.
    async fn upsert_contacts(&self, _msgs: &[Msg]) {}

    /// Process one message (decrypt content and media, store it).
    async fn deliver_message(&self, _msg: &Msg) {}
}

/// Registered listeners.
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn Listener>>>,
}

impl ListenerSet {
    pub(crate) fn add(&self, listener: Arc<dyn Listener>) {
        self.listeners.write().push(listener);
    }

    fn snapshot(&self) -> Vec<Arc<dyn Listener>> {
        self.listeners.read().clone()
    }

    pub(crate) fn notify(&self, event: &EngineEvent) {
        for listener in self.snapshot() {
            listener.notify(event.clone());
        }
    }

    pub(crate) async fn upsert_tribes(&self, msgs: &[Msg]) {
        for listener in self.snapshot() {
            listener.upsert_tribes(msgs).await;
        }
    }

    pub(crate) async fn upsert_contacts(&self, msgs: &[Msg]) {
        for listener in self.snapshot() {
            listener.upsert_contacts(msgs).await;
        }
    }

    pub(crate) async fn deliver_message(&self, msg: &Msg) {
        for listener in self.snapshot() {
            listener.deliver_message(msg).await;
        }
    }
}
