//! Boundary to the cryptographic/protocol core.
//!
//! The core derives keys, signs, encodes and decodes protocol messages and
//! decides which topics and payloads to publish. The engine treats it as an
//! opaque, synchronous function library: every stateful call takes a
//! [`CoreContext`] and returns an [`EffectBundle`].

use switchboard_core::EffectBundle;
use thiserror::Error;

use crate::config::Network;

/// Failure reported by the crypto core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct CoreError {
    /// Reason given by the core.
    pub reason: String,
}

impl CoreError {
    /// Create a core error.
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// A BIP-39 mnemonic. `Debug` never prints the words.
#[derive(Clone, PartialEq, Eq)]
pub struct Mnemonic(String);

impl Mnemonic {
    /// Wrap a mnemonic phrase.
    pub fn new(words: impl Into<String>) -> Self {
        Self(words.into())
    }

    /// The phrase itself.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Mnemonic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Mnemonic(<redacted>)")
    }
}

/// Per-call context handed to [`CryptoCore::run`].
#[derive(Clone, PartialEq, Eq)]
pub struct CoreContext {
    /// Hex signing seed.
    pub seed: String,
    /// Strictly increasing millisecond timestamp.
    pub unique_time: u64,
    /// CBOR-encoded user state.
    pub user_state: Vec<u8>,
    /// Owner alias.
    pub alias: String,
    /// Owner avatar URL.
    pub avatar: Option<String>,
}

impl std::fmt::Debug for CoreContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreContext")
            .field("seed", &"<redacted>")
            .field("unique_time", &self.unique_time)
            .field("user_state", &format!("<{} bytes>", self.user_state.len()))
            .field("alias", &self.alias)
            .field("avatar", &self.avatar)
            .finish()
    }
}

/// Fields decoded from an invite code.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedInvite {
    /// Mixer address the invite points at.
    pub lsp_host: Option<String>,
    /// Tribe to join after onboarding.
    pub initial_tribe: Option<String>,
    /// Inviter's `pubkey_routehint`.
    pub inviter_contact_info: Option<String>,
}

/// Stateful crypto-core operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreCall {
    /// First call after connecting: yields subscriptions and contact info.
    InitialSetup {
        /// Device descriptor.
        device: String,
        /// Invite code used to create the account.
        invite_code: Option<String>,
    },
    /// Decode a payload that arrived on `topic`.
    HandleInbound {
        /// Topic the payload arrived on.
        topic: String,
        /// Raw payload.
        payload: Vec<u8>,
    },
    /// Request aggregate message/contact counts.
    FetchMessageCounts,
    /// Request one page of first-messages-per-contact.
    FetchFirstMessagesPerKey {
        /// Starting index.
        last_index: u64,
        /// Page size.
        limit: u32,
        /// Walk toward lower indices.
        reverse: bool,
    },
    /// Request one page of messages.
    FetchMessagesBatch {
        /// Starting index.
        last_index: u64,
        /// Page size.
        limit: u32,
        /// Walk toward lower indices.
        reverse: bool,
    },
    /// Request outstanding liveness pings.
    FetchPings,
    /// Confirm the round trip identified by `ping_ts`.
    PingDone {
        /// Timestamp of the completed round trip.
        ping_ts: u64,
    },
    /// Request read markers.
    ReadMarkers,
    /// Request mute levels.
    MuteLevels,
    /// Send a message.
    Send {
        /// Recipient pubkey (contact or tribe).
        recipient: String,
        /// Message type code.
        msg_type: u8,
        /// JSON message content.
        content: String,
        /// Amount in sats.
        amount_sats: u64,
        /// Recipient is a tribe.
        is_tribe: bool,
    },
    /// Pay a bolt11 invoice.
    PayInvoice {
        /// Invoice to pay.
        invoice: String,
    },
    /// Create an invite.
    MakeInvite {
        /// Nickname of the invitee.
        nickname: String,
        /// Amount to fund the invitee with, in sats.
        amount_sats: u64,
        /// Welcome message.
        message: String,
        /// Tribe server the invitee should use.
        tribe_host: Option<String>,
    },
    /// Join a tribe.
    JoinTribe {
        /// Tribe pubkey.
        tribe_pubkey: String,
        /// Route hint to the tribe.
        route_hint: Option<String>,
        /// Alias to use in the tribe.
        alias: String,
        /// Join price in sats.
        amount_sats: u64,
        /// Tribe requires approval.
        is_private: bool,
    },
    /// Change a contact's or tribe's mute level.
    SetMuteLevel {
        /// Contact or tribe pubkey.
        pubkey: String,
        /// New level.
        level: u8,
    },
    /// Mark a conversation read up to `index`.
    MarkRead {
        /// Contact or tribe pubkey.
        pubkey: String,
        /// Last read message index.
        index: u64,
    },
    /// Request a page of payment history.
    FetchPayments {
        /// Start after this index.
        last_index: Option<u64>,
        /// Page size.
        limit: u32,
    },
}

impl CoreCall {
    /// Operation name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::InitialSetup { .. } => "initial_setup",
            Self::HandleInbound { .. } => "handle_inbound",
            Self::FetchMessageCounts => "fetch_message_counts",
            Self::FetchFirstMessagesPerKey { .. } => "fetch_first_messages_per_key",
            Self::FetchMessagesBatch { .. } => "fetch_messages_batch",
            Self::FetchPings => "fetch_pings",
            Self::PingDone { .. } => "ping_done",
            Self::ReadMarkers => "read_markers",
            Self::MuteLevels => "mute_levels",
            Self::Send { .. } => "send",
            Self::PayInvoice { .. } => "pay_invoice",
            Self::MakeInvite { .. } => "make_invite",
            Self::JoinTribe { .. } => "join_tribe",
            Self::SetMuteLevel { .. } => "set_mute_level",
            Self::MarkRead { .. } => "mark_read",
            Self::FetchPayments { .. } => "fetch_payments",
        }
    }
}

/// The cryptographic/protocol core.
///
/// Implementations must be cheap to call from async tasks; every method is
/// synchronous and runs on the caller's task.
pub trait CryptoCore: Send + Sync + 'static {
    /// Mnemonic for fresh entropy.
    fn mnemonic_from_entropy(&self, entropy: &[u8]) -> Result<Mnemonic, CoreError>;

    /// Hex seed for a mnemonic.
    fn mnemonic_to_seed(&self, mnemonic: &Mnemonic) -> Result<String, CoreError>;

    /// Extended public key used as the broker username.
    fn xpub_from_seed(&self, seed: &str, time: u64, network: Network) -> Result<String, CoreError>;

    /// Signature over `(seed, time, network)` used as the broker password.
    fn sign_ms(&self, seed: &str, time: u64, network: Network) -> Result<String, CoreError>;

    /// Payment hash of a bolt11 invoice.
    fn payment_hash_from_invoice(&self, invoice: &str) -> Result<String, CoreError>;

    /// Decode an invite code.
    fn parse_invite(&self, code: &str) -> Result<ParsedInvite, CoreError>;

    /// Run a stateful operation.
    fn run(&self, ctx: &CoreContext, call: &CoreCall) -> Result<EffectBundle, CoreError>;
}
