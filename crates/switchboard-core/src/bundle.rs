//! Effect bundles and decoded messages.
//!
//! An [`EffectBundle`] is the universal output of every crypto-core call and
//! every inbound payload decode. It is a sparse record: each populated field
//! asks the engine to apply one kind of effect. Bundles are immutable once
//! produced; the engine only matches on them and parks them in the
//! settlement queue.

/// One topic/payload pair the engine must publish.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Publish {
    /// Broker topic.
    pub topic: String,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
}

impl Publish {
    /// Create a publish for `topic`.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self { topic: topic.into(), payload: payload.into() }
    }
}

impl std::fmt::Debug for Publish {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publish")
            .field("topic", &self.topic)
            .field("payload", &format!("<{} bytes>", self.payload.len()))
            .finish()
    }
}

/// Invite produced by an invite-creation call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewInvite {
    /// Shareable invite code.
    pub code: String,
    /// Tag the later sent-status carries when the invite payment completes.
    pub tag: String,
}

/// Result of a crypto-core call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EffectBundle {
    /// CBOR `map<text, bytes>` of user-state entries to upsert.
    pub state_delta: Option<Vec<u8>>,
    /// User-state keys to remove.
    pub deletions: Vec<String>,
    /// Outbound liveness ping, `"<payment_hash>:<timestamp>"`.
    pub ping: Option<String>,
    /// Lightning balance in millisatoshis.
    pub balance_msat: Option<u64>,
    /// Decoded messages.
    pub msgs: Vec<Msg>,
    /// Newly created tribe (JSON).
    pub new_tribe: Option<String>,
    /// Tribe member listing (JSON).
    pub tribe_members: Option<String>,
    /// Our own `pubkey_routehint`.
    pub my_contact_info: Option<String>,
    /// The inviter's `pubkey_routehint`.
    pub inviter_contact_info: Option<String>,
    /// Invite created by this call.
    pub new_invite: Option<NewInvite>,
    /// Aggregate message/contact counts (JSON).
    pub msgs_counts: Option<String>,
    /// Total number of messages on the server.
    pub msgs_total: Option<u64>,
    /// Read markers (JSON).
    pub last_read: Option<String>,
    /// Tribe to auto-join after onboarding.
    pub initial_tribe: Option<String>,
    /// Protocol-level error string.
    pub error: Option<String>,
    /// Outcome of an outbound payment (JSON).
    pub sent_status: Option<String>,
    /// Outcome of a settlement (JSON `{htlc_id, status}`).
    pub settled_status: Option<String>,
    /// Tag of an async payment that completed.
    pub async_pay_tag: Option<String>,
    /// New mixer (LSP) address.
    pub lsp_host: Option<String>,
    /// Mute levels (JSON).
    pub mute_levels: Option<String>,
    /// Payment history page (JSON).
    pub payments: Option<String>,
    /// Total number of payments.
    pub payments_total: Option<u64>,
    /// Tag listing (JSON).
    pub tags: Option<String>,
    /// Topics to subscribe to.
    pub subscription_topics: Vec<String>,
    /// Settlement publish; completes out of band.
    pub settlement: Option<Publish>,
    /// Register publish; dependent publishes wait the register delay.
    pub register: Option<Publish>,
    /// Async-pay publish; completes out of band.
    pub async_pay: Option<Publish>,
    /// Remaining publishes, in order.
    pub publishes: Vec<Publish>,
}

impl EffectBundle {
    /// True if any carried message has the given `index`.
    pub fn carries_index(&self, index: &str) -> bool {
        self.msgs.iter().any(|m| m.index.as_deref() == Some(index))
    }

    /// True if any carried message has the given `tag`.
    pub fn carries_tag(&self, tag: &str) -> bool {
        self.msgs.iter().any(|m| m.tag.as_deref() == Some(tag))
    }

    /// Non-empty tags of the carried messages.
    pub fn message_tags(&self) -> impl Iterator<Item = &str> {
        self.msgs.iter().filter_map(|m| m.tag.as_deref()).filter(|t| !t.is_empty())
    }

    /// True if the bundle requests no publishes at all.
    pub fn publishes_nothing(&self) -> bool {
        self.settlement.is_none()
            && self.register.is_none()
            && self.async_pay.is_none()
            && self.publishes.is_empty()
    }
}

/// Message type codes understood by the engine.
///
/// Only the types that influence engine behavior get a variant; everything
/// else is forwarded to the listener untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Plain chat message.
    Message = 0,
    /// Contact key exchange.
    ContactKey = 10,
    /// Contact key confirmation.
    ContactKeyConfirmation = 11,
    /// Someone joined a tribe.
    GroupJoin = 14,
    /// Message deletion.
    Delete = 17,
    /// Tribe admin approved a member.
    MemberApprove = 20,
    /// Contact key record replayed during restore.
    ContactKeyRecord = 33,
}

impl MessageType {
    /// Decode a raw type code.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Message),
            10 => Some(Self::ContactKey),
            11 => Some(Self::ContactKeyConfirmation),
            14 => Some(Self::GroupJoin),
            17 => Some(Self::Delete),
            20 => Some(Self::MemberApprove),
            33 => Some(Self::ContactKeyRecord),
            _ => None,
        }
    }

    /// Raw type code.
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// One decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Msg {
    /// Raw type code (see [`MessageType`]).
    pub msg_type: u8,
    /// Message content (still encrypted for media).
    pub content: Option<String>,
    /// Amount in millisatoshis.
    pub amount_msat: Option<u64>,
    /// Sender descriptor.
    pub sender: Option<String>,
    /// Message UUID.
    pub uuid: Option<String>,
    /// Server-assigned index.
    pub index: Option<String>,
    /// Payment tag.
    pub tag: Option<String>,
    /// Payment hash.
    pub payment_hash: Option<String>,
    /// Bolt11 invoice.
    pub invoice: Option<String>,
    /// Media token.
    pub media_token: Option<String>,
    /// Media key.
    pub media_key: Option<String>,
    /// Media MIME type.
    pub media_type: Option<String>,
    /// UUID this message replies to.
    pub reply_uuid: Option<String>,
    /// UUID of the thread root.
    pub thread_uuid: Option<String>,
    /// UUID of the message this one edits or deletes.
    pub original_uuid: Option<String>,
    /// Timestamp in milliseconds.
    pub date: Option<u64>,
    /// Recipient for outbound messages.
    pub sent_to: Option<String>,
    /// Whether we sent this message.
    pub from_me: bool,
}

impl Msg {
    /// Decoded type, if known.
    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_u8(self.msg_type)
    }

    /// Index as a number.
    pub fn index_value(&self) -> Option<u64> {
        self.index.as_deref().and_then(|i| i.parse().ok())
    }

    /// Joins and member approvals change tribe membership.
    pub fn affects_tribe_membership(&self) -> bool {
        matches!(self.kind(), Some(MessageType::GroupJoin | MessageType::MemberApprove))
    }

    /// Key exchanges, confirmations and key records change contacts.
    pub fn affects_contact_keys(&self) -> bool {
        matches!(
            self.kind(),
            Some(
                MessageType::ContactKey
                    | MessageType::ContactKeyConfirmation
                    | MessageType::ContactKeyRecord
            )
        )
    }

    /// Non-empty payment hash.
    pub fn payment_hash(&self) -> Option<&str> {
        self.payment_hash.as_deref().filter(|h| !h.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(msg_type: u8, index: &str) -> Msg {
        Msg { msg_type, index: Some(index.to_string()), ..Msg::default() }
    }

    #[test]
    fn message_type_roundtrip() {
        for ty in [
            MessageType::Message,
            MessageType::ContactKey,
            MessageType::ContactKeyConfirmation,
            MessageType::GroupJoin,
            MessageType::Delete,
            MessageType::MemberApprove,
            MessageType::ContactKeyRecord,
        ] {
            assert_eq!(MessageType::from_u8(ty.to_u8()), Some(ty));
        }
        assert_eq!(MessageType::from_u8(250), None);
    }

    #[test]
    fn partition_predicates() {
        assert!(msg(14, "1").affects_tribe_membership());
        assert!(msg(20, "1").affects_tribe_membership());
        assert!(!msg(0, "1").affects_tribe_membership());

        assert!(msg(10, "1").affects_contact_keys());
        assert!(msg(11, "1").affects_contact_keys());
        assert!(msg(33, "1").affects_contact_keys());
        assert!(!msg(14, "1").affects_contact_keys());
    }

    #[test]
    fn bundle_matches_index_and_tag() {
        let mut tagged = msg(0, "42");
        tagged.tag = Some("t-1".to_string());
        let bundle = EffectBundle { msgs: vec![msg(0, "7"), tagged], ..EffectBundle::default() };

        assert!(bundle.carries_index("42"));
        assert!(!bundle.carries_index("4"));
        assert!(bundle.carries_tag("t-1"));
        assert_eq!(bundle.message_tags().collect::<Vec<_>>(), vec!["t-1"]);
    }

    #[test]
    fn empty_payment_hash_is_absent() {
        let m = Msg { payment_hash: Some(String::new()), ..Msg::default() };
        assert_eq!(m.payment_hash(), None);
    }

    #[test]
    fn publish_debug_hides_payload() {
        let p = Publish::new("a/b", b"secret".to_vec());
        assert_eq!(format!("{p:?}"), "Publish { topic: \"a/b\", payload: \"<6 bytes>\" }");
    }
}
