//! Parsers for the structured strings carried inside an effect bundle.
//!
//! Every parser returns [`ParseError`] instead of panicking; the dispatcher
//! logs and reports malformed payloads and moves on to the next field.

use serde::{Deserialize, Deserializer};

use crate::{constants::STATUS_COMPLETE, error::ParseError};

/// Settlement outcome: `{"htlc_id": "42", "status": "COMPLETE"}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SettledStatus {
    /// HTLC identifier; matches a parked message `index`.
    #[serde(deserialize_with = "string_or_number")]
    pub htlc_id: String,
    /// Settlement status.
    pub status: String,
}

impl SettledStatus {
    /// Parse the `settled_status` field.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        serde_json::from_str(raw)
            .map_err(|e| ParseError::Json { field: "settled_status", reason: e.to_string() })
    }

    /// Whether the settlement completed.
    pub fn is_complete(&self) -> bool {
        self.status == STATUS_COMPLETE
    }
}

/// Outbound payment outcome.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct SentStatus {
    /// Tag of the payment.
    #[serde(default)]
    pub tag: String,
    /// Payment status.
    #[serde(default)]
    pub status: String,
    /// Payment preimage, when complete.
    #[serde(default)]
    pub preimage: Option<String>,
    /// Payment hash.
    #[serde(default)]
    pub payment_hash: Option<String>,
    /// Failure description.
    #[serde(default)]
    pub message: Option<String>,
}

impl SentStatus {
    /// Parse the `sent_status` field.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        serde_json::from_str(raw)
            .map_err(|e| ParseError::Json { field: "sent_status", reason: e.to_string() })
    }

    /// Whether the payment completed.
    pub fn is_complete(&self) -> bool {
        self.status == STATUS_COMPLETE
    }
}

/// Aggregate counts used to size a restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct MsgsCounts {
    /// Total number of messages.
    #[serde(default)]
    pub total: Option<u64>,
    /// Number of contact-key messages.
    #[serde(default)]
    pub ok_key: Option<u64>,
    /// Number of first-messages-per-key (one per contact).
    #[serde(default)]
    pub first_for_each_scid: Option<u64>,
    /// Highest message index.
    #[serde(default)]
    pub total_highest_index: Option<u64>,
    /// Highest contact-key index.
    #[serde(default)]
    pub ok_key_highest_index: Option<u64>,
    /// Highest first-message-per-key index.
    #[serde(default)]
    pub first_for_each_scid_highest_index: Option<u64>,
}

impl MsgsCounts {
    /// Parse the `msgs_counts` field.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        serde_json::from_str(raw)
            .map_err(|e| ParseError::Json { field: "msgs_counts", reason: e.to_string() })
    }

    /// Highest contact-record index the contacts phase must reach.
    pub fn contacts_total(&self) -> u64 {
        self.first_for_each_scid_highest_index.or(self.first_for_each_scid).unwrap_or(0)
    }

    /// Number of messages the messages phase must restore.
    pub fn messages_total(&self) -> u64 {
        self.total.unwrap_or(0)
    }

    /// Index the reverse message backfill starts from.
    pub fn newest_index(&self) -> u64 {
        self.total_highest_index.or(self.total).unwrap_or(0)
    }
}

/// A `pubkey_routehint` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactInfo {
    /// Node public key.
    pub pubkey: String,
    /// Route hint (`lsp_scid`), if any.
    pub route_hint: Option<String>,
}

impl ContactInfo {
    /// Parse our own contact info, splitting on the first `_`.
    pub fn parse_own(raw: &str) -> Result<Self, ParseError> {
        let (pubkey, hint) = match raw.split_once('_') {
            Some((pubkey, hint)) => (pubkey, Some(hint)),
            None => (raw, None),
        };
        Self::build("my_contact_info", pubkey, hint.map(str::to_string))
    }

    /// Parse an inviter's contact info.
    ///
    /// The first `_`-separated part is the pubkey; the remaining parts form
    /// the route hint.
    pub fn parse_inviter(raw: &str) -> Result<Self, ParseError> {
        let mut parts = raw.split('_');
        let pubkey = parts.next().unwrap_or_default();
        let rest: Vec<&str> = parts.collect();
        let hint = if rest.is_empty() { None } else { Some(rest.join("_")) };
        Self::build("inviter_contact_info", pubkey, hint)
    }

    fn build(
        field: &'static str,
        pubkey: &str,
        route_hint: Option<String>,
    ) -> Result<Self, ParseError> {
        if pubkey.is_empty() {
            return Err(ParseError::Format { field, reason: "empty pubkey".to_string() });
        }
        Ok(Self { pubkey: pubkey.to_string(), route_hint: route_hint.filter(|h| !h.is_empty()) })
    }
}

/// An outbound liveness ping: `"<payment_hash>:<timestamp>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ping {
    /// Payment hash identifying the round trip.
    pub payment_hash: String,
    /// Timestamp shared by every key of the round trip.
    pub timestamp: u64,
}

impl Ping {
    /// Parse the `ping` field.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let (hash, ts) = raw.rsplit_once(':').ok_or_else(|| ParseError::Format {
            field: "ping",
            reason: "missing ':' separator".to_string(),
        })?;
        if hash.is_empty() {
            return Err(ParseError::Format { field: "ping", reason: "empty hash".to_string() });
        }
        let timestamp = ts
            .parse()
            .map_err(|e| ParseError::Format { field: "ping", reason: format!("timestamp: {e}") })?;
        Ok(Self { payment_hash: hash.to_string(), timestamp })
    }
}

/// A topic carrying paginated backfill responses.
pub fn is_batch_topic(topic: &str) -> bool {
    topic.split('/').any(|segment| segment == "batch")
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}
