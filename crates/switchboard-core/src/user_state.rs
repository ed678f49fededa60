//! Owner user-state codec.
//!
//! The owner's protocol state is a map of key to opaque bytes. It lives in
//! three encodings:
//!
//! - Stored form: base64 of a JSON object `{key: base64(bytes)}`, the opaque
//!   string the persistence layer keeps on the owner record.
//! - Core form: CBOR `map<text, bytes>`, handed to every crypto-core call.
//! - Delta form: CBOR `map<text, bytes>` returned by the core with the
//!   entries to upsert; deletions arrive as a plain key list.
//!
//! # Invariants
//!
//! - Round-trip: `from_stored(to_stored(s)) == s`, byte-exact per key
//! - Deleted keys are absent after the deletion is applied

use std::collections::BTreeMap;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use ciborium::Value;

use crate::error::ParseError;

/// Decoded owner user state.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct UserState {
    entries: BTreeMap<String, Vec<u8>>,
}

impl std::fmt::Debug for UserState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Values are key material; only show their shape.
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (k, format!("<{} bytes>", v.len()))))
            .finish()
    }
}

impl UserState {
    /// Empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the stored form. An empty string is an empty state.
    pub fn from_stored(stored: &str) -> Result<Self, ParseError> {
        if stored.trim().is_empty() {
            return Ok(Self::new());
        }

        let json = STANDARD
            .decode(stored.trim())
            .map_err(|e| ParseError::Base64 { field: "user_state", reason: e.to_string() })?;
        let encoded: BTreeMap<String, String> = serde_json::from_slice(&json)
            .map_err(|e| ParseError::Json { field: "user_state", reason: e.to_string() })?;

        let mut entries = BTreeMap::new();
        for (key, value) in encoded {
            let bytes = STANDARD.decode(value).map_err(|e| ParseError::Base64 {
                field: "user_state",
                reason: format!("{key}: {e}"),
            })?;
            entries.insert(key, bytes);
        }

        Ok(Self { entries })
    }

    /// Encode into the stored form.
    pub fn to_stored(&self) -> Result<String, ParseError> {
        let encoded: BTreeMap<&str, String> =
            self.entries.iter().map(|(k, v)| (k.as_str(), STANDARD.encode(v))).collect();
        let json = serde_json::to_vec(&encoded)
            .map_err(|e| ParseError::Json { field: "user_state", reason: e.to_string() })?;
        Ok(STANDARD.encode(json))
    }

    /// Encode into the form the crypto core consumes.
    pub fn to_core_bytes(&self) -> Result<Vec<u8>, ParseError> {
        encode_entries(&self.entries)
    }

    /// Merge a CBOR delta reported by the core. Returns the number of
    /// entries written.
    pub fn apply_delta(&mut self, delta: &[u8]) -> Result<usize, ParseError> {
        let entries = decode_entries(delta)?;
        let count = entries.len();
        self.entries.extend(entries);
        Ok(count)
    }

    /// Remove keys outright. Returns the number of keys that were present.
    pub fn remove_keys<S: AsRef<str>>(&mut self, keys: &[S]) -> usize {
        keys.iter().filter(|k| self.entries.remove(k.as_ref()).is_some()).count()
    }

    /// Upsert a single entry.
    pub fn insert(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.entries.insert(key.into(), value);
    }

    /// Value for `key`.
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the state has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Encode a delta the way the crypto core reports it.
pub fn encode_delta(entries: &BTreeMap<String, Vec<u8>>) -> Result<Vec<u8>, ParseError> {
    encode_entries(entries)
}

fn encode_entries(entries: &BTreeMap<String, Vec<u8>>) -> Result<Vec<u8>, ParseError> {
    let map = Value::Map(
        entries
            .iter()
            .map(|(k, v)| (Value::Text(k.clone()), Value::Bytes(v.clone())))
            .collect(),
    );

    let mut buf = Vec::new();
    ciborium::into_writer(&map, &mut buf)
        .map_err(|e| ParseError::Cbor { field: "user_state", reason: e.to_string() })?;
    Ok(buf)
}

fn decode_entries(bytes: &[u8]) -> Result<BTreeMap<String, Vec<u8>>, ParseError> {
    let value: Value = ciborium::from_reader(bytes)
        .map_err(|e| ParseError::Cbor { field: "state_delta", reason: e.to_string() })?;

    let Value::Map(pairs) = value else {
        return Err(ParseError::Cbor { field: "state_delta", reason: "not a map".to_string() });
    };

    let mut entries = BTreeMap::new();
    for (key, value) in pairs {
        match (key, value) {
            (Value::Text(k), Value::Bytes(v)) => {
                entries.insert(k, v);
            },
            (key, _) => {
                return Err(ParseError::Cbor {
                    field: "state_delta",
                    reason: format!("entry {key:?} is not text -> bytes"),
                });
            },
        }
    }

    Ok(entries)
}
