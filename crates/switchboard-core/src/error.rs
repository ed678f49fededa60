//! Parse error types.

use thiserror::Error;

/// Errors from decoding payloads embedded in an effect bundle or from the
/// user-state codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// JSON payload could not be decoded.
    #[error("invalid json in {field}: {reason}")]
    Json {
        /// Bundle field the payload came from.
        field: &'static str,
        /// Decoder message.
        reason: String,
    },

    /// Base64 text could not be decoded.
    #[error("invalid base64 in {field}: {reason}")]
    Base64 {
        /// Where the text came from.
        field: &'static str,
        /// Decoder message.
        reason: String,
    },

    /// CBOR payload could not be encoded or decoded.
    #[error("invalid cbor in {field}: {reason}")]
    Cbor {
        /// Where the bytes came from.
        field: &'static str,
        /// Codec message.
        reason: String,
    },

    /// A structured string did not have the expected shape.
    #[error("malformed {field}: {reason}")]
    Format {
        /// Bundle field the value came from.
        field: &'static str,
        /// What was wrong.
        reason: String,
    },
}

impl ParseError {
    /// Name of the payload field that failed to parse.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Json { field, .. }
            | Self::Base64 { field, .. }
            | Self::Cbor { field, .. }
            | Self::Format { field, .. } => field,
        }
    }
}
