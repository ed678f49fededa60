//! Engine error types.

use switchboard_core::ParseError;
use thiserror::Error;

use crate::transport::TransportError;

/// Failure class, used to pick the reporting policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connect, publish or subscribe failed, or the connection dropped.
    Transport,
    /// A crypto-core call failed.
    Core,
    /// The crypto core reported a protocol-level error in a bundle.
    Protocol,
    /// A payload could not be parsed.
    Malformed,
    /// The operation is not valid in the current session state.
    Session,
}

/// Errors from engine operations.
///
/// `Clone` so the same value can be returned to the caller and delivered to
/// listeners.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// No live session.
    #[error("no active session")]
    NoSession,

    /// A session is already connected.
    #[error("session already connected")]
    AlreadyConnecting,

    /// Broker address could not be parsed.
    #[error("invalid broker address {address:?}: {reason}")]
    InvalidAddress {
        /// The address as given.
        address: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Connecting to the broker failed.
    #[error("connect failed: {reason}")]
    Connect {
        /// Description of the failure.
        reason: String,
    },

    /// An established broker connection dropped.
    #[error("connection lost: {reason}")]
    ConnectionLost {
        /// Description of the failure.
        reason: String,
    },

    /// Publishing failed.
    #[error("publish to {topic} failed: {reason}")]
    Publish {
        /// Target topic.
        topic: String,
        /// Description of the failure.
        reason: String,
    },

    /// Subscribing failed.
    #[error("subscribe failed: {reason}")]
    Subscribe {
        /// Description of the failure.
        reason: String,
    },

    /// A crypto-core operation failed.
    #[error("{operation} failed: {reason}")]
    Core {
        /// Name of the failed operation.
        operation: &'static str,
        /// Reason reported by the core.
        reason: String,
    },

    /// Seed, xpub or signature derivation failed.
    #[error("key derivation failed: {reason}")]
    KeyDerivation {
        /// Description of the failure.
        reason: String,
    },

    /// Protocol-level error carried in an effect bundle.
    #[error("protocol error: {message}")]
    Protocol {
        /// The error string as reported.
        message: String,
    },

    /// Malformed payload.
    #[error("malformed {field}: {reason}")]
    Malformed {
        /// Bundle field that failed to parse.
        field: &'static str,
        /// Description of the failure.
        reason: String,
    },
}

impl ClientError {
    /// Failure class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NoSession | Self::AlreadyConnecting | Self::InvalidAddress { .. } => {
                ErrorClass::Session
            },
            Self::Connect { .. }
            | Self::ConnectionLost { .. }
            | Self::Publish { .. }
            | Self::Subscribe { .. } => ErrorClass::Transport,
            Self::Core { .. } | Self::KeyDerivation { .. } => ErrorClass::Core,
            Self::Protocol { .. } => ErrorClass::Protocol,
            Self::Malformed { .. } => ErrorClass::Malformed,
        }
    }
}

impl From<ParseError> for ClientError {
    fn from(err: ParseError) -> Self {
        let field = err.field();
        let reason = match err {
            ParseError::Json { reason, .. }
            | ParseError::Base64 { reason, .. }
            | ParseError::Cbor { reason, .. }
            | ParseError::Format { reason, .. } => reason,
        };
        Self::Malformed { field, reason }
    }
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Connect { reason } => Self::Connect { reason },
            TransportError::Publish { topic, reason } => Self::Publish { topic, reason },
            TransportError::Subscribe { reason } => Self::Subscribe { reason },
            TransportError::NotConnected => Self::Connect { reason: "not connected".to_string() },
        }
    }
}
