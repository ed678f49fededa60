//! Transport boundary.
//!
//! One MQTT session per engine session. Topics and payloads are opaque; QoS 1
//! throughout. Asynchronous outcomes (connected, failed, lost, message) flow
//! back over the event channel handed to [`Transport::connect`].

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::BrokerEndpoint;

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection could not be established.
    #[error("connect failed: {reason}")]
    Connect {
        /// Description of the failure.
        reason: String,
    },
    /// Publish was rejected.
    #[error("publish to {topic} failed: {reason}")]
    Publish {
        /// Target topic.
        topic: String,
        /// Description of the failure.
        reason: String,
    },
    /// Subscribe was rejected.
    #[error("subscribe failed: {reason}")]
    Subscribe {
        /// Description of the failure.
        reason: String,
    },
    /// No connection is open.
    #[error("not connected")]
    NotConnected,
}

/// Asynchronous transport events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The broker accepted the connection.
    Connected,
    /// The connection could not be established.
    ConnectionFailed {
        /// Description of the failure.
        reason: String,
    },
    /// An established connection dropped.
    ConnectionLost {
        /// Description of the failure.
        reason: String,
    },
    /// A payload arrived.
    Message {
        /// Topic it arrived on.
        topic: String,
        /// Raw payload.
        payload: Vec<u8>,
    },
}

/// Broker connection parameters. `Debug` never prints the password.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Broker address.
    pub endpoint: BrokerEndpoint,
    /// MQTT client identifier.
    pub client_id: String,
    /// Broker username (the account xpub).
    pub username: String,
    /// Broker password (a timestamped signature).
    pub password: String,
    /// Keep-alive interval.
    pub keep_alive: Duration,
}

impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("endpoint", &self.endpoint)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}

/// Pub/sub transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection and start delivering events to `events`.
    ///
    /// Returning `Ok` means the attempt started; success is reported by
    /// [`TransportEvent::Connected`].
    async fn connect(
        &self,
        options: ConnectOptions,
        events: UnboundedSender<TransportEvent>,
    ) -> Result<(), TransportError>;

    /// Publish `payload` to `topic` at QoS 1.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Subscribe to `topics` at QoS 1.
    async fn subscribe(&self, topics: &[String]) -> Result<(), TransportError>;

    /// Close the connection.
    async fn disconnect(&self) -> Result<(), TransportError>;
}
