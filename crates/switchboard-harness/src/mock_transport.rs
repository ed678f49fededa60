//! In-memory transport.
//!
//! Records every publish with its virtual timestamp, every subscription and
//! every connect attempt. Tests drive inbound traffic and connection state
//! through [`MockTransport::inject`].

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use switchboard_client::{ConnectOptions, Transport, TransportError, TransportEvent};
use tokio::{sync::mpsc::UnboundedSender, time::Instant};

/// A recorded publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    /// Topic.
    pub topic: String,
    /// Payload.
    pub payload: Vec<u8>,
    /// Virtual time of the publish.
    pub at: Instant,
}

#[derive(Default)]
struct State {
    publishes: Vec<Published>,
    subscriptions: Vec<String>,
    connects: Vec<ConnectOptions>,
    disconnects: usize,
    events: Option<UnboundedSender<TransportEvent>>,
    channels: Vec<UnboundedSender<TransportEvent>>,
    scripted_failures: VecDeque<String>,
    publish_failures: VecDeque<String>,
    subscribe_failures: VecDeque<String>,
    manual_connect: bool,
}

/// Transport that never leaves the process.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<State>,
}

impl MockTransport {
    /// Transport that acknowledges every connect immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next connect attempt with `reason` (queued, one per call).
    pub fn fail_next_connect(&self, reason: impl Into<String>) {
        self.state.lock().scripted_failures.push_back(reason.into());
    }

    /// Reject the next publish with `reason` (queued, one per call).
    pub fn fail_next_publish(&self, reason: impl Into<String>) {
        self.state.lock().publish_failures.push_back(reason.into());
    }

    /// Reject the next subscribe with `reason` (queued, one per call).
    pub fn fail_next_subscribe(&self, reason: impl Into<String>) {
        self.state.lock().subscribe_failures.push_back(reason.into());
    }

    /// Stop acknowledging connects; tests send `Connected` themselves.
    pub fn set_manual_connect(&self, manual: bool) {
        self.state.lock().manual_connect = manual;
    }

    /// Send an event on the latest connection's channel.
    ///
    /// Returns `false` if no connection was ever attempted or the engine
    /// dropped the channel.
    pub fn inject(&self, event: TransportEvent) -> bool {
        let sender = self.state.lock().events.clone();
        sender.is_some_and(|tx| tx.send(event).is_ok())
    }

    /// Send an event on the channel of connect attempt `attempt` (0-based),
    /// even if a later attempt superseded it.
    pub fn inject_into(&self, attempt: usize, event: TransportEvent) -> bool {
        let sender = self.state.lock().channels.get(attempt).cloned();
        sender.is_some_and(|tx| tx.send(event).is_ok())
    }

    /// Deliver an inbound payload on `topic`.
    pub fn deliver(&self, topic: &str, payload: &[u8]) -> bool {
        self.inject(TransportEvent::Message { topic: topic.to_string(), payload: payload.to_vec() })
    }

    /// Every publish so far, in order.
    pub fn publishes(&self) -> Vec<Published> {
        self.state.lock().publishes.clone()
    }

    /// Publishes to `topic`.
    pub fn published_to(&self, topic: &str) -> Vec<Published> {
        self.state.lock().publishes.iter().filter(|p| p.topic == topic).cloned().collect()
    }

    /// Topics published to, in order.
    pub fn published_topics(&self) -> Vec<String> {
        self.state.lock().publishes.iter().map(|p| p.topic.clone()).collect()
    }

    /// Every subscribed topic, in order.
    pub fn subscriptions(&self) -> Vec<String> {
        self.state.lock().subscriptions.clone()
    }

    /// Connect attempts so far.
    pub fn connect_count(&self) -> usize {
        self.state.lock().connects.len()
    }

    /// Options of the latest connect attempt.
    pub fn last_connect(&self) -> Option<ConnectOptions> {
        self.state.lock().connects.last().cloned()
    }

    /// Disconnect calls so far.
    pub fn disconnect_count(&self) -> usize {
        self.state.lock().disconnects
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        options: ConnectOptions,
        events: UnboundedSender<TransportEvent>,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        tracing::debug!(client_id = %options.client_id, "mock connect");
        state.connects.push(options);

        let event = match state.scripted_failures.pop_front() {
            Some(reason) => Some(TransportEvent::ConnectionFailed { reason }),
            None if state.manual_connect => None,
            None => Some(TransportEvent::Connected),
        };
        if let Some(event) = event {
            let _ = events.send(event);
        }
        state.channels.push(events.clone());
        state.events = Some(events);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.events.is_none() {
            return Err(TransportError::NotConnected);
        }
        if let Some(reason) = state.publish_failures.pop_front() {
            return Err(TransportError::Publish { topic: topic.to_string(), reason });
        }
        state.publishes.push(Published {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            at: Instant::now(),
        });
        Ok(())
    }

    async fn subscribe(&self, topics: &[String]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if let Some(reason) = state.subscribe_failures.pop_front() {
            return Err(TransportError::Subscribe { reason });
        }
        state.subscriptions.extend(topics.iter().cloned());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.disconnects += 1;
        state.events = None;
        Ok(())
    }
}
