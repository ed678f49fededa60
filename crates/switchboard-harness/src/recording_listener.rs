//! Listener that records everything it is told.

use async_trait::async_trait;
use parking_lot::Mutex;
use switchboard_client::{ClientError, ConnectionStatus, EngineEvent, Listener};
use switchboard_core::Msg;

/// One listener callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// `notify`.
    Event(EngineEvent),
    /// `upsert_tribes`.
    Tribes(Vec<Msg>),
    /// `upsert_contacts`.
    Contacts(Vec<Msg>),
    /// `deliver_message`.
    Delivered(Msg),
}

/// Records every callback in arrival order.
#[derive(Default)]
pub struct RecordingListener {
    records: Mutex<Vec<Record>>,
}

impl RecordingListener {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every callback so far.
    pub fn records(&self) -> Vec<Record> {
        self.records.lock().clone()
    }

    /// Every event so far.
    pub fn events(&self) -> Vec<EngineEvent> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| match r {
                Record::Event(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    /// Events matching `predicate`.
    pub fn events_where(&self, predicate: impl Fn(&EngineEvent) -> bool) -> Vec<EngineEvent> {
        self.events().into_iter().filter(|e| predicate(e)).collect()
    }

    /// Reported errors.
    pub fn errors(&self) -> Vec<ClientError> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::Error(err) => Some(err),
                _ => None,
            })
            .collect()
    }

    /// Connection status changes.
    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::Connection(status) => Some(status),
                _ => None,
            })
            .collect()
    }

    /// Indices of delivered messages, in delivery order.
    pub fn delivered_indices(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| match r {
                Record::Delivered(msg) => msg.index.clone(),
                _ => None,
            })
            .collect()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

#[async_trait]
impl Listener for RecordingListener {
    fn notify(&self, event: EngineEvent) {
        self.records.lock().push(Record::Event(event));
    }

    async fn upsert_tribes(&self, msgs: &[Msg]) {
        self.records.lock().push(Record::Tribes(msgs.to_vec()));
    }

    async fn upsert_contacts(&self, msgs: &[Msg]) {
        self.records.lock().push(Record::Contacts(msgs.to_vec()));
    }

    async fn deliver_message(&self, msg: &Msg) {
        self.records.lock().push(Record::Delivered(msg.clone()));
    }
}
