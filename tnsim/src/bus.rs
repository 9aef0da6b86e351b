use std::collections::VecDeque;
use tns_core::{
    models::{SignalPayload, parse_topic},
    ports::SignalTransport,
};
use tracing::{Level, event};

/// Errors raised by the in-memory bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Error when a topic does not name a sender and a receiver
    #[error("malformed topic {0:?}")]
    MalformedTopic(String),
}

/// A reliable, ordered, in-process signal bus.
///
/// Signals queue up until the simulation drains and delivers them.
#[derive(Debug, Default)]
pub struct MemoryBus {
    queue: VecDeque<(String, SignalPayload)>,
    sent: usize,
}

impl MemoryBus {
    /// An empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of signals waiting for delivery
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is waiting for delivery
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// The number of signals ever sent over the bus
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Take every waiting signal, in the order they were sent
    pub fn drain(&mut self) -> impl Iterator<Item = (String, SignalPayload)> + '_ {
        self.queue.drain(..)
    }
}

impl SignalTransport for MemoryBus {
    type Error = BusError;

    fn send(&mut self, topic: &str, payload: SignalPayload) -> Result<(), Self::Error> {
        if parse_topic(topic).is_none() {
            return Err(BusError::MalformedTopic(topic.to_owned()));
        }
        event!(
            Level::DEBUG,
            topic,
            records = payload.curves.len(),
            "queued signal"
        );
        self.queue.push_back((topic.to_owned(), payload));
        self.sent += 1;
        Ok(())
    }
}
