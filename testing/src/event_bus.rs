//! In-memory event bus.

use relay_core::envelope::Envelope;
use relay_core::event_bus::{EventBus, EventBusError};
use relay_core::topic::Topic;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A message captured by [`InMemoryEventBus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Destination topic
    pub topic: Topic,
    /// Partition key
    pub key: String,
    /// Raw payload
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    /// Decode the payload as an envelope.
    ///
    /// # Panics
    ///
    /// Panics if the payload is not an envelope.
    #[must_use]
    pub fn envelope(&self) -> Envelope {
        Envelope::from_slice(&self.payload).unwrap()
    }
}

/// Event bus that keeps every published message in memory.
///
/// # Example
///
/// ```
/// use relay_core::{EventProducer, EventType, Topic};
/// use relay_testing::InMemoryEventBus;
/// use std::sync::Arc;
///
/// let bus = Arc::new(InMemoryEventBus::new());
/// let producer = EventProducer::new(Arc::clone(&bus));
/// producer.emit(EventType::UserCreated, "u1", serde_json::json!({})).unwrap();
///
/// assert_eq!(bus.published()[0].topic, Topic::User);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryEventBus {
    published: Mutex<Vec<PublishedMessage>>,
    undelivered: AtomicUsize,
    reject: AtomicBool,
}

impl InMemoryEventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap in an `Arc`, the way producers share it.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Report `count` messages as unacknowledged on every flush.
    pub fn set_undelivered(&self, count: usize) {
        self.undelivered.store(count, Ordering::SeqCst);
    }

    /// Make every subsequent publish fail.
    pub fn reject_publishes(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    /// Messages published so far, in order.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().unwrap().clone()
    }

    /// Messages published to one topic.
    #[must_use]
    pub fn published_to(&self, topic: Topic) -> Vec<PublishedMessage> {
        self.published()
            .into_iter()
            .filter(|m| m.topic == topic)
            .collect()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(&self, topic: Topic, key: &str, payload: Vec<u8>) -> Result<(), EventBusError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(EventBusError::PublishFailed {
                topic: topic.to_string(),
                reason: "rejected by test bus".to_string(),
            });
        }
        self.published.lock().unwrap().push(PublishedMessage {
            topic,
            key: key.to_string(),
            payload,
        });
        Ok(())
    }

    fn flush(&self, _timeout: Duration) -> usize {
        self.undelivered.load(Ordering::SeqCst)
    }
}
