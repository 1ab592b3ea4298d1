//! Producer side of the relay.
//!
//! The primary-store services call [`EventProducer::emit`] after each committed
//! mutation. The producer wraps the change in an [`Envelope`], derives the topic
//! from the event type prefix, and hands it to the [`EventBus`] keyed by
//! `entity_id`, so every change to one entity lands on the same partition and
//! keeps its order.
//!
//! ```text
//! service ──emit()──▶ EventProducer ──publish(topic, entity_id, json)──▶ bus
//!                                                         │
//!                                  delivery callback ◀────┘ (logged, never retried)
//! ```
//!
//! Publishing is fire-and-forget: `emit` returns once the message is queued.
//! Delivery failures are reported asynchronously by the bus implementation and
//! surface to callers only through [`EventProducer::flush`], which fails with
//! [`EventBusError::Undelivered`] when messages are still outstanding.
//!
//! There is no outbox. A crash between the primary-store commit and `emit`
//! loses that notification.

use crate::envelope::Envelope;
use crate::topic::Topic;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while publishing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    /// The event type has no recognizable entity prefix.
    #[error("Invalid topic for event type '{0}'")]
    InvalidTopic(String),

    /// The envelope could not be encoded.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// The bus refused to enqueue the message.
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Messages were still unacknowledged when a flush timed out.
    #[error("{remaining} message(s) not delivered before flush timeout")]
    Undelivered {
        /// Number of messages still in flight
        remaining: usize,
    },

    /// The bus client could not be created.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}

/// A message bus that accepts keyed payloads.
///
/// Implementations must be `Send + Sync`; one instance is built at startup and
/// shared by every producing service.
pub trait EventBus: Send + Sync {
    /// Enqueue one message. Returns as soon as the message is buffered.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the message cannot be queued
    /// (full local queue, oversized message, closed client).
    fn publish(&self, topic: Topic, key: &str, payload: Vec<u8>) -> Result<(), EventBusError>;

    /// Block until outstanding messages are acknowledged or `timeout` elapses.
    ///
    /// Returns the number of messages still unacknowledged.
    fn flush(&self, timeout: Duration) -> usize;
}

impl<B: EventBus + ?Sized> EventBus for Arc<B> {
    fn publish(&self, topic: Topic, key: &str, payload: Vec<u8>) -> Result<(), EventBusError> {
        (**self).publish(topic, key, payload)
    }

    fn flush(&self, timeout: Duration) -> usize {
        (**self).flush(timeout)
    }
}

/// Shared, injectable event producer.
///
/// Cloning is cheap; clones share the underlying bus client.
#[derive(Debug)]
pub struct EventProducer<B: ?Sized> {
    bus: Arc<B>,
}

impl<B: ?Sized> Clone for EventProducer<B> {
    fn clone(&self) -> Self {
        Self {
            bus: Arc::clone(&self.bus),
        }
    }
}

impl<B: EventBus + ?Sized> EventProducer<B> {
    /// Wrap a shared bus client.
    #[must_use]
    pub const fn new(bus: Arc<B>) -> Self {
        Self { bus }
    }

    /// Package a state change and queue it for publication.
    ///
    /// `event_type` may be any `"<entity>.<action>"` string; only the entity
    /// prefix has to be known.
    ///
    /// # Errors
    ///
    /// - [`EventBusError::InvalidTopic`] if the prefix names no known topic
    /// - [`EventBusError::Serialization`] if the envelope cannot be encoded
    /// - [`EventBusError::PublishFailed`] if the bus refuses the message
    pub fn emit(
        &self,
        event_type: impl AsRef<str>,
        entity_id: &str,
        data: Value,
    ) -> Result<Envelope, EventBusError> {
        let event_type = event_type.as_ref();
        let topic = Topic::for_event_type(event_type)
            .ok_or_else(|| EventBusError::InvalidTopic(event_type.to_string()))?;

        let envelope = Envelope::new(event_type, entity_id, data);
        let payload = envelope
            .to_bytes()
            .map_err(|e| EventBusError::Serialization(e.to_string()))?;

        self.bus.publish(topic, entity_id, payload).inspect_err(|error| {
            tracing::error!(
                event_type = %event_type,
                entity_id = %entity_id,
                topic = %topic,
                error = %error,
                "Failed to enqueue event"
            );
        })?;

        tracing::debug!(
            event_id = %envelope.event_id,
            event_type = %event_type,
            entity_id = %entity_id,
            topic = %topic,
            "Event queued"
        );
        Ok(envelope)
    }

    /// Wait for outstanding deliveries.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::Undelivered`] with the remaining count if any
    /// message is still unacknowledged after `timeout`.
    pub fn flush(&self, timeout: Duration) -> Result<(), EventBusError> {
        match self.bus.flush(timeout) {
            0 => Ok(()),
            remaining => {
                tracing::warn!(remaining, timeout_ms = timeout.as_millis(), "Flush left messages undelivered");
                Err(EventBusError::Undelivered { remaining })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::topic::EventType;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Capture {
        sent: Mutex<Vec<(Topic, String, Vec<u8>)>>,
        stuck: usize,
    }

    impl EventBus for Capture {
        fn publish(&self, topic: Topic, key: &str, payload: Vec<u8>) -> Result<(), EventBusError> {
            self.sent.lock().unwrap().push((topic, key.to_string(), payload));
            Ok(())
        }

        fn flush(&self, _timeout: Duration) -> usize {
            self.stuck
        }
    }

    #[test]
    fn emit_routes_by_prefix_and_keys_by_entity() {
        let bus = Arc::new(Capture::default());
        let producer = EventProducer::new(Arc::clone(&bus));

        let envelope = producer
            .emit(EventType::ProductPublished, "p-42", json!({"status": "published"}))
            .unwrap();

        let sent = bus.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (topic, key, payload) = &sent[0];
        assert_eq!(*topic, Topic::Product);
        assert_eq!(key, "p-42");
        let decoded = Envelope::from_slice(payload).unwrap();
        assert_eq!(decoded.event_id, envelope.event_id);
        assert_eq!(decoded.event_type, "product.published");
        assert_eq!(decoded.entity_id, "p-42");
        assert_eq!(decoded.data, json!({"status": "published"}));
    }

    #[test]
    fn new_actions_on_known_entities_are_publishable() {
        let bus = Arc::new(Capture::default());
        let producer = EventProducer::new(Arc::clone(&bus));
        producer.emit("order.refunded", "o1", json!({})).unwrap();
        assert_eq!(bus.sent.lock().unwrap()[0].0, Topic::Order);
    }

    #[test]
    fn unknown_entity_is_an_invalid_topic() {
        let producer = EventProducer::new(Arc::new(Capture::default()));
        assert_eq!(
            producer.emit("invoice.created", "i1", json!({})).unwrap_err(),
            EventBusError::InvalidTopic("invoice.created".to_string())
        );
    }

    #[test]
    fn flush_surfaces_the_remainder() {
        let ok = EventProducer::new(Arc::new(Capture::default()));
        assert!(ok.flush(Duration::from_millis(10)).is_ok());

        let stuck = EventProducer::new(Arc::new(Capture {
            stuck: 3,
            ..Capture::default()
        }));
        assert_eq!(
            stuck.flush(Duration::from_millis(10)),
            Err(EventBusError::Undelivered { remaining: 3 })
        );
    }
}
