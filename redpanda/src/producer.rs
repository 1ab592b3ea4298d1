//! Fire-and-forget producer backed by rdkafka's `ThreadedProducer`.
//!
//! `publish` only enqueues; a background thread owned by the producer sends
//! batches and invokes [`DeliveryLogger`] once per message with the broker's
//! verdict. Nothing is retried here: the caller learns about undelivered
//! messages from [`EventBus::flush`].

use metrics::counter;
use rdkafka::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer};
use rdkafka::util::Timeout;
use relay_core::event_bus::{EventBus, EventBusError};
use relay_core::topic::Topic;
use std::time::Duration;

/// Delivery-report callback: logs and counts each message's fate.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryLogger;

impl ClientContext for DeliveryLogger {}

impl ProducerContext for DeliveryLogger {
    type DeliveryOpaque = ();

    fn delivery(&self, result: &DeliveryResult<'_>, _opaque: Self::DeliveryOpaque) {
        match result {
            Ok(message) => {
                tracing::debug!(
                    topic = message.topic(),
                    partition = message.partition(),
                    offset = message.offset(),
                    "Message delivered"
                );
                counter!("relay.producer.delivered", "topic" => message.topic().to_string())
                    .increment(1);
            }
            Err((error, message)) => {
                tracing::error!(
                    topic = message.topic(),
                    partition = message.partition(),
                    key = ?message.key().map(String::from_utf8_lossy),
                    error = %error,
                    "Message delivery failed"
                );
                counter!("relay.producer.failed", "topic" => message.topic().to_string())
                    .increment(1);
            }
        }
    }
}

/// Producer half of the bus.
///
/// Built once at startup and shared (inside an
/// [`EventProducer`](relay_core::EventProducer)) by every emitting call site.
///
/// # Example
///
/// ```no_run
/// use relay_redpanda::RedpandaProducer;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let producer = RedpandaProducer::builder()
///     .brokers("localhost:9092")
///     .client_id("catalog-service")
///     .acks("all")
///     .compression("lz4")
///     .message_timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaProducer {
    producer: ThreadedProducer<DeliveryLogger>,
    brokers: String,
}

impl RedpandaProducer {
    /// Producer with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the client cannot be created.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the producer.
    #[must_use]
    pub fn builder() -> RedpandaProducerBuilder {
        RedpandaProducerBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

impl EventBus for RedpandaProducer {
    fn publish(&self, topic: Topic, key: &str, payload: Vec<u8>) -> Result<(), EventBusError> {
        let record = BaseRecord::to(topic.as_str()).key(key).payload(payload.as_slice());

        self.producer.send(record).map_err(|(error, _record)| {
            let reason = match &error {
                KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull) => {
                    "local producer queue is full".to_string()
                }
                other => other.to_string(),
            };
            tracing::error!(topic = %topic, key = %key, error = %error, "Failed to enqueue message");
            EventBusError::PublishFailed {
                topic: topic.to_string(),
                reason,
            }
        })
    }

    fn flush(&self, timeout: Duration) -> usize {
        if let Err(error) = self.producer.flush(Timeout::After(timeout)) {
            tracing::warn!(error = %error, "Producer flush did not complete");
        }
        let remaining = self.producer.in_flight_count();
        usize::try_from(remaining).unwrap_or(0)
    }
}

/// Builder for configuring a [`RedpandaProducer`].
#[derive(Debug, Default)]
pub struct RedpandaProducerBuilder {
    brokers: Option<String>,
    client_id: Option<String>,
    acks: Option<String>,
    compression: Option<String>,
    message_timeout: Option<Duration>,
}

impl RedpandaProducerBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the client id reported to the broker.
    ///
    /// Default: `"projection-relay"`
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"all"`
    #[must_use]
    pub fn acks(mut self, acks: impl Into<String>) -> Self {
        self.acks = Some(acks.into());
        self
    }

    /// Set the compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"`, `"zstd"`.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Time the client may spend delivering one message before reporting failure.
    ///
    /// Default: 30 seconds
    #[must_use]
    pub const fn message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = Some(timeout);
        self
    }

    fn client_config(&self, brokers: &str) -> ClientConfig {
        let timeout_ms = self
            .message_timeout
            .unwrap_or(Duration::from_secs(30))
            .as_millis()
            .to_string();

        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", brokers)
            .set("client.id", self.client_id.as_deref().unwrap_or("projection-relay"))
            .set("acks", self.acks.as_deref().unwrap_or("all"))
            .set("compression.type", self.compression.as_deref().unwrap_or("none"))
            .set("message.timeout.ms", timeout_ms);
        config
    }

    /// Build the [`RedpandaProducer`].
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if no brokers are set or
    /// the client rejects the configuration.
    pub fn build(self) -> Result<RedpandaProducer, EventBusError> {
        let brokers = self
            .brokers
            .clone()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| EventBusError::ConnectionFailed("Brokers not configured".to_string()))?;

        let producer: ThreadedProducer<DeliveryLogger> = self
            .client_config(&brokers)
            .create_with_context(DeliveryLogger)
            .map_err(|e| {
                EventBusError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        tracing::info!(
            brokers = %brokers,
            client_id = self.client_id.as_deref().unwrap_or("projection-relay"),
            acks = self.acks.as_deref().unwrap_or("all"),
            compression = self.compression.as_deref().unwrap_or("none"),
            "Redpanda producer created"
        );

        Ok(RedpandaProducer { producer, brokers })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn producer_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RedpandaProducer>();
    }

    #[test]
    fn defaults_wait_for_all_replicas() {
        let config = RedpandaProducer::builder().client_config("localhost:9092");
        assert_eq!(config.get("bootstrap.servers"), Some("localhost:9092"));
        assert_eq!(config.get("client.id"), Some("projection-relay"));
        assert_eq!(config.get("acks"), Some("all"));
        assert_eq!(config.get("compression.type"), Some("none"));
        assert_eq!(config.get("message.timeout.ms"), Some("30000"));
    }

    #[test]
    fn builder_settings_reach_the_client() {
        let config = RedpandaProducer::builder()
            .client_id("catalog")
            .acks("1")
            .compression("zstd")
            .message_timeout(Duration::from_millis(1500))
            .client_config("b1:9092,b2:9092");
        assert_eq!(config.get("client.id"), Some("catalog"));
        assert_eq!(config.get("acks"), Some("1"));
        assert_eq!(config.get("compression.type"), Some("zstd"));
        assert_eq!(config.get("message.timeout.ms"), Some("1500"));
    }

    #[test]
    fn missing_brokers_is_a_connection_error() {
        let err = RedpandaProducer::builder().brokers("  ").build().err().unwrap();
        assert!(matches!(err, EventBusError::ConnectionFailed(_)));
    }
}
