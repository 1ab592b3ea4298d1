//! Consumer half of the bus: a `StreamConsumer` behind [`MessageSource`].
//!
//! Auto-commit is disabled. The consumer's position advances as messages are
//! handed out, and [`MessageSource::commit`] persists it for the group; the
//! consumer loop decides when that happens.

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Message};
use relay_core::source::{InboundMessage, MessageSource, SourceError};
use relay_core::topic::Topic;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Subscribed consumer for the entity topics.
///
/// # Example
///
/// ```no_run
/// use relay_redpanda::RedpandaSource;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let source = RedpandaSource::builder()
///     .brokers("localhost:9092")
///     .group_id("analytics-projections")
///     .auto_offset_reset("earliest")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaSource {
    consumer: StreamConsumer,
    topics: Vec<String>,
    closed: bool,
}

impl RedpandaSource {
    /// Create a new builder for configuring the source.
    #[must_use]
    pub fn builder() -> RedpandaSourceBuilder {
        RedpandaSourceBuilder::default()
    }

    /// Topics this source is subscribed to.
    #[must_use]
    pub fn topics(&self) -> &[String] {
        &self.topics
    }
}

fn to_inbound(message: &BorrowedMessage<'_>) -> InboundMessage {
    InboundMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
    }
}

fn classify(error: KafkaError) -> SourceError {
    match error {
        KafkaError::PartitionEOF(partition) => SourceError::PartitionEof {
            topic: "*".to_string(),
            partition,
        },
        KafkaError::MessageConsumption(
            code @ (RDKafkaErrorCode::UnknownTopicOrPartition | RDKafkaErrorCode::UnknownTopic),
        ) => SourceError::UnknownTopic(code.to_string()),
        other => SourceError::Broker(other.to_string()),
    }
}

/// Interval commits are fire-and-forget; the exit commit waits for the broker.
const fn commit_mode(on_exit: bool) -> CommitMode {
    if on_exit { CommitMode::Sync } else { CommitMode::Async }
}

fn settle_commit(result: KafkaResult<()>) -> Result<(), SourceError> {
    match result {
        // Nothing consumed since the last commit.
        Ok(()) | Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => Ok(()),
        Err(error) => Err(SourceError::Broker(format!("Offset commit failed: {error}"))),
    }
}

impl MessageSource for RedpandaSource {
    fn poll(
        &mut self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Option<Result<InboundMessage, SourceError>>> + Send + '_>>
    {
        Box::pin(async move {
            match tokio::time::timeout(timeout, self.consumer.recv()).await {
                Err(_elapsed) => None,
                Ok(Ok(message)) => {
                    let inbound = to_inbound(&message);
                    tracing::trace!(
                        topic = %inbound.topic,
                        partition = inbound.partition,
                        offset = inbound.offset,
                        "Message received"
                    );
                    Some(Ok(inbound))
                }
                Ok(Err(error)) => Some(Err(classify(error))),
            }
        })
    }

    fn commit(&mut self) -> Result<(), SourceError> {
        settle_commit(self.consumer.commit_consumer_state(commit_mode(false)))
    }

    fn commit_final(&mut self) -> Result<(), SourceError> {
        settle_commit(self.consumer.commit_consumer_state(commit_mode(true)))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.consumer.unsubscribe();
        self.closed = true;
        tracing::info!(topics = ?self.topics, "Consumer closed");
    }
}

/// Builder for configuring a [`RedpandaSource`].
#[derive(Debug, Default)]
pub struct RedpandaSourceBuilder {
    brokers: Option<String>,
    group_id: Option<String>,
    client_id: Option<String>,
    auto_offset_reset: Option<String>,
    topics: Option<Vec<String>>,
    session_timeout: Option<Duration>,
}

impl RedpandaSourceBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the consumer group.
    ///
    /// Default: `"projection-relay"`
    #[must_use]
    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
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

    /// Where a group without committed offsets starts: `"earliest"` or `"latest"`.
    ///
    /// Default: `"earliest"`
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Topics to subscribe to.
    ///
    /// Default: every entity topic.
    #[must_use]
    pub fn topics<I, T>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.topics = Some(topics.into_iter().map(Into::into).collect());
        self
    }

    /// Set the group session timeout.
    ///
    /// Default: 10 seconds
    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    fn client_config(&self, brokers: &str) -> ClientConfig {
        let session_ms = self
            .session_timeout
            .unwrap_or(Duration::from_secs(10))
            .as_millis()
            .to_string();

        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", brokers)
            .set("group.id", self.group_id.as_deref().unwrap_or("projection-relay"))
            .set("client.id", self.client_id.as_deref().unwrap_or("projection-relay"))
            .set("auto.offset.reset", self.auto_offset_reset.as_deref().unwrap_or("earliest"))
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", session_ms);
        config
    }

    /// Create the consumer and subscribe.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Broker`] if no brokers are set, the topic list
    /// is empty, or the client rejects the configuration or subscription.
    pub fn build(self) -> Result<RedpandaSource, SourceError> {
        let brokers = self
            .brokers
            .clone()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| SourceError::Broker("Brokers not configured".to_string()))?;

        let topics = self.topics.clone().unwrap_or_else(Topic::all_names);
        if topics.is_empty() {
            return Err(SourceError::Broker("No topics to subscribe to".to_string()));
        }

        let consumer: StreamConsumer = self
            .client_config(&brokers)
            .create()
            .map_err(|e| SourceError::Broker(format!("Failed to create consumer: {e}")))?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| SourceError::Broker(format!("Failed to subscribe to topics: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            group_id = self.group_id.as_deref().unwrap_or("projection-relay"),
            topics = ?topics,
            auto_offset_reset = self.auto_offset_reset.as_deref().unwrap_or("earliest"),
            manual_commit = true,
            "Subscribed to topics"
        );

        Ok(RedpandaSource {
            consumer,
            topics,
            closed: false,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn source_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<RedpandaSource>();
    }

    #[test]
    fn offsets_are_never_auto_committed() {
        let config = RedpandaSource::builder().client_config("localhost:9092");
        assert_eq!(config.get("enable.auto.commit"), Some("false"));
        assert_eq!(config.get("group.id"), Some("projection-relay"));
        assert_eq!(config.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(config.get("session.timeout.ms"), Some("10000"));
    }

    #[test]
    fn builder_settings_reach_the_client() {
        let config = RedpandaSource::builder()
            .group_id("analytics")
            .client_id("relay-1")
            .auto_offset_reset("latest")
            .client_config("b:9092");
        assert_eq!(config.get("group.id"), Some("analytics"));
        assert_eq!(config.get("client.id"), Some("relay-1"));
        assert_eq!(config.get("auto.offset.reset"), Some("latest"));
    }

    #[test]
    fn kafka_errors_map_to_source_errors() {
        assert!(classify(KafkaError::PartitionEOF(3)).is_benign());
        assert!(
            classify(KafkaError::MessageConsumption(
                RDKafkaErrorCode::UnknownTopicOrPartition
            ))
            .is_benign()
        );
        assert!(matches!(
            classify(KafkaError::MessageConsumption(RDKafkaErrorCode::BrokerTransportFailure)),
            SourceError::Broker(_)
        ));
    }

    #[test]
    fn only_the_exit_commit_blocks() {
        assert!(matches!(commit_mode(false), CommitMode::Async));
        assert!(matches!(commit_mode(true), CommitMode::Sync));
    }

    #[test]
    fn commits_with_nothing_new_are_not_failures() {
        assert_eq!(settle_commit(Ok(())), Ok(()));
        assert_eq!(
            settle_commit(Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset))),
            Ok(())
        );
        assert!(matches!(
            settle_commit(Err(KafkaError::ConsumerCommit(
                RDKafkaErrorCode::RebalanceInProgress
            ))),
            Err(SourceError::Broker(_))
        ));
    }

    #[test]
    fn empty_topic_list_is_rejected() {
        let err = RedpandaSource::builder()
            .brokers("localhost:9092")
            .topics(Vec::<String>::new())
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::Broker(_)));
    }
}
