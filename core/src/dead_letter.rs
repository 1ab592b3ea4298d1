//! Quarantine for messages that could not be projected.
//!
//! After retries are exhausted (or on a non-retryable failure) the consumer
//! hands the raw message to a [`DeadLetterSink`] and moves on, so one poison
//! message never blocks its partition.

use crate::envelope::Envelope;
use crate::source::InboundMessage;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

/// Failure to record a dead letter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Dead letter write failed: {0}")]
pub struct DeadLetterError(pub String);

/// A message that failed projection, with everything needed to replay it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    /// Source topic.
    pub topic: String,
    /// Source partition.
    pub partition: i32,
    /// Source offset.
    pub offset: i64,
    /// Message key, if any.
    pub key: Option<String>,
    /// Raw payload as received.
    pub payload: Vec<u8>,
    /// Envelope id, when the payload decoded.
    pub event_id: Option<Uuid>,
    /// Envelope event type, when the payload decoded.
    pub event_type: Option<String>,
    /// Envelope entity id, when the payload decoded.
    pub entity_id: Option<String>,
    /// Last error message.
    pub error: String,
    /// Retries made after the first attempt.
    pub retry_count: u32,
}

impl DeadLetter {
    /// Build a dead letter for a decoded envelope.
    #[must_use]
    pub fn new(
        message: &InboundMessage,
        envelope: &Envelope,
        error: impl Into<String>,
        retry_count: u32,
    ) -> Self {
        Self {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            key: message.key_str(),
            payload: message.payload.clone(),
            event_id: Some(envelope.event_id),
            event_type: Some(envelope.event_type.clone()),
            entity_id: Some(envelope.entity_id.clone()),
            error: error.into(),
            retry_count,
        }
    }
}

/// Durable destination for dead letters.
pub trait DeadLetterSink: Send + Sync {
    /// Persist one dead letter.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError`] if the letter could not be stored; the
    /// caller then decides whether to halt.
    fn record(
        &self,
        letter: DeadLetter,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeadLetterError>> + Send + '_>>;
}
