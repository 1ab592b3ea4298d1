//! Per-message dispatch: decode, route, apply with retry, dead-letter.

use crate::metrics;
use crate::registry::HandlerRegistry;
use crate::retry::{RetryPolicy, retry_with_predicate};
use relay_core::dead_letter::{DeadLetter, DeadLetterSink};
use relay_core::envelope::Envelope;
use relay_core::projection::{ApplyOutcome, Projection, ProjectionError};
use relay_core::source::InboundMessage;
use std::sync::Arc;

/// Why a message was skipped without reaching a projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The payload is not a readable envelope.
    Malformed,
    /// The event type is not part of the known enumeration.
    UnknownEventType,
    /// The event type is known but no projection is registered for it.
    NoHandler,
}

impl IgnoreReason {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::UnknownEventType => "unknown_event_type",
            Self::NoHandler => "no_handler",
        }
    }
}

/// What happened to one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A projection wrote the envelope.
    Applied,
    /// A projection accepted the envelope without writing (stale, or no target row).
    Skipped,
    /// The message never reached a projection.
    Ignored(IgnoreReason),
    /// The projection failed for good and the message is quarantined.
    DeadLettered {
        /// Retries spent before giving up
        retries: u32,
    },
    /// The projection failed and the quarantine write failed too.
    Failed {
        /// Both failures, for the log
        reason: String,
    },
}

impl DispatchOutcome {
    /// Whether the loop may commit past this message.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

/// Routes decoded envelopes to their projection.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    dead_letters: Arc<dyn DeadLetterSink>,
    retry: RetryPolicy,
}

impl Dispatcher {
    /// Create a dispatcher over `registry`, quarantining into `dead_letters`.
    #[must_use]
    pub fn new(registry: HandlerRegistry, dead_letters: Arc<dyn DeadLetterSink>) -> Self {
        Self {
            registry: Arc::new(registry),
            dead_letters,
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The dispatch table.
    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Process one message to a terminal outcome.
    ///
    /// Never returns an error: every failure mode is an outcome, and only
    /// [`DispatchOutcome::Failed`] asks the caller to intervene.
    pub async fn process(&self, message: &InboundMessage) -> DispatchOutcome {
        let envelope = match Envelope::from_slice(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "Skipping malformed message"
                );
                let outcome = DispatchOutcome::Ignored(IgnoreReason::Malformed);
                metrics::record_outcome(&outcome, None);
                return outcome;
            }
        };

        let Some(kind) = envelope.kind() else {
            tracing::debug!(
                event_type = %envelope.event_type,
                entity_id = %envelope.entity_id,
                "Skipping unknown event type"
            );
            let outcome = DispatchOutcome::Ignored(IgnoreReason::UnknownEventType);
            metrics::record_outcome(&outcome, None);
            return outcome;
        };

        let Some(handler) = self.registry.get(kind) else {
            tracing::debug!(event_type = %kind, "No projection registered for event type");
            let outcome = DispatchOutcome::Ignored(IgnoreReason::NoHandler);
            metrics::record_outcome(&outcome, None);
            return outcome;
        };

        let outcome = self.apply(handler.as_ref(), message, &envelope).await;
        metrics::record_outcome(&outcome, Some(handler.name()));
        outcome
    }

    async fn apply(
        &self,
        handler: &dyn Projection,
        message: &InboundMessage,
        envelope: &Envelope,
    ) -> DispatchOutcome {
        let (result, retries) = retry_with_predicate(
            &self.retry,
            move || handler.apply(envelope),
            ProjectionError::is_retryable,
        )
        .await;

        match result {
            Ok(ApplyOutcome::Applied) => DispatchOutcome::Applied,
            Ok(ApplyOutcome::Skipped) => {
                tracing::debug!(
                    projection = handler.name(),
                    event_type = %envelope.event_type,
                    entity_id = %envelope.entity_id,
                    "Envelope skipped as stale or targeting no row"
                );
                DispatchOutcome::Skipped
            }
            Err(error) => self.quarantine(handler, message, envelope, &error, retries).await,
        }
    }

    async fn quarantine(
        &self,
        handler: &dyn Projection,
        message: &InboundMessage,
        envelope: &Envelope,
        error: &ProjectionError,
        retries: u32,
    ) -> DispatchOutcome {
        tracing::error!(
            projection = handler.name(),
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            entity_id = %envelope.entity_id,
            error_kind = error.kind(),
            error = %error,
            retries,
            "Projection failed, routing to dead-letter queue"
        );

        let letter = DeadLetter::new(message, envelope, error.to_string(), retries);
        match self.dead_letters.record(letter).await {
            Ok(()) => DispatchOutcome::DeadLettered { retries },
            Err(dlq_error) => {
                tracing::error!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %dlq_error,
                    "Dead-letter write failed"
                );
                DispatchOutcome::Failed {
                    reason: format!("{error}; {dlq_error}"),
                }
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use relay_core::topic::EventType;
    use relay_testing::{InMemoryDeadLetters, RecordingProjection};
    use serde_json::json;
    use std::time::Duration;

    fn message(envelope: &Envelope) -> InboundMessage {
        InboundMessage {
            topic: "user".to_string(),
            partition: 3,
            offset: 42,
            key: Some(envelope.entity_id.as_bytes().to_vec()),
            payload: envelope.to_bytes().unwrap(),
        }
    }

    fn user_created() -> Envelope {
        Envelope::new(EventType::UserCreated, "u1", json!({"version": 1}))
    }

    fn dispatcher(
        projection: &RecordingProjection,
        dead_letters: &Arc<InMemoryDeadLetters>,
    ) -> Dispatcher {
        let registry =
            HandlerRegistry::from_projections([Arc::new(projection.clone()) as Arc<dyn Projection>])
                .unwrap();
        Dispatcher::new(registry, Arc::clone(dead_letters) as Arc<dyn DeadLetterSink>)
    }

    #[tokio::test(start_paused = true)]
    async fn applies_through_the_registered_projection() {
        let users = RecordingProjection::new("users", &[EventType::UserCreated]);
        let dlq = Arc::new(InMemoryDeadLetters::new());
        let envelope = user_created();

        let outcome = dispatcher(&users, &dlq).process(&message(&envelope)).await;

        assert_eq!(outcome, DispatchOutcome::Applied);
        assert_eq!(users.applied(), vec![envelope]);
        assert!(dlq.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_and_unknown_messages_are_ignored() {
        let users = RecordingProjection::new("users", &[EventType::UserCreated]);
        let dlq = Arc::new(InMemoryDeadLetters::new());
        let dispatcher = dispatcher(&users, &dlq);

        let garbage = InboundMessage {
            topic: "user".to_string(),
            partition: 0,
            offset: 0,
            key: None,
            payload: b"{not json".to_vec(),
        };
        assert_eq!(
            dispatcher.process(&garbage).await,
            DispatchOutcome::Ignored(IgnoreReason::Malformed)
        );

        let unknown = Envelope::new("user.teleported", "u1", json!({}));
        assert_eq!(
            dispatcher.process(&message(&unknown)).await,
            DispatchOutcome::Ignored(IgnoreReason::UnknownEventType)
        );

        let unhandled = Envelope::new(EventType::PostCreated, "p1", json!({}));
        assert_eq!(
            dispatcher.process(&message(&unhandled)).await,
            DispatchOutcome::Ignored(IgnoreReason::NoHandler)
        );

        assert_eq!(users.attempts(), 0);
        assert!(dlq.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_then_succeed() {
        let users = RecordingProjection::new("users", &[EventType::UserCreated])
            .fail_times(2, ProjectionError::Storage("connection reset".to_string()));
        let dlq = Arc::new(InMemoryDeadLetters::new());

        let outcome = dispatcher(&users, &dlq).process(&message(&user_created())).await;

        assert_eq!(outcome, DispatchOutcome::Applied);
        assert_eq!(users.attempts(), 3);
        assert!(dlq.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_dead_letter_the_raw_message() {
        let users = RecordingProjection::new("users", &[EventType::UserCreated])
            .always_fail(ProjectionError::Storage("database down".to_string()));
        let dlq = Arc::new(InMemoryDeadLetters::new());
        let envelope = user_created();
        let msg = message(&envelope);

        let started = tokio::time::Instant::now();
        let outcome = dispatcher(&users, &dlq)
            .with_retry_policy(RetryPolicy::builder().max_retries(2).build())
            .process(&msg)
            .await;

        assert_eq!(outcome, DispatchOutcome::DeadLettered { retries: 2 });
        assert_eq!(users.attempts(), 3);
        assert!(started.elapsed() >= Duration::from_millis(300));

        let letters = dlq.letters();
        assert_eq!(letters.len(), 1);
        let letter = &letters[0];
        assert_eq!(letter.payload, msg.payload);
        assert_eq!(letter.partition, 3);
        assert_eq!(letter.offset, 42);
        assert_eq!(letter.key.as_deref(), Some("u1"));
        assert_eq!(letter.event_id, Some(envelope.event_id));
        assert_eq!(letter.retry_count, 2);
        assert!(letter.error.contains("database down"));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_can_be_disabled() {
        let users = RecordingProjection::new("users", &[EventType::UserCreated])
            .always_fail(ProjectionError::Storage("deadlock detected".to_string()));
        let dlq = Arc::new(InMemoryDeadLetters::new());

        let started = tokio::time::Instant::now();
        let outcome = dispatcher(&users, &dlq)
            .with_retry_policy(RetryPolicy::none())
            .process(&message(&user_created()))
            .await;

        assert_eq!(outcome, DispatchOutcome::DeadLettered { retries: 0 });
        assert_eq!(users.attempts(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(dlq.letters()[0].retry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failures_skip_retry() {
        let users = RecordingProjection::new("users", &[EventType::UserCreated])
            .always_fail(ProjectionError::Decode("profile is a string".to_string()));
        let dlq = Arc::new(InMemoryDeadLetters::new());

        let outcome = dispatcher(&users, &dlq).process(&message(&user_created())).await;

        assert_eq!(outcome, DispatchOutcome::DeadLettered { retries: 0 });
        assert_eq!(users.attempts(), 1);
        assert_eq!(dlq.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_dead_letter_sink_reports_failure() {
        let users = RecordingProjection::new("users", &[EventType::UserCreated])
            .always_fail(ProjectionError::Constraint("duplicate order_number".to_string()));
        let dlq = Arc::new(InMemoryDeadLetters::new());
        dlq.set_unavailable(true);

        let outcome = dispatcher(&users, &dlq).process(&message(&user_created())).await;

        assert!(!outcome.is_settled());
        assert!(
            matches!(&outcome, DispatchOutcome::Failed { reason } if reason.contains("duplicate order_number")),
            "unexpected outcome {outcome:?}"
        );
    }
}
