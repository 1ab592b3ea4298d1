//! Projections: envelopes in, relational rows out.
//!
//! A projection owns a fixed set of [`EventType`]s and turns each matching
//! [`Envelope`] into an idempotent write against the read store. The consumer
//! loop never interprets payloads itself; it looks the event type up in its
//! dispatch table and calls [`Projection::apply`].
//!
//! # Delivery guarantees projections must tolerate
//!
//! - **Duplicates**: the same envelope may arrive any number of times.
//! - **Reordering**: a stale envelope may arrive after a newer one for the
//!   same entity (redelivery after a rebalance, for instance).
//!
//! Both are absorbed by the upsert itself: last write wins, guarded by the
//! stored `event_timestamp`. A stale envelope is reported as
//! [`ApplyOutcome::Skipped`] and is not an error.
//!
//! # Example
//!
//! ```ignore
//! struct AuditLog { pool: PgPool }
//!
//! impl Projection for AuditLog {
//!     fn name(&self) -> &str { "audit_log" }
//!
//!     fn event_types(&self) -> &[EventType] { &[EventType::UserCreated] }
//!
//!     fn apply<'a>(&'a self, envelope: &'a Envelope)
//!         -> Pin<Box<dyn Future<Output = Result<ApplyOutcome>> + Send + 'a>>
//!     {
//!         Box::pin(async move {
//!             sqlx::query("INSERT INTO audit_log (event_id) VALUES ($1) ON CONFLICT DO NOTHING")
//!                 .bind(envelope.event_id)
//!                 .execute(&self.pool)
//!                 .await
//!                 .map_err(|e| ProjectionError::Storage(e.to_string()))?;
//!             Ok(ApplyOutcome::Applied)
//!         })
//!     }
//! }
//! ```

use crate::envelope::Envelope;
use crate::topic::EventType;
use std::future::Future;
use std::pin::Pin;

/// Error type for projection operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProjectionError {
    /// Storage backend error (connection loss, timeout, deadlock).
    #[error("Storage error: {0}")]
    Storage(String),

    /// Integrity violation raised by the store.
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Payload could not be decoded into the entity shape.
    #[error("Payload decode error: {0}")]
    Decode(String),

    /// The projection was handed an event type it does not own.
    #[error("Projection '{projection}' does not handle '{event_type}'")]
    Unsupported {
        /// Projection name
        projection: String,
        /// Offending event type
        event_type: String,
    },
}

impl ProjectionError {
    /// Whether retrying the same envelope could succeed.
    ///
    /// Only storage errors are transient.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Short label used in logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Storage(_) => "storage",
            Self::Constraint(_) => "constraint",
            Self::Decode(_) => "decode",
            Self::Unsupported { .. } => "unsupported",
        }
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// What an `apply` call did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The envelope was written.
    Applied,
    /// Nothing changed: the envelope was stale, or its target row is gone.
    Skipped,
}

impl ApplyOutcome {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Skipped => "skipped",
        }
    }
}

/// A projection maintains one entity kind's rows in the read store.
///
/// # Dyn Compatibility
///
/// `apply` returns an explicit `Pin<Box<dyn Future>>` so projections can be
/// stored as `Arc<dyn Projection>` in the dispatch table.
pub trait Projection: Send + Sync {
    /// Unique projection name, used in logs and dead-letter entries.
    fn name(&self) -> &str;

    /// Event types this projection owns.
    ///
    /// Each type must be owned by exactly one projection.
    fn event_types(&self) -> &[EventType];

    /// Apply one envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] when the envelope cannot be applied.
    /// Callers retry only errors for which
    /// [`ProjectionError::is_retryable`] is true.
    fn apply<'a>(
        &'a self,
        envelope: &'a Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<ApplyOutcome>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_storage_errors_are_retryable() {
        assert!(ProjectionError::Storage("pool timed out".into()).is_retryable());
        assert!(!ProjectionError::Constraint("duplicate key".into()).is_retryable());
        assert!(!ProjectionError::Decode("expected object".into()).is_retryable());
        assert!(
            !ProjectionError::Unsupported {
                projection: "users".into(),
                event_type: "post.created".into(),
            }
            .is_retryable()
        );
    }
}
