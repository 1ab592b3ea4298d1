//! In-memory projection doubles.
//!
//! [`RecordingProjection`] stands in for a real projection in dispatcher and
//! consumer-loop tests: it remembers every envelope it was asked to apply and
//! can be scripted to fail a number of times before succeeding.

use relay_core::envelope::Envelope;
use relay_core::projection::{ApplyOutcome, Projection, ProjectionError, Result};
use relay_core::topic::EventType;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct Recorded {
    applied: Vec<Envelope>,
    attempts: usize,
    failures: VecDeque<ProjectionError>,
    always: Option<ProjectionError>,
}

/// Projection double that records what it applies.
///
/// Clones share their recording.
///
/// # Example
///
/// ```
/// use relay_core::{EventType, ProjectionError};
/// use relay_testing::RecordingProjection;
///
/// let users = RecordingProjection::new("users", &[EventType::UserCreated])
///     .fail_times(2, ProjectionError::Storage("connection reset".into()));
/// assert_eq!(users.attempts(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct RecordingProjection {
    name: String,
    event_types: Vec<EventType>,
    delay: Option<Duration>,
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingProjection {
    /// Create a projection owning `event_types`.
    #[must_use]
    pub fn new(name: &str, event_types: &[EventType]) -> Self {
        Self {
            name: name.to_string(),
            event_types: event_types.to_vec(),
            delay: None,
            recorded: Arc::new(Mutex::new(Recorded::default())),
        }
    }

    /// Fail the next `times` applies with `error`, then succeed.
    #[must_use]
    pub fn fail_times(self, times: usize, error: ProjectionError) -> Self {
        {
            let mut recorded = self.recorded.lock().unwrap();
            recorded
                .failures
                .extend(std::iter::repeat_n(error, times));
        }
        self
    }

    /// Fail every apply with `error`.
    #[must_use]
    pub fn always_fail(self, error: ProjectionError) -> Self {
        self.recorded.lock().unwrap().always = Some(error);
        self
    }

    /// Sleep for `delay` inside every apply.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Envelopes applied successfully, in order.
    #[must_use]
    pub fn applied(&self) -> Vec<Envelope> {
        self.recorded.lock().unwrap().applied.clone()
    }

    /// Total apply calls, including failed ones.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.recorded.lock().unwrap().attempts
    }
}

impl Projection for RecordingProjection {
    fn name(&self) -> &str {
        &self.name
    }

    fn event_types(&self) -> &[EventType] {
        &self.event_types
    }

    fn apply<'a>(
        &'a self,
        envelope: &'a Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<ApplyOutcome>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let mut recorded = self.recorded.lock().unwrap();
            recorded.attempts += 1;
            if let Some(error) = recorded.always.clone() {
                return Err(error);
            }
            if let Some(error) = recorded.failures.pop_front() {
                return Err(error);
            }
            recorded.applied.push(envelope.clone());
            Ok(ApplyOutcome::Applied)
        })
    }
}
