//! The single-worker poll loop.
//!
//! One iteration polls at most one message with a bounded timeout, hands it
//! to the [`Dispatcher`], and awaits the outcome before polling again. Offsets
//! are committed on a fixed interval rather than per message, and once more on
//! a clean exit. Shutdown is observed at the top of each iteration, so a
//! message already being processed always finishes.

use crate::dispatcher::{DispatchOutcome, Dispatcher};
use relay_core::source::{MessageSource, SourceError};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// What the loop does when the bus errors or a dead-letter write fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Log and keep consuming; the failed message is committed past.
    #[default]
    LogAndContinue,
    /// Stop without committing so a restart redelivers from the last commit.
    Halt,
}

impl ErrorPolicy {
    /// Configuration spelling of the policy.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LogAndContinue => "continue",
            Self::Halt => "halt",
        }
    }
}

impl FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" | "log_and_continue" => Ok(Self::LogAndContinue),
            "halt" => Ok(Self::Halt),
            other => Err(format!("unknown error policy '{other}' (expected continue or halt)")),
        }
    }
}

/// Loop tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerOptions {
    /// Upper bound on a single poll; also the shutdown latency when idle.
    pub poll_timeout: Duration,
    /// Minimum time between offset commits.
    pub commit_interval: Duration,
    /// Reaction to bus errors and dead-letter failures.
    pub error_policy: ErrorPolicy,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            commit_interval: Duration::from_secs(5),
            error_policy: ErrorPolicy::LogAndContinue,
        }
    }
}

/// Why the loop stopped abnormally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    /// The bus reported a non-benign error under [`ErrorPolicy::Halt`].
    #[error("Consumer halted on source error: {0}")]
    Source(SourceError),

    /// A message could not be settled under [`ErrorPolicy::Halt`].
    #[error("Consumer halted at {topic}/{partition}@{offset}: {reason}")]
    Unsettled {
        /// Topic of the unsettled message
        topic: String,
        /// Partition of the unsettled message
        partition: i32,
        /// Offset of the unsettled message
        offset: i64,
        /// Projection and dead-letter failures
        reason: String,
    },
}

/// Counters for one run of the loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Messages handed to the dispatcher.
    pub received: u64,
    /// Written by a projection.
    pub applied: u64,
    /// Accepted without a write.
    pub skipped: u64,
    /// Malformed or unhandled.
    pub ignored: u64,
    /// Quarantined.
    pub dead_lettered: u64,
    /// Neither applied nor quarantined.
    pub failed: u64,
    /// Successful offset commits, including the final one.
    pub commits: u64,
}

impl RunSummary {
    fn record(&mut self, outcome: &DispatchOutcome) {
        self.received += 1;
        match outcome {
            DispatchOutcome::Applied => self.applied += 1,
            DispatchOutcome::Skipped => self.skipped += 1,
            DispatchOutcome::Ignored(_) => self.ignored += 1,
            DispatchOutcome::DeadLettered { .. } => self.dead_lettered += 1,
            DispatchOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Drives a [`MessageSource`] through a [`Dispatcher`] until shutdown.
pub struct ConsumerLoop<S: MessageSource> {
    source: S,
    dispatcher: Dispatcher,
    options: ConsumerOptions,
    shutdown: watch::Receiver<bool>,
}

impl<S: MessageSource> ConsumerLoop<S> {
    /// Create a loop; it stops once `shutdown` reads `true`.
    #[must_use]
    pub const fn new(
        source: S,
        dispatcher: Dispatcher,
        options: ConsumerOptions,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            dispatcher,
            options,
            shutdown,
        }
    }

    /// Run until shutdown (clean exit) or a halting error.
    ///
    /// On a clean exit pending progress is committed and the source closed.
    /// On a halt the source is closed without committing.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError`] only under [`ErrorPolicy::Halt`].
    pub async fn run(mut self) -> Result<RunSummary, ConsumerError> {
        let mut summary = RunSummary::default();
        let mut last_commit = Instant::now();
        let mut uncommitted = false;

        tracing::info!(
            poll_timeout_ms = u64::try_from(self.options.poll_timeout.as_millis()).unwrap_or(u64::MAX),
            commit_interval_ms = u64::try_from(self.options.commit_interval.as_millis()).unwrap_or(u64::MAX),
            error_policy = self.options.error_policy.as_str(),
            handlers = self.dispatcher.registry().len(),
            "Consumer loop started"
        );

        loop {
            if *self.shutdown.borrow() {
                tracing::info!("Shutdown requested, leaving consumer loop");
                break;
            }

            match self.source.poll(self.options.poll_timeout).await {
                None => {}
                Some(Ok(message)) => {
                    metrics::counter!("relay.messages.received").increment(1);
                    let outcome = self.dispatcher.process(&message).await;
                    summary.record(&outcome);

                    if let DispatchOutcome::Failed { reason } = outcome {
                        if self.options.error_policy == ErrorPolicy::Halt {
                            tracing::error!(
                                topic = %message.topic,
                                partition = message.partition,
                                offset = message.offset,
                                "Halting: message could not be settled"
                            );
                            self.source.close();
                            return Err(ConsumerError::Unsettled {
                                topic: message.topic,
                                partition: message.partition,
                                offset: message.offset,
                                reason,
                            });
                        }
                        tracing::error!(
                            topic = %message.topic,
                            partition = message.partition,
                            offset = message.offset,
                            reason = %reason,
                            "Message lost: neither applied nor dead-lettered"
                        );
                    }
                    uncommitted = true;
                }
                Some(Err(error)) if error.is_benign() => {
                    tracing::debug!(error = %error, "Benign source condition");
                }
                Some(Err(error)) => {
                    metrics::counter!("relay.consumer.source_errors").increment(1);
                    if self.options.error_policy == ErrorPolicy::Halt {
                        tracing::error!(error = %error, "Halting on source error");
                        self.source.close();
                        return Err(ConsumerError::Source(error));
                    }
                    tracing::error!(error = %error, "Source error, continuing");
                }
            }

            if uncommitted && last_commit.elapsed() >= self.options.commit_interval {
                if self.commit(&mut summary, false) {
                    uncommitted = false;
                }
                last_commit = Instant::now();
            }
        }

        if uncommitted {
            self.commit(&mut summary, true);
        }
        self.source.close();

        tracing::info!(
            received = summary.received,
            applied = summary.applied,
            skipped = summary.skipped,
            ignored = summary.ignored,
            dead_lettered = summary.dead_lettered,
            failed = summary.failed,
            commits = summary.commits,
            "Consumer loop stopped"
        );
        Ok(summary)
    }

    fn commit(&mut self, summary: &mut RunSummary, on_exit: bool) -> bool {
        let result = if on_exit {
            self.source.commit_final()
        } else {
            self.source.commit()
        };
        match result {
            Ok(()) => {
                summary.commits += 1;
                metrics::counter!("relay.consumer.commits").increment(1);
                tracing::debug!("Offsets committed");
                true
            }
            Err(error) => {
                metrics::counter!("relay.consumer.commit_failures").increment(1);
                tracing::warn!(error = %error, "Offset commit failed, will retry");
                false
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn error_policy_parses_config_spellings() {
        assert_eq!("continue".parse::<ErrorPolicy>(), Ok(ErrorPolicy::LogAndContinue));
        assert_eq!(" HALT ".parse::<ErrorPolicy>(), Ok(ErrorPolicy::Halt));
        assert!("explode".parse::<ErrorPolicy>().is_err());
        assert_eq!(ErrorPolicy::default(), ErrorPolicy::LogAndContinue);
    }

    #[test]
    fn defaults_poll_every_second_and_commit_every_five() {
        let options = ConsumerOptions::default();
        assert_eq!(options.poll_timeout, Duration::from_secs(1));
        assert_eq!(options.commit_interval, Duration::from_secs(5));
    }
}
