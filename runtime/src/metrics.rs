//! Relay counters and the optional Prometheus exporter.
//!
//! Counters are emitted through the `metrics` facade wherever the event
//! happens; without an installed recorder they are no-ops. [`MetricsServer`]
//! installs a Prometheus recorder with an HTTP scrape endpoint.
//!
//! # Example
//!
//! ```rust,no_run
//! use relay_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use crate::dispatcher::DispatchOutcome;
use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install the exporter.
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus scrape endpoint.
pub struct MetricsServer {
    addr: SocketAddr,
}

impl MetricsServer {
    /// Create a server that will listen on `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Install the recorder and start serving `/metrics`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Install`] if a recorder is already installed or
    /// the listener cannot be set up.
    pub fn start(&self) -> Result<(), MetricsError> {
        describe_metrics();

        let builder = PrometheusBuilder::new().with_http_listener(self.addr);
        let (recorder, exporter) = builder
            .build()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        metrics::set_global_recorder(recorder)
            .map_err(|e| MetricsError::Install(e.to_string()))?;
        tokio::spawn(async move {
            if exporter.await.is_err() {
                tracing::error!("Metrics endpoint stopped");
            }
        });

        tracing::info!(addr = %self.addr, "Metrics available at http://{}/metrics", self.addr);
        Ok(())
    }
}

/// Register descriptions for every relay counter.
pub fn describe_metrics() {
    describe_counter!("relay.messages.received", "Messages polled from the bus");
    describe_counter!("relay.messages.applied", "Envelopes applied to a projection");
    describe_counter!("relay.messages.skipped", "Envelopes skipped as stale or targeting no row");
    describe_counter!("relay.messages.ignored", "Malformed or unhandled messages, by reason");
    describe_counter!("relay.messages.failed", "Messages that could be neither applied nor dead-lettered");
    describe_counter!("relay.consumer.commits", "Offset commits");
    describe_counter!("relay.consumer.commit_failures", "Rejected offset commits");
    describe_counter!("relay.consumer.source_errors", "Non-benign errors reported by the bus");
    describe_counter!("relay.retry.attempts", "Projection retries");
    describe_counter!("relay.retry.exhausted", "Projections that ran out of retries");
    describe_counter!("relay.dlq.routed", "Messages routed to the dead-letter sink");
    describe_counter!("relay.dlq.added", "Rows written to the dead-letter table");
    describe_counter!("relay.producer.delivered", "Messages acknowledged by the bus");
    describe_counter!("relay.producer.failed", "Messages the bus failed to deliver");
}

/// Count one dispatch outcome, labelled by projection where one was involved.
pub fn record_outcome(outcome: &DispatchOutcome, projection: Option<&str>) {
    let projection = projection.unwrap_or("none").to_string();
    match outcome {
        DispatchOutcome::Applied => {
            counter!("relay.messages.applied", "projection" => projection).increment(1);
        }
        DispatchOutcome::Skipped => {
            counter!("relay.messages.skipped", "projection" => projection).increment(1);
        }
        DispatchOutcome::Ignored(reason) => {
            counter!("relay.messages.ignored", "reason" => reason.as_str()).increment(1);
        }
        DispatchOutcome::DeadLettered { .. } => {
            counter!("relay.dlq.routed", "projection" => projection).increment(1);
        }
        DispatchOutcome::Failed { .. } => {
            counter!("relay.messages.failed", "projection" => projection).increment(1);
        }
    }
}
