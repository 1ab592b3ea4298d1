//! # Relay Runtime
//!
//! The consuming side of the projection relay.
//!
//! ## Core Components
//!
//! - **`HandlerRegistry`**: explicit `EventType -> Projection` table built at startup
//! - **`Dispatcher`**: decodes one message, routes it, applies it with bounded
//!   retry and quarantines it on permanent failure
//! - **`ConsumerLoop`**: the single worker that polls, dispatches and commits
//!   on an interval until shutdown
//!
//! ## Example
//!
//! ```ignore
//! use relay_runtime::{ConsumerLoop, ConsumerOptions, Dispatcher, HandlerRegistry};
//!
//! let registry = HandlerRegistry::from_projections(projections)?;
//! let dispatcher = Dispatcher::new(registry, dead_letters);
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!
//! let summary = ConsumerLoop::new(source, dispatcher, ConsumerOptions::default(), shutdown_rx)
//!     .run()
//!     .await?;
//! ```

/// Single-worker poll loop
pub mod consumer;

/// Message decoding, routing and quarantine
pub mod dispatcher;

/// Relay counters and the Prometheus exporter
pub mod metrics;

/// Event type dispatch table
pub mod registry;

/// Retry logic with exponential backoff
pub mod retry;

pub use consumer::{ConsumerError, ConsumerLoop, ConsumerOptions, ErrorPolicy, RunSummary};
pub use dispatcher::{DispatchOutcome, Dispatcher, IgnoreReason};
pub use registry::{HandlerRegistry, RegistryError};
pub use retry::RetryPolicy;
