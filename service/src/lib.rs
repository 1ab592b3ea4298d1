//! # Relay Service
//!
//! The `projection-relay` consumer process: loads [`Config`] from the
//! environment, bootstraps the read store schema, subscribes to the entity
//! topics and applies every event through the registered projections until
//! interrupted.

pub mod app;
pub mod config;
pub mod telemetry;

pub use app::run;
pub use config::{Config, ConfigError, KafkaConfig};
pub use telemetry::LogFormat;
