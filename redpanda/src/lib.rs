//! Redpanda transport for the projection relay.
//!
//! Uses rdkafka, so any Kafka-compatible broker works (Redpanda, Apache
//! Kafka, MSK).
//!
//! - [`RedpandaProducer`] implements [`EventBus`](relay_core::EventBus):
//!   fire-and-forget publish, delivery reports logged and counted, `flush`
//!   reports what is still unacknowledged.
//! - [`RedpandaSource`] implements [`MessageSource`](relay_core::MessageSource):
//!   one subscribed consumer with manual offset commits.
//!
//! # Delivery Semantics
//!
//! **At-least-once**. Producers key every message by `entity_id`, so events for
//! one entity stay ordered within a partition. The consumer commits offsets
//! only after the messages were processed; a crash in between redelivers them,
//! which the idempotent projections absorb.
//!
//! # Example
//!
//! ```no_run
//! use relay_core::EventProducer;
//! use relay_redpanda::RedpandaProducer;
//! use serde_json::json;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let producer = EventProducer::new(Arc::new(RedpandaProducer::new("localhost:9092")?));
//! producer.emit("user.created", "u1", json!({"profile": {"display_name": "Ann"}}))?;
//! producer.flush(Duration::from_secs(5))?;
//! # Ok(())
//! # }
//! ```

pub mod producer;
pub mod source;

pub use producer::{DeliveryLogger, RedpandaProducer, RedpandaProducerBuilder};
pub use source::{RedpandaSource, RedpandaSourceBuilder};
