//! # Relay Core
//!
//! Shared vocabulary for the projection relay.
//!
//! The relay keeps a read-optimized relational store in step with a primary
//! document store. Producing services publish one [`Envelope`] per mutation;
//! the consumer routes each envelope to the [`Projection`] that owns its event
//! type, which applies it as an idempotent upsert.
//!
//! ```text
//! primary store ─▶ service ─▶ EventProducer::emit ─▶ bus topic (key = entity_id)
//!                                                        │
//!        read store ◀─ Projection::apply ◀─ dispatcher ◀─┘ MessageSource::poll
//! ```
//!
//! This crate holds the types every other crate agrees on:
//!
//! - [`topic`]: the fixed topic and event type enumerations
//! - [`envelope`]: the wire envelope and its audit stamp
//! - [`event_bus`]: the producer trait and [`EventProducer`]
//! - [`source`]: the consumer transport trait
//! - [`projection`]: the projection trait and its error taxonomy
//! - [`dead_letter`]: the quarantine sink for messages that cannot be applied
//! - [`timestamp`]: wire timestamp formatting and lenient parsing

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;

pub mod dead_letter;
pub mod envelope;
pub mod event_bus;
pub mod projection;
pub mod source;
pub mod timestamp;
pub mod topic;

pub use dead_letter::{DeadLetter, DeadLetterError, DeadLetterSink};
pub use envelope::{Envelope, EnvelopeError, EventAudit};
pub use event_bus::{EventBus, EventBusError, EventProducer};
pub use projection::{ApplyOutcome, Projection, ProjectionError};
pub use source::{InboundMessage, MessageSource, SourceError};
pub use topic::{EventType, Topic};
