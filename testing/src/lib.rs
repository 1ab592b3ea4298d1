//! # Relay Testing
//!
//! In-memory doubles for the relay's seams:
//!
//! - [`InMemoryEventBus`]: captures published messages, scriptable flush remainder
//! - [`ScriptedSource`]: replays a fixed sequence of messages and transport errors
//! - [`InMemoryDeadLetters`]: collects dead letters, can be made unavailable
//! - [`RecordingProjection`]: records applied envelopes, can fail on demand
//!
//! ## Example
//!
//! ```
//! use relay_core::EventType;
//! use relay_testing::{envelope_at, ScriptedSource};
//! use serde_json::json;
//!
//! let created = envelope_at(EventType::UserCreated, "u1", "2024-03-01T12:00:00Z", json!({}));
//! let source = ScriptedSource::new().with_envelope(&created).with_payload("user", None, "garbage");
//! assert_eq!(source.remaining(), 2);
//! ```

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

pub mod dead_letters;
pub mod event_bus;
pub mod projection_mocks;
pub mod source;

pub use dead_letters::InMemoryDeadLetters;
pub use event_bus::{InMemoryEventBus, PublishedMessage};
pub use projection_mocks::RecordingProjection;
pub use source::{Scripted, ScriptedSource};

use relay_core::envelope::Envelope;
use serde_json::Value;

/// Build an envelope with a fixed timestamp.
///
/// # Panics
///
/// Panics if `timestamp` is not a readable ISO-8601 timestamp.
#[must_use]
pub fn envelope_at(
    event_type: impl Into<String>,
    entity_id: &str,
    timestamp: &str,
    data: Value,
) -> Envelope {
    let mut envelope = Envelope::new(event_type, entity_id, data);
    envelope.timestamp = relay_core::timestamp::parse_lenient(timestamp).unwrap();
    envelope
}
