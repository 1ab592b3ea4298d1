//! The portable event envelope.
//!
//! One envelope is published per primary-store mutation:
//!
//! ```json
//! {
//!   "event_id": "6f1c9a0e-5d0b-4f5e-9a57-4c1b7f0f3d7e",
//!   "event_type": "user.created",
//!   "entity_id": "u1",
//!   "timestamp": "2024-03-01T12:30:05.000000Z",
//!   "data": { "contact_info": { "primary_email": "a@b.com" } }
//! }
//! ```
//!
//! Envelope-level fields are required; `data` defaults to an empty object.
//! The payload inside `data` is decoded later, by the projection that owns
//! the event type, and is deliberately kept as raw JSON here.

use crate::topic::{EventType, Topic};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while encoding or decoding an envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Bytes were not a JSON envelope (bad UTF-8, bad JSON, missing fields).
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    /// The envelope could not be serialized.
    #[error("Envelope encoding failed: {0}")]
    Encode(String),
}

/// A domain-change notification as it travels on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique per emission.
    pub event_id: Uuid,
    /// `"<entity>.<action>"`.
    pub event_type: String,
    /// Stable identifier of the entity; also the partition key.
    pub entity_id: String,
    /// Producer-side emission time.
    #[serde(with = "crate::timestamp::required")]
    pub timestamp: DateTime<Utc>,
    /// Entity-shaped payload.
    #[serde(default = "empty_object")]
    pub data: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Audit columns stamped onto every projected row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventAudit {
    /// Id of the last applied envelope.
    pub event_id: Uuid,
    /// Timestamp of the last applied envelope; drives the staleness guard.
    pub event_timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Build a fresh envelope with a new v4 id, stamped with the current time.
    ///
    /// The timestamp is truncated to microseconds, the precision of both the
    /// wire format and the store. A `null` payload is normalized to `{}`.
    #[must_use]
    pub fn new(event_type: impl Into<String>, entity_id: impl Into<String>, data: Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            entity_id: entity_id.into(),
            timestamp: Utc::now().trunc_subsecs(6),
            data: if data.is_null() { empty_object() } else { data },
        }
    }

    /// Recognized event type, if any.
    #[must_use]
    pub fn kind(&self) -> Option<EventType> {
        EventType::parse(&self.event_type)
    }

    /// Topic derived from the event type prefix.
    #[must_use]
    pub fn topic(&self) -> Option<Topic> {
        Topic::for_event_type(&self.event_type)
    }

    /// Audit stamp for rows written from this envelope.
    #[must_use]
    pub const fn audit(&self) -> EventAudit {
        EventAudit {
            event_id: self.event_id,
            event_timestamp: self.timestamp,
        }
    }

    /// Encode as UTF-8 JSON.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Encode`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Encode(e.to_string()))
    }

    /// Decode from UTF-8 JSON.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] for anything that is not a
    /// complete envelope.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let mut envelope: Self =
            serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
        if envelope.event_type.is_empty() {
            return Err(EnvelopeError::Malformed("empty event_type".to_string()));
        }
        if envelope.data.is_null() {
            envelope.data = empty_object();
        }
        Ok(envelope)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn new_envelopes_get_distinct_ids() {
        let a = Envelope::new(EventType::UserCreated, "u1", json!({}));
        let b = Envelope::new(EventType::UserCreated, "u1", json!({}));
        assert_ne!(a.event_id, b.event_id);
        assert_eq!(a.kind(), Some(EventType::UserCreated));
        assert_eq!(a.topic(), Some(Topic::User));
        assert_eq!(a.timestamp.timestamp_subsec_nanos() % 1_000, 0);
    }

    #[test]
    fn timestamp_is_written_with_micros_and_z() {
        let envelope = Envelope::new("post.created", "p1", json!({"post_type": "text"}));
        let wire: Value = serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();
        let ts = wire["timestamp"].as_str().unwrap();
        assert!(ts.ends_with('Z'), "{ts}");
        assert_eq!(ts.split('.').nth(1).map(str::len), Some(7), "{ts}");
    }

    #[test]
    fn missing_data_defaults_to_empty_object() {
        let raw = br#"{"event_id":"6f1c9a0e-5d0b-4f5e-9a57-4c1b7f0f3d7e","event_type":"user.deleted","entity_id":"u1","timestamp":"2024-03-01T12:30:05Z"}"#;
        let envelope = Envelope::from_slice(raw).unwrap();
        assert_eq!(envelope.data, json!({}));

        let raw = br#"{"event_id":"6f1c9a0e-5d0b-4f5e-9a57-4c1b7f0f3d7e","event_type":"user.deleted","entity_id":"u1","timestamp":"2024-03-01T12:30:05Z","data":null}"#;
        assert_eq!(Envelope::from_slice(raw).unwrap().data, json!({}));
    }

    #[test]
    fn offset_less_envelope_timestamp_is_utc() {
        let raw = br#"{"event_id":"6f1c9a0e-5d0b-4f5e-9a57-4c1b7f0f3d7e","event_type":"user.updated","entity_id":"u1","timestamp":"2024-03-01T12:30:05.123456","data":{}}"#;
        let envelope = Envelope::from_slice(raw).unwrap();
        assert_eq!(
            crate::timestamp::format(&envelope.timestamp),
            "2024-03-01T12:30:05.123456Z"
        );
    }

    #[test]
    fn envelope_fields_are_required() {
        for raw in [
            &b"not json"[..],
            br#"{"event_type":"user.created","entity_id":"u1","timestamp":"2024-03-01T12:30:05Z"}"#,
            br#"{"event_id":"nope","event_type":"user.created","entity_id":"u1","timestamp":"2024-03-01T12:30:05Z"}"#,
            br#"{"event_id":"6f1c9a0e-5d0b-4f5e-9a57-4c1b7f0f3d7e","event_type":"user.created","entity_id":"u1","timestamp":"soon"}"#,
            br#"{"event_id":"6f1c9a0e-5d0b-4f5e-9a57-4c1b7f0f3d7e","event_type":"","entity_id":"u1","timestamp":"2024-03-01T12:30:05Z"}"#,
        ] {
            assert!(
                matches!(Envelope::from_slice(raw), Err(EnvelopeError::Malformed(_))),
                "accepted {}",
                String::from_utf8_lossy(raw)
            );
        }
    }

    #[test]
    fn unknown_event_types_still_decode() {
        let envelope = Envelope::new("user.verified", "u1", json!({}));
        let decoded = Envelope::from_slice(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.kind(), None);
        assert_eq!(decoded.topic(), Some(Topic::User));
    }

    proptest! {
        #[test]
        fn audit_survives_the_wire(entity_id in "[a-zA-Z0-9_-]{1,24}", idx in 0usize..EventType::ALL.len()) {
            let envelope = Envelope::new(EventType::ALL[idx], entity_id.clone(), json!({"k": entity_id}));
            let decoded = Envelope::from_slice(&envelope.to_bytes().unwrap()).unwrap();
            prop_assert_eq!(decoded.audit(), envelope.audit());
            prop_assert_eq!(decoded.entity_id, entity_id);
        }
    }
}
