//! Payload decoding and store-error helpers shared by every projection.
//!
//! Payloads are decoded defensively: every field is optional on the wire, a
//! missing or `null` nested object decodes to its empty default, and an
//! unreadable timestamp decodes as absent. Only a structurally wrong payload
//! (an array where an object belongs, text where a number belongs) is a
//! [`ProjectionError::Decode`].

use chrono::{DateTime, Utc};
use relay_core::envelope::Envelope;
use relay_core::projection::ProjectionError;
use serde::de::DeserializeOwned;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Number;
use sqlx::PgPool;
use uuid::Uuid;

pub use relay_core::timestamp::optional as timestamp;

/// Decode `envelope.data` into an entity payload.
///
/// # Errors
///
/// Returns [`ProjectionError::Decode`] when `data` is not an object or does
/// not fit the payload shape.
pub fn decode<T: DeserializeOwned>(envelope: &Envelope) -> Result<T, ProjectionError> {
    if !envelope.data.is_object() {
        return Err(ProjectionError::Decode(format!(
            "{} payload for '{}' is not an object",
            envelope.event_type, envelope.entity_id
        )));
    }
    T::deserialize(&envelope.data).map_err(|e| {
        ProjectionError::Decode(format!(
            "{} payload for '{}': {e}",
            envelope.event_type, envelope.entity_id
        ))
    })
}

/// Treat an explicit `null` like a missing field.
///
/// # Errors
///
/// Propagates type mismatches from the inner value.
pub fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Read a whole number; `null` or a missing field is zero.
///
/// Producers serializing through a float type send counts as `10.0`, so a
/// float with no fractional part is accepted. `10.5` or text is an error.
///
/// # Errors
///
/// Fails when the value is not a whole number that fits in an `i64`.
pub fn whole<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(whole_opt(deserializer)?.unwrap_or_default())
}

/// Like [`whole`], but keeps `null` as `None`.
///
/// # Errors
///
/// Fails when the value is not a whole number that fits in an `i64`.
pub fn whole_opt<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Number>::deserialize(deserializer)?
        .map(|n| {
            whole_number(&n)
                .ok_or_else(|| D::Error::custom(format!("expected a whole number, found {n}")))
        })
        .transpose()
}

#[allow(clippy::float_cmp, clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn whole_number(n: &Number) -> Option<i64> {
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    let f = n.as_f64()?;
    (f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64).then(|| f as i64)
}

/// Map a driver error onto the projection taxonomy.
///
/// Integrity violations (SQLSTATE class 23) cannot succeed on retry and
/// become [`ProjectionError::Constraint`]; everything else is treated as a
/// transient [`ProjectionError::Storage`] failure.
#[must_use]
pub fn classify(context: &str, error: &sqlx::Error) -> ProjectionError {
    if let sqlx::Error::Database(db) = error {
        if db.code().is_some_and(|code| code.starts_with("23")) {
            return ProjectionError::Constraint(format!("{context}: {db}"));
        }
    }
    ProjectionError::Storage(format!("{context}: {error}"))
}

/// Audit columns as stored on a projected row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct StoredAudit {
    /// Id of the last applied envelope.
    pub event_id: Option<Uuid>,
    /// Timestamp of the last applied envelope.
    pub event_timestamp: Option<DateTime<Utc>>,
}

/// Read the audit columns of one row.
///
/// `table` and `key_column` are trusted identifiers supplied by the
/// projections themselves.
pub(crate) async fn read_audit(
    pool: &PgPool,
    table: &str,
    key_column: &str,
    key: &str,
) -> Result<Option<StoredAudit>, ProjectionError> {
    sqlx::query_as::<_, StoredAudit>(&format!(
        "SELECT event_id, event_timestamp FROM {table} WHERE {key_column} = $1"
    ))
    .bind(key)
    .fetch_optional(pool)
    .await
    .map_err(|e| classify(&format!("Failed to read audit from {table}"), &e))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct Inner {
        name: Option<String>,
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct Outer {
        #[serde(deserialize_with = "nullable")]
        inner: Inner,
        #[serde(deserialize_with = "whole")]
        count: i64,
        #[serde(deserialize_with = "whole_opt")]
        limit: Option<i64>,
        #[serde(with = "timestamp")]
        at: Option<DateTime<Utc>>,
    }

    fn envelope(data: serde_json::Value) -> Envelope {
        Envelope::new("user.created", "u1", data)
    }

    #[test]
    fn missing_and_null_fields_take_defaults() {
        let outer: Outer = decode(&envelope(json!({}))).unwrap();
        assert!(outer.inner.name.is_none());
        assert_eq!(outer.count, 0);

        let outer: Outer =
            decode(&envelope(json!({"inner": null, "count": null, "at": null}))).unwrap();
        assert!(outer.inner.name.is_none());
        assert_eq!(outer.count, 0);
        assert!(outer.at.is_none());
    }

    #[test]
    fn integral_floats_are_whole_numbers() {
        let outer: Outer = decode(&envelope(json!({"count": 10.0, "limit": 3.0}))).unwrap();
        assert_eq!(outer.count, 10);
        assert_eq!(outer.limit, Some(3));

        let outer: Outer = decode(&envelope(json!({"count": -2, "limit": null}))).unwrap();
        assert_eq!(outer.count, -2);
        assert_eq!(outer.limit, None);

        for bad in [json!({"count": 10.5}), json!({"limit": 1e30}), json!({"count": "10"})] {
            let err = decode::<Outer>(&envelope(bad)).unwrap_err();
            assert!(matches!(err, ProjectionError::Decode(_)));
        }
    }

    #[test]
    fn unreadable_timestamps_are_absent() {
        let outer: Outer = decode(&envelope(json!({"at": "last tuesday"}))).unwrap();
        assert!(outer.at.is_none());
        let outer: Outer = decode(&envelope(json!({"at": 1_700_000_000}))).unwrap();
        assert!(outer.at.is_none());
        let outer: Outer = decode(&envelope(json!({"at": "2024-03-01T12:00:00"}))).unwrap();
        assert!(outer.at.is_some());
    }

    #[test]
    fn structural_mismatches_are_decode_errors() {
        let err = decode::<Outer>(&envelope(json!({"count": "many"}))).unwrap_err();
        assert!(matches!(err, ProjectionError::Decode(_)));
        assert!(!err.is_retryable());

        let err = decode::<Outer>(&envelope(json!([1, 2]))).unwrap_err();
        assert!(matches!(err, ProjectionError::Decode(_)));
    }

    #[test]
    fn driver_errors_are_retryable_storage_failures() {
        let err = classify("Failed to upsert user", &sqlx::Error::PoolTimedOut);
        assert!(matches!(err, ProjectionError::Storage(_)));
        assert!(err.is_retryable());
    }
}
