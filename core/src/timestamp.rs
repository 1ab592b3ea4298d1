//! Timestamp encoding shared by the envelope and the payload decoders.
//!
//! Outgoing timestamps are always RFC 3339 in UTC with microsecond precision
//! and a `Z` suffix. Incoming timestamps are read leniently: a full RFC 3339
//! string is honoured with its offset, an offset-less `YYYY-MM-DDTHH:MM:SS[.f]`
//! string is read as UTC.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Format a timestamp for the wire.
#[must_use]
pub fn format(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an ISO-8601 timestamp, treating offset-less values as UTC.
///
/// Returns `None` when the input matches none of the accepted shapes.
#[must_use]
pub fn parse_lenient(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Serde adapter for required timestamps (`#[serde(with = "timestamp")]`).
pub mod required {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    /// Serialize as RFC 3339 with microseconds.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format(ts))
    }

    /// Deserialize leniently; an unreadable timestamp is a hard error here.
    ///
    /// # Errors
    ///
    /// Fails when the value is not a string or not a recognizable timestamp.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_lenient(&raw)
            .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {raw:?}")))
    }
}

/// Serde adapter for optional payload timestamps.
///
/// Absent, `null`, non-string and unparseable values all decode to `None`.
pub mod optional {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    /// Serialize as RFC 3339 with microseconds, or `null`.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(
        ts: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => serializer.serialize_str(&super::format(ts)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize without ever failing on the timestamp itself.
    ///
    /// # Errors
    ///
    /// Only fails when the underlying input is not valid JSON.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::String(raw)) => super::parse_lenient(&raw),
            _ => None,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn formats_with_micros_and_z() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        assert_eq!(format(&ts), "2024-03-01T12:30:05.000000Z");
    }

    #[test]
    fn offsets_are_normalized_to_utc() {
        let ts = parse_lenient("2024-03-01T14:30:05+02:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap());
    }

    #[test]
    fn offset_less_values_are_utc() {
        let ts = parse_lenient("2024-03-01T12:30:05.250").unwrap();
        assert_eq!(format(&ts), "2024-03-01T12:30:05.250000Z");
        assert!(parse_lenient("2024-03-01 12:30:05").is_some());
    }

    #[test]
    fn garbage_is_absent() {
        assert_eq!(parse_lenient("yesterday"), None);
        assert_eq!(parse_lenient(""), None);
        assert_eq!(parse_lenient("2024-13-45T99:00:00"), None);
    }

    proptest! {
        #[test]
        fn wire_format_survives_reparsing(secs in 0i64..4_102_444_800, micros in 0u32..1_000_000) {
            let ts = Utc.timestamp_opt(secs, micros * 1_000).unwrap();
            let wire = format(&ts);
            prop_assert!(wire.ends_with('Z'));
            prop_assert_eq!(parse_lenient(&wire), Some(ts));
        }
    }
}
