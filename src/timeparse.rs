//! Accepted timestamp formats for the time column.
//!
//! Strings are tried against RFC 3339 (any fractional precision) first, then
//! a short list of common layouts. Layouts without an offset are taken as
//! UTC. Numbers are Unix epoch milliseconds, integer or float.

use crate::{Result, SockqlError};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// Date-time layouts with an explicit offset.
const OFFSET_LAYOUTS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// Date-time layouts without an offset.
const NAIVE_LAYOUTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Date-only layouts, read as midnight UTC.
const DATE_LAYOUTS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

/// Parses a time column value.
///
/// `null` is accepted and yields `None`.
///
/// # Errors
///
/// Returns [`SockqlError::TimeParseError`] naming `value` and `column` when
/// the value matches no accepted format.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use sockql::timeparse::parse_timestamp;
///
/// let a = parse_timestamp(&json!("2023-11-14T22:13:20Z"), "time").unwrap();
/// let b = parse_timestamp(&json!(1700000000000_i64), "time").unwrap();
/// assert_eq!(a, b);
///
/// assert!(parse_timestamp(&json!("not-a-date"), "time").is_err());
/// ```
pub fn parse_timestamp(value: &Value, column: &str) -> Result<Option<DateTime<Utc>>> {
    let parsed = match value {
        Value::Null => return Ok(None),
        Value::String(s) => parse_str(s),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(ms), _) => from_millis(ms),
            (None, Some(ms)) => from_float_millis(ms),
            _ => None,
        },
        _ => None,
    };

    parsed.map(Some).ok_or_else(|| SockqlError::TimeParseError {
        value: match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
        column: column.to_string(),
    })
}

/// Parses a timestamp string against every accepted layout.
pub fn parse_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for layout in OFFSET_LAYOUTS {
        if let Ok(dt) = DateTime::parse_from_str(s, layout) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    for layout in NAIVE_LAYOUTS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, layout) {
            return Some(dt.and_utc());
        }
    }

    DATE_LAYOUTS.iter().find_map(|layout| {
        NaiveDate::parse_from_str(s, layout)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    })
}

/// Unix epoch milliseconds.
pub fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

/// Unix epoch milliseconds with a fractional part (sub-millisecond precision
/// is kept down to the nanosecond).
pub fn from_float_millis(ms: f64) -> Option<DateTime<Utc>> {
    if !ms.is_finite() {
        return None;
    }

    let secs = (ms / 1000.0).floor();
    if secs < i64::MIN as f64 || secs > i64::MAX as f64 {
        return None;
    }

    let nanos = ((ms - secs * 1000.0) * 1_000_000.0).round().clamp(0.0, 999_999_999.0);
    DateTime::from_timestamp(secs as i64, nanos as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};
    use serde_json::json;

    #[test]
    fn test_rfc3339_with_millis() {
        let ts = parse_timestamp(&json!("2024-01-02T03:04:05.123Z"), "time")
            .unwrap()
            .unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap() + chrono::Duration::milliseconds(123));
    }

    #[test]
    fn test_rfc3339_with_offset_and_nanos() {
        let ts = parse_str("2024-01-02T05:04:05.000000001+02:00").unwrap();
        assert_eq!(ts.hour(), 3);
        assert_eq!(ts.nanosecond(), 1);
    }

    #[test]
    fn test_integer_millis_match_string() {
        let from_int = parse_timestamp(&json!(1700000000000_i64), "time").unwrap();
        let from_str = parse_timestamp(&json!("2023-11-14T22:13:20Z"), "time").unwrap();
        assert_eq!(from_int, from_str);
    }

    #[test]
    fn test_float_millis() {
        let ts = parse_timestamp(&json!(1700000000000.5), "time").unwrap().unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
        assert_eq!(ts.nanosecond(), 500_000);
    }

    #[test]
    fn test_common_layouts() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_str("2024-01-02 03:04:05"), Some(expected));
        assert_eq!(parse_str("2024-01-02T03:04:05"), Some(expected));
        assert_eq!(parse_str("2024/01/02 03:04:05"), Some(expected));
        assert_eq!(parse_str("2024-01-02 03:04:05+00:00"), Some(expected));
        assert_eq!(
            parse_str("2024-01-02"),
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_null_is_accepted() {
        assert_eq!(parse_timestamp(&Value::Null, "time").unwrap(), None);
    }

    #[test]
    fn test_rejects_garbage() {
        let err = parse_timestamp(&json!("not-a-date"), "event_time").unwrap_err();
        match err {
            SockqlError::TimeParseError { value, column } => {
                assert_eq!(value, "not-a-date");
                assert_eq!(column, "event_time");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        assert!(parse_timestamp(&json!(true), "time").is_err());
        assert!(parse_timestamp(&json!({"a": 1}), "time").is_err());
    }
}
