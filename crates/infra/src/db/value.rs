use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value as JsonValue;

use super::error::DbError;

/// Bind parameter for the Data Access Layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    /// Store a JSON document as text.
    pub fn json(value: &JsonValue) -> Self {
        SqlValue::Text(value.to_string())
    }

    /// Timestamps are stored as fixed-width RFC 3339 UTC text, so they sort lexically.
    pub fn timestamp(at: DateTime<Utc>) -> Self {
        SqlValue::Text(format_timestamp(at))
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DbError::Decode(format!("timestamp {raw:?}: {e}")))
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Integer(value.into())
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Integer(value as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn timestamps_sort_lexically() {
        let a = format_timestamp(Utc.with_ymd_and_hms(2026, 1, 9, 23, 0, 0).unwrap());
        let b = format_timestamp(Utc.with_ymd_and_hms(2026, 1, 10, 1, 0, 0).unwrap());
        assert!(a < b);
        assert_eq!(a, "2026-01-09T23:00:00.000Z");
        assert_eq!(parse_timestamp(&a).unwrap(), Utc.with_ymd_and_hms(2026, 1, 9, 23, 0, 0).unwrap());
    }

    #[test]
    fn options_map_to_null() {
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some("x")), SqlValue::Text("x".into()));
        assert_eq!(SqlValue::from(true), SqlValue::Integer(1));
    }
}
