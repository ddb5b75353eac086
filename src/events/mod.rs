//! Business rules of the events resource: listing, registration and
//! organizer-only updates. Nothing in here knows about HTTP.

pub mod payload;
pub mod policy;
pub mod query;
pub mod registration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;

/// A single request input that could not be accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {field}")]
pub struct FieldError {
    pub code: &'static str,
    pub field: String,
}

impl FieldError {
    pub fn new(code: &'static str, field: impl Into<String>) -> Self {
        Self {
            code,
            field: field.into(),
        }
    }
}

/// Accepts RFC 3339, a naive `YYYY-MM-DDTHH:MM:SS` (read as UTC) or a bare date.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Some(at.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 16, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-16T00:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-16T02:00:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-16T00:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-16"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}
