//! Date/time utilities.
//!
//! Timestamps are stored in SQLite as UTC text (`YYYY-MM-DD HH:MM:SS`), which
//! sorts and compares correctly as plain strings.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

/// Storage format for timestamps.
pub const SQL_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a UTC datetime in storage format.
pub fn to_sql(dt: &DateTime<Utc>) -> String {
    dt.format(SQL_DATETIME_FORMAT).to_string()
}

/// Current time in storage format.
pub fn now_sql() -> String {
    to_sql(&Utc::now())
}

/// Storage-format timestamp `minutes` from now.
pub fn minutes_from_now_sql(minutes: i64) -> String {
    to_sql(&(Utc::now() + Duration::minutes(minutes)))
}

/// Parse a storage-format timestamp.
pub fn parse_sql(datetime_str: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(datetime_str, SQL_DATETIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Convert a database datetime string (YYYY-MM-DD HH:MM:SS) to RFC3339 format.
///
/// The database stores times in UTC, so 'Z' is appended.
pub fn to_rfc3339(datetime_str: &str) -> String {
    format!("{}Z", datetime_str.replace(' ', "T"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_to_sql_format() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        assert_eq!(to_sql(&dt), "2024-01-15 10:30:00");
    }

    #[test]
    fn test_parse_sql_roundtrip() {
        let parsed = parse_sql("2024-01-15 10:30:00").unwrap();
        assert_eq!(to_sql(&parsed), "2024-01-15 10:30:00");
        assert!(parse_sql("not a date").is_none());
    }

    #[test]
    fn test_to_rfc3339() {
        assert_eq!(to_rfc3339("2024-01-15 10:30:00"), "2024-01-15T10:30:00Z");
    }

    #[test]
    fn test_minutes_from_now_orders_after_now() {
        let now = now_sql();
        let later = minutes_from_now_sql(5);
        assert!(later > now);
        assert!(minutes_from_now_sql(0) <= now_sql());
    }
}
