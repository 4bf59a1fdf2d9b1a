//! Timestamp helpers shared by the client and the aggregations.
//!
//! Kraken mixes two clocks: account-log rows carry ISO-8601 strings
//! (`2024-01-15T10:30:00.000Z`), execution events carry epoch milliseconds.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

pub const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Parse an account-log date. Accepts RFC 3339 and the bare `...%.fZ` form.
pub fn parse_log_date(value: &str) -> Option<DateTime<Utc>> {
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.fZ")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Epoch milliseconds to a UTC datetime (`None` when out of range).
pub fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
