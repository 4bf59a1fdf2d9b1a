//! UTC day windows.

use chrono::{DateTime, Duration, NaiveDate, Utc};

pub use crate::utils::time::parse_log_date;

/// `[start, end)` in epoch ms covering `days` whole UTC days ending today.
///
/// Start is 00:00 of the day `days - 1` before `now`; end is 00:00 tomorrow.
pub fn period_boundaries(days: u32, now: DateTime<Utc>) -> (i64, i64) {
    let today = now.date_naive();
    let start = today - Duration::days(i64::from(days.max(1)) - 1);
    let end = today + Duration::days(1);
    (start_of_day_ms(start), start_of_day_ms(end))
}

/// Every date of the window, oldest first.
pub fn day_range(days: u32, today: NaiveDate) -> Vec<NaiveDate> {
    let days = i64::from(days);
    (0..days)
        .map(|i| today - Duration::days(days - 1 - i))
        .collect()
}

pub fn start_of_day_ms(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default()
}
