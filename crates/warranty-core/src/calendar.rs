//! UTC calendar helpers for warranty periods.

use jiff::tz::TimeZone;
use jiff::{Span, Timestamp};

const SECONDS_PER_DAY: i64 = 86_400;

/// The UTC calendar year of `ts`.
pub fn utc_year(ts: Timestamp) -> i16 {
    ts.to_zoned(TimeZone::UTC).year()
}

/// `ts` plus `months` calendar months in UTC, clamping the day of month
/// (Jan 31 + 1 month = Feb 28/29).
pub fn add_months(ts: Timestamp, months: u32) -> Option<Timestamp> {
    ts.to_zoned(TimeZone::UTC)
        .checked_add(Span::new().months(i64::from(months)))
        .ok()
        .map(|zoned| zoned.timestamp())
}

/// Whole days from `now` until `until`, floored at zero.
pub fn days_until(now: Timestamp, until: Timestamp) -> u32 {
    let seconds = until.as_second() - now.as_second();
    if seconds <= 0 {
        0
    } else {
        u32::try_from(seconds / SECONDS_PER_DAY).unwrap_or(u32::MAX)
    }
}

/// Human readable period, e.g. `"2 years"`, `"1 year 6 months"`, `"3 months"`.
pub fn describe_months(months: u32) -> String {
    fn plural(n: u32, unit: &str) -> String {
        if n == 1 {
            format!("1 {unit}")
        } else {
            format!("{n} {unit}s")
        }
    }

    let (years, rest) = (months / 12, months % 12);
    match (years, rest) {
        (0, m) => plural(m, "month"),
        (y, 0) => plural(y, "year"),
        (y, m) => format!("{} {}", plural(y, "year"), plural(m, "month")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> Timestamp {
        s.parse().unwrap()
    }

    #[test]
    fn adds_calendar_months() {
        let start = ts("2024-01-10T00:00:00Z");
        assert_eq!(add_months(start, 24), Some(ts("2026-01-10T00:00:00Z")));
        assert_eq!(add_months(start, 1), Some(ts("2024-02-10T00:00:00Z")));
    }

    #[test]
    fn month_end_is_clamped() {
        let start = ts("2024-01-31T12:00:00Z");
        assert_eq!(add_months(start, 1), Some(ts("2024-02-29T12:00:00Z")));
    }

    #[test]
    fn days_until_floors_at_zero() {
        let now = ts("2024-03-01T00:00:00Z");
        assert_eq!(days_until(now, ts("2024-03-11T06:00:00Z")), 10);
        assert_eq!(days_until(now, ts("2024-02-01T00:00:00Z")), 0);
    }

    #[test]
    fn describes_periods() {
        assert_eq!(describe_months(1), "1 month");
        assert_eq!(describe_months(6), "6 months");
        assert_eq!(describe_months(12), "1 year");
        assert_eq!(describe_months(24), "2 years");
        assert_eq!(describe_months(18), "1 year 6 months");
    }

    #[test]
    fn year_is_utc() {
        assert_eq!(utc_year(ts("2023-12-31T23:30:00Z")), 2023);
        assert_eq!(utc_year(ts("2024-01-01T00:00:00Z")), 2024);
    }
}
