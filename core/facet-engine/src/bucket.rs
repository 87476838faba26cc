//! FILENAME: core/facet-engine/src/bucket.rs
//! Date bucketing.
//!
//! Pure functions of (value, granularity). They produce exactly the labels the
//! compiled SQL bucket expressions produce, so in-memory sources and the
//! relational store agree on every bucket.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};

use crate::definition::TimeFormat;

pub const MONTH_NAMES: [&str; 12] = [
    "January", "February", "March", "April", "May", "June",
    "July", "August", "September", "October", "November", "December",
];

/// Quarter label for a 1-based month: `"Q" + ((month - 1) div 3 + 1)`.
pub fn quarter_label(month: u32) -> String {
    format!("Q{}", (month.saturating_sub(1)) / 3 + 1)
}

/// Parses the date portion of a stored timestamp.
///
/// Accepts plain dates, `T`- or space-separated date-times with optional
/// fractional seconds, and RFC 3339 timestamps (normalized to UTC).
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(stamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(stamp.with_timezone(&Utc).date_naive());
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(stamp) = NaiveDateTime::parse_from_str(raw, pattern) {
            return Some(stamp.date());
        }
    }
    None
}

/// Display label of the bucket `date` falls into.
pub fn bucket_date(date: NaiveDate, format: TimeFormat) -> String {
    match format {
        TimeFormat::Year => date.format("%Y").to_string(),
        TimeFormat::Quarter => quarter_label(date.month()),
        TimeFormat::Month => date.format("%Y-%m").to_string(),
        TimeFormat::MonthName => MONTH_NAMES[date.month0() as usize].to_string(),
        TimeFormat::Week => date.format("%Y-W%W").to_string(),
        TimeFormat::Day => date.format("%Y-%m-%d").to_string(),
    }
}

/// Numeric ordering key for buckets whose display order is not lexical.
/// Month names order by month number; every other label sorts as text.
pub fn bucket_order(date: NaiveDate, format: TimeFormat) -> Option<u32> {
    match format {
        TimeFormat::MonthName => Some(date.month()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_quarter_bucketing() {
        assert_eq!(bucket_date(date(2024, 3, 15), TimeFormat::Quarter), "Q1");
        assert_eq!(bucket_date(date(2024, 7, 1), TimeFormat::Quarter), "Q3");
        assert_eq!(bucket_date(date(2024, 12, 31), TimeFormat::Quarter), "Q4");
        assert_eq!(quarter_label(4), "Q2");
    }

    #[test]
    fn test_month_name_orders_numerically() {
        let march = date(2024, 3, 1);
        let august = date(2024, 8, 1);
        assert_eq!(bucket_date(march, TimeFormat::MonthName), "March");
        assert_eq!(bucket_date(august, TimeFormat::MonthName), "August");
        // "August" < "March" lexically, but March comes first.
        assert!(bucket_order(march, TimeFormat::MonthName) < bucket_order(august, TimeFormat::MonthName));
        assert_eq!(bucket_order(march, TimeFormat::Year), None);
    }

    #[test]
    fn test_other_granularities() {
        let d = date(2024, 3, 5);
        assert_eq!(bucket_date(d, TimeFormat::Year), "2024");
        assert_eq!(bucket_date(d, TimeFormat::Month), "2024-03");
        assert_eq!(bucket_date(d, TimeFormat::Day), "2024-03-05");
        // %W: Monday-based week of year, days before the first Monday are week 00.
        assert_eq!(bucket_date(date(2024, 1, 1), TimeFormat::Week), "2024-W01");
        assert_eq!(bucket_date(date(2023, 1, 1), TimeFormat::Week), "2023-W00");
    }

    #[test]
    fn test_parse_date_variants() {
        assert_eq!(parse_date("2024-03-05"), Some(date(2024, 3, 5)));
        assert_eq!(parse_date("2024-03-05 10:30:00"), Some(date(2024, 3, 5)));
        assert_eq!(parse_date("2024-03-05T10:30:00.250"), Some(date(2024, 3, 5)));
        assert_eq!(parse_date("2024-03-31T23:00:00-05:00"), Some(date(2024, 4, 1)));
        assert_eq!(parse_date("not a date"), None);
        assert_eq!(parse_date(""), None);
    }
}
