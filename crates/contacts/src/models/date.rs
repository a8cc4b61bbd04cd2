//! vCard date and timestamp encodings
//!
//! Dates are stored as `YYYYMMDD` when the year is known and `--MMDD`
//! otherwise. Timestamps (REV, X-LAST-SYNCED) are UTC with second precision.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// A calendar date that may lack a year
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialDate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    pub month: u32,
    pub day: u32,
}

/// Encode a date. Dates missing the month or day are dropped.
pub fn format_date(year: i32, month: u32, day: u32) -> Option<String> {
    if month == 0 || day == 0 {
        return None;
    }
    if year > 0 {
        Some(format!("{:04}{:02}{:02}", year, month, day))
    } else {
        Some(format!("--{:02}{:02}", month, day))
    }
}

/// Decode `YYYYMMDD` or `--MMDD` (dashes are ignored).
///
/// After stripping dashes the value must be exactly 8 digits for a full
/// date or exactly 4 digits for a month/day, and must name a real date.
pub fn parse_date(value: &str) -> Option<PartialDate> {
    let digits: String = value.chars().filter(|c| *c != '-').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    match digits.len() {
        8 => {
            let date = NaiveDate::parse_from_str(&digits, "%Y%m%d").ok()?;
            Some(PartialDate {
                year: Some(date.year()),
                month: date.month(),
                day: date.day(),
            })
        }
        4 => {
            let month: u32 = digits[..2].parse().ok()?;
            let day: u32 = digits[2..].parse().ok()?;
            // 2000 is a leap year, so Feb 29 stays valid
            NaiveDate::from_ymd_opt(2000, month, day)?;
            Some(PartialDate {
                year: None,
                month,
                day,
            })
        }
        _ => None,
    }
}

/// Format a timestamp as `YYYYMMDDTHHMMSSZ`
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a `YYYYMMDDTHHMMSSZ` timestamp
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
