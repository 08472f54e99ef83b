//! Cutoff date parsing and the safety boundary.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use regex::Regex;

use super::error::{RetentionError, RetentionResult};

static DATE_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("static regex is valid"));

/// Parse a strict `YYYY-MM-DD` date into UTC midnight.
///
/// Anything else, including real-looking dates in other layouts and
/// impossible calendar dates, is a validation error.
pub fn normalize_cutoff(input: &str) -> RetentionResult<DateTime<Utc>> {
    if !DATE_FORMAT.is_match(input) {
        return Err(RetentionError::Validation(format!(
            "Invalid cutoff date '{}': expected YYYY-MM-DD",
            input
        )));
    }

    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d").map_err(|_| {
        RetentionError::Validation(format!("Invalid cutoff date '{}': no such day", input))
    })?;

    Ok(date.and_time(chrono::NaiveTime::MIN).and_utc())
}

/// Start of the calendar month containing `now`, in UTC.
pub fn safety_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    // Day 1 at midnight always exists.
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

/// Reject cutoffs on or after the start of the current UTC month.
pub fn ensure_before_boundary(cutoff: DateTime<Utc>, now: DateTime<Utc>) -> RetentionResult<()> {
    let boundary = safety_boundary(now);
    if cutoff >= boundary {
        return Err(RetentionError::SafetyViolation(format!(
            "Cutoff {} must be before {}: data from the current month cannot be pruned",
            cutoff.format("%Y-%m-%d"),
            boundary.format("%Y-%m-%d")
        )));
    }
    Ok(())
}
