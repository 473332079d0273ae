//! ISO-8601 helpers.
//!
//! All persisted timestamps are UTC with second precision and a trailing `Z`
//! (`2026-02-22T12:00:00Z`). Parsing is lenient: offsets are normalised to
//! UTC and naive timestamps are assumed to already be UTC.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid ISO-8601 timestamp: '{0}'")]
pub struct TimestampError(pub String);

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// Parse an ISO-8601 timestamp into UTC.
pub fn parse_iso8601(value: &str) -> Result<DateTime<Utc>, TimestampError> {
    let normalized = value.trim();
    if normalized.is_empty() {
        return Err(TimestampError(value.to_string()));
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(normalized) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(normalized, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(TimestampError(value.to_string()))
}

/// Format a timestamp in the canonical `%Y-%m-%dT%H:%M:%SZ` form.
pub fn format_iso8601(value: DateTime<Utc>) -> String {
    value.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Re-render a timestamp string in canonical form.
pub fn normalize_iso8601(value: &str) -> Result<String, TimestampError> {
    parse_iso8601(value).map(format_iso8601)
}

/// Move a watermark back by the lookback window.
///
/// Only used to compute the next fetch-since value; the persisted watermark
/// never moves backwards.
pub fn subtract_lookback(watermark: DateTime<Utc>, lookback_secs: u64) -> DateTime<Utc> {
    let secs = i64::try_from(lookback_secs).unwrap_or(i64::MAX);
    watermark
        .checked_sub_signed(Duration::seconds(secs))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Source of "now" for anything that stamps files or audit entries.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    fn now_iso(&self) -> String {
        format_iso8601(self.now())
    }
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
