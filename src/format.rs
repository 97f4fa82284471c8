//! Display formatting for timestamps and durations

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Mirrors the en-US `toLocaleString()` rendering, e.g. `1/1/2024, 12:00:00 AM`
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%-m/%-d/%Y, %-I:%M:%S %p";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeZoneChoice {
    #[default]
    Local,
    Utc,
}

/// Renders instants for "last seen" fields
#[derive(Debug, Clone)]
pub struct TimestampFormatter {
    time_zone: TimeZoneChoice,
    pattern: String,
}

impl Default for TimestampFormatter {
    fn default() -> Self {
        Self {
            time_zone: TimeZoneChoice::Local,
            pattern: DEFAULT_TIMESTAMP_FORMAT.to_string(),
        }
    }
}

impl TimestampFormatter {
    /// Falls back to [`DEFAULT_TIMESTAMP_FORMAT`] when `pattern` has an
    /// invalid strftime specifier.
    pub fn new(time_zone: TimeZoneChoice, pattern: &str) -> Self {
        let pattern = if is_valid_pattern(pattern) {
            pattern.to_string()
        } else {
            tracing::warn!("Invalid timestamp format {:?}, using default", pattern);
            DEFAULT_TIMESTAMP_FORMAT.to_string()
        };
        Self { time_zone, pattern }
    }

    pub fn format(&self, instant: &DateTime<Utc>) -> String {
        let mut out = String::new();
        let written = match self.time_zone {
            TimeZoneChoice::Local => write!(out, "{}", instant.with_timezone(&Local).format(&self.pattern)),
            TimeZoneChoice::Utc => write!(out, "{}", instant.format(&self.pattern)),
        };
        if written.is_err() {
            return instant.to_rfc3339();
        }
        out
    }
}

fn is_valid_pattern(pattern: &str) -> bool {
    !pattern.is_empty() && !StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error))
}

/// Parse an ISO-8601 timestamp. Values without an offset are taken as UTC,
/// which is how the status server writes `last_ping`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Format a duration like `2h 5m 9s`, `5m 9s` or `9s`
pub fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let secs = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(59), "59s");
        assert_eq!(format_duration(60), "1m 0s");
        assert_eq!(format_duration(3599), "59m 59s");
        assert_eq!(format_duration(3600), "1h 0m 0s");
        assert_eq!(format_duration(7509), "2h 5m 9s");
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-01T00:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T01:00:00+01:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T00:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01 00:00:00.000"), Some(expected));
        assert_eq!(
            parse_timestamp("2024-01-01T00:00:00.250000"),
            Some(expected + chrono::Duration::milliseconds(250))
        );
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_utc_formatter() {
        let formatter = TimestampFormatter::new(TimeZoneChoice::Utc, DEFAULT_TIMESTAMP_FORMAT);
        let instant = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(formatter.format(&instant), "1/1/2024, 12:00:00 AM");

        let iso = TimestampFormatter::new(TimeZoneChoice::Utc, "%Y-%m-%d %H:%M");
        assert_eq!(iso.format(&instant), "2024-01-01 00:00");
    }

    #[test]
    fn test_invalid_pattern_falls_back() {
        let formatter = TimestampFormatter::new(TimeZoneChoice::Utc, "broken %");
        let instant = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        assert_eq!(formatter.format(&instant), "3/5/2024, 2:07:09 PM");
    }
}
