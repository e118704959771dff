//! Timestamp and interval parsing for STAC temporal extents
//!
//! Remote catalogs are inconsistent about timestamp formatting, so parsing
//! tries a fixed list of variants in order and keeps the first match:
//!
//! 1. RFC 3339 with offset: `2021-01-01T00:00:00Z`, `2021-01-01T00:00:00+02:00`
//! 2. RFC 3339 with fraction and offset: `2021-01-01T00:00:00.123456Z`
//! 3. Fraction without offset, read as UTC: `2021-01-01T00:00:00.123456`
//!
//! Anything else is a [`Error::ConvertingTimestamp`].

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Marker for an open interval bound
pub const OPEN_BOUND: &str = "..";

/// Accepted timestamp layouts, in the order they are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampFormat {
    Rfc3339WithOffset,
    Rfc3339WithFractionAndOffset,
    FractionNoOffset,
}

impl TimestampFormat {
    /// All variants in parse order
    pub const ALL: [TimestampFormat; 3] = [
        Self::Rfc3339WithOffset,
        Self::Rfc3339WithFractionAndOffset,
        Self::FractionNoOffset,
    ];

    fn pattern(&self) -> &'static str {
        match self {
            Self::Rfc3339WithOffset => "%Y-%m-%dT%H:%M:%S%z",
            Self::Rfc3339WithFractionAndOffset => "%Y-%m-%dT%H:%M:%S%.f%z",
            Self::FractionNoOffset => "%Y-%m-%dT%H:%M:%S%.f",
        }
    }

    /// Try to parse `input` with this layout
    pub fn parse(&self, input: &str) -> Option<DateTime<Utc>> {
        match self {
            Self::Rfc3339WithOffset | Self::Rfc3339WithFractionAndOffset => {
                let normalized = normalize_zulu(input);
                DateTime::parse_from_str(&normalized, self.pattern())
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }
            Self::FractionNoOffset => NaiveDateTime::parse_from_str(input, self.pattern())
                .ok()
                .map(|naive| naive.and_utc()),
        }
    }

    /// Render `instant` in this layout
    pub fn format(&self, instant: &DateTime<Utc>) -> String {
        match self {
            Self::Rfc3339WithOffset => instant.to_rfc3339_opts(SecondsFormat::Secs, true),
            Self::Rfc3339WithFractionAndOffset => {
                instant.to_rfc3339_opts(SecondsFormat::Micros, true)
            }
            Self::FractionNoOffset => instant.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        }
    }
}

// chrono's %z does not take a literal Z, STAC servers emit it constantly
fn normalize_zulu(input: &str) -> String {
    match input.strip_suffix(['Z', 'z']) {
        Some(head) => format!("{head}+00:00"),
        None => input.to_string(),
    }
}

/// Parse a single timestamp, first matching layout wins
pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>> {
    let trimmed = input.trim();
    TimestampFormat::ALL
        .iter()
        .find_map(|fmt| fmt.parse(trimmed))
        .ok_or_else(|| Error::ConvertingTimestamp(input.to_string()))
}

/// Parse an optional timestamp where `null`, empty and `..` mean open
pub fn parse_optional_timestamp(input: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    match input.map(str::trim) {
        None | Some("") | Some(OPEN_BOUND) => Ok(None),
        Some(value) => parse_timestamp(value).map(Some),
    }
}

/// Storage encoding: fixed width UTC with microseconds, so text order is time order
pub fn to_storage(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Inverse of [`to_storage`]
pub fn from_storage(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| Error::ConvertingTimestamp(value.to_string()))
}

/// Time interval with optional bounds (`None` = unbounded on that side)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeInterval {
    /// Fully open interval
    pub fn open() -> Self {
        Self::default()
    }

    /// Parse `"<start>/<end>"`; either side may be empty or `..`
    pub fn parse(input: &str) -> Result<Self> {
        let parts: Vec<&str> = input.split('/').collect();
        if parts.len() != 2 {
            return Err(Error::ConvertingTimestamp(format!(
                "'{input}': expected two timestamps separated by '/', use '..' for open ranges"
            )));
        }
        Ok(Self {
            start: parse_optional_timestamp(Some(parts[0]))?,
            end: parse_optional_timestamp(Some(parts[1]))?,
        })
    }

    /// Interval overlap; an open bound always satisfies its side
    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        let end_ok = match (self.end, other.start) {
            (Some(end), Some(start)) => end >= start,
            _ => true,
        };
        let start_ok = match (self.start, other.end) {
            (Some(start), Some(end)) => start <= end,
            _ => true,
        };
        end_ok && start_ok
    }
}

impl std::fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let side = |v: &Option<DateTime<Utc>>| {
            v.as_ref()
                .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
                .unwrap_or_else(|| OPEN_BOUND.to_string())
        };
        write!(f, "{}/{}", side(&self.start), side(&self.end))
    }
}

/// Validate a STAC `datetime` search value: a single instant or an interval
pub fn validate_datetime_filter(value: &str) -> Result<()> {
    if value.contains('/') {
        TimeInterval::parse(value).map(|_| ())
    } else {
        parse_timestamp(value).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 5, 5, 12, 30, 15).unwrap()
            + chrono::Duration::microseconds(250_000)
    }

    #[test]
    fn test_parse_rfc3339_variants() {
        let zulu = parse_timestamp("2021-01-01T00:00:00Z").unwrap();
        assert_eq!(zulu, Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap());

        let offset = parse_timestamp("2021-01-01T02:00:00+02:00").unwrap();
        assert_eq!(offset, zulu);

        let compact = parse_timestamp("2021-01-01T02:00:00+0200").unwrap();
        assert_eq!(compact, zulu);
    }

    #[test]
    fn test_parse_fraction_variants() {
        let with_offset = parse_timestamp("2021-05-05T12:30:15.25Z").unwrap();
        let without_offset = parse_timestamp("2021-05-05T12:30:15.250000").unwrap();
        assert_eq!(with_offset, instant());
        assert_eq!(without_offset, instant());
    }

    #[test]
    fn test_format_roundtrip_each_variant() {
        let whole_seconds = Utc.with_ymd_and_hms(2021, 5, 5, 12, 30, 15).unwrap();
        for fmt in TimestampFormat::ALL {
            let expected = match fmt {
                TimestampFormat::Rfc3339WithOffset => whole_seconds,
                _ => instant(),
            };
            let rendered = fmt.format(&expected);
            let parsed = parse_timestamp(&rendered).unwrap();
            assert_eq!(parsed, expected, "variant {fmt:?} rendered as {rendered}");
            assert_eq!(from_storage(&to_storage(&parsed)).unwrap(), expected);
        }
    }

    #[test]
    fn test_unparseable_timestamp() {
        assert!(matches!(
            parse_timestamp("05/05/2021"),
            Err(Error::ConvertingTimestamp(_))
        ));
        assert!(parse_timestamp("2021-13-01T00:00:00Z").is_err());
    }

    #[test]
    fn test_storage_encoding_sorts_chronologically() {
        let a = to_storage(&Utc.with_ymd_and_hms(2020, 12, 31, 23, 59, 59).unwrap());
        let b = to_storage(&Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap());
        assert!(a < b);
    }

    #[test]
    fn test_interval_open_bounds() {
        let interval = TimeInterval::parse("2021-01-01T00:00:00Z/..").unwrap();
        assert!(interval.start.is_some());
        assert!(interval.end.is_none());

        let interval = TimeInterval::parse("/2021-01-01T00:00:00Z").unwrap();
        assert!(interval.start.is_none());
        assert!(interval.end.is_some());

        assert_eq!(TimeInterval::parse("../..").unwrap(), TimeInterval::open());
    }

    #[test]
    fn test_interval_requires_separator() {
        assert!(matches!(
            TimeInterval::parse("2021-01-01T00:00:00Z"),
            Err(Error::ConvertingTimestamp(_))
        ));
        assert!(TimeInterval::parse("a/b/c").is_err());
    }

    #[test]
    fn test_overlap_rule() {
        let query = TimeInterval::parse("2021-01-01T00:00:00Z/..").unwrap();

        let ended_before = TimeInterval::parse("2019-01-01T00:00:00Z/2020-12-31T00:00:00Z").unwrap();
        let still_running = TimeInterval::parse("2019-01-01T00:00:00Z/..").unwrap();
        let ends_after = TimeInterval::parse("2019-01-01T00:00:00Z/2021-06-01T00:00:00Z").unwrap();

        assert!(!ended_before.overlaps(&query));
        assert!(still_running.overlaps(&query));
        assert!(ends_after.overlaps(&query));
        assert!(TimeInterval::open().overlaps(&query));
    }

    #[test]
    fn test_display_uses_open_marker() {
        let interval = TimeInterval::parse("2021-01-01T00:00:00Z/").unwrap();
        assert_eq!(interval.to_string(), "2021-01-01T00:00:00Z/..");
    }

    #[test]
    fn test_validate_datetime_filter() {
        assert!(validate_datetime_filter("2021-05-05T00:00:00Z/2022-05-05T00:00:00Z").is_ok());
        assert!(validate_datetime_filter("2021-05-05T00:00:00Z").is_ok());
        assert!(validate_datetime_filter("yesterday").is_err());
    }
}
