//! Permissive publication-date parsing.
//!
//! Feeds publish dates in many shapes. [`parse_date`] walks an ordered list of
//! layouts (ISO-8601, RFC 822/2822, slash and dot variants) and returns the
//! first successful parse, normalized to UTC. Values without a zone are
//! taken to be UTC. Zone abbreviations chrono does not know are mapped
//! through [`ZONE_OFFSETS`]; a date carrying an unknown abbreviation is
//! rejected rather than read as UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

enum Layout {
    Rfc3339,
    Rfc2822,
    /// `strftime` layout that includes a numeric offset (`%z`).
    Zoned(&'static str),
    /// `strftime` layout with date and time but no zone.
    Naive(&'static str),
    /// `strftime` layout with a date only.
    Date(&'static str),
}

const LAYOUTS: &[Layout] = &[
    Layout::Rfc3339,
    Layout::Zoned("%Y-%m-%dT%H:%M:%S%.f%z"),
    Layout::Naive("%Y-%m-%dT%H:%M:%S%.f"),
    Layout::Zoned("%Y-%m-%d %H:%M:%S%.f%z"),
    Layout::Zoned("%Y-%m-%d %H:%M:%S%.f %z"),
    Layout::Naive("%Y-%m-%d %H:%M:%S%.f"),
    Layout::Date("%Y-%m-%d"),
    Layout::Rfc2822,
    Layout::Zoned("%a, %d %b %Y %H:%M:%S %z"),
    Layout::Zoned("%a, %d %b %Y %H:%M %z"),
    Layout::Naive("%a, %d %b %Y %H:%M:%S"),
    Layout::Zoned("%d %b %Y %H:%M:%S %z"),
    Layout::Naive("%d %b %Y %H:%M:%S"),
    Layout::Naive("%Y/%m/%d %H:%M:%S"),
    Layout::Date("%Y/%m/%d"),
    Layout::Naive("%m/%d/%Y %H:%M:%S"),
    Layout::Date("%m/%d/%Y"),
    Layout::Naive("%d.%m.%Y %H:%M:%S"),
    Layout::Date("%d.%m.%Y"),
];

/// Common zone abbreviations and their UTC offsets in minutes. Ambiguous
/// names (`IST`, `AST`) are left out on purpose.
const ZONE_OFFSETS: &[(&str, i32)] = &[
    ("UTC", 0),
    ("WET", 0),
    ("WEST", 60),
    ("BST", 60),
    ("CET", 60),
    ("MET", 60),
    ("CEST", 120),
    ("MEST", 120),
    ("EET", 120),
    ("EEST", 180),
    ("MSK", 180),
    ("HKT", 480),
    ("SGT", 480),
    ("AWST", 480),
    ("JST", 540),
    ("KST", 540),
    ("ACST", 570),
    ("AEST", 600),
    ("AEDT", 660),
    ("NZST", 720),
    ("NZDT", 780),
    ("HST", -600),
    ("AKST", -540),
    ("AKDT", -480),
    ("PST", -480),
    ("PDT", -420),
    ("MST", -420),
    ("MDT", -360),
    ("CST", -360),
    ("CDT", -300),
    ("EST", -300),
    ("EDT", -240),
];

static TRAILING_ZONE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+([A-Z]{1,5})$").expect("valid zone regex"));

static LEADING_ISO_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})(?:[T ](\d{1,2}):(\d{1,2})(?::(\d{1,2}))?)?")
        .expect("valid iso regex")
});

/// Parse a feed date string. Returns `None` when nothing matches.
pub fn parse_date(input: &str) -> Option<DateTime<Utc>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(parsed) = parse_with_layouts(trimmed) {
        return Some(parsed);
    }

    // Zone name chrono doesn't know ("CET", "JST"): swap in the numeric offset.
    if let Some(caps) = TRAILING_ZONE_NAME.captures(trimmed) {
        let minutes = zone_offset_minutes(&caps[1])?;
        let head = &trimmed[..caps.get(0)?.start()];
        return parse_with_layouts(&format!("{head} {}", numeric_offset(minutes)));
    }

    extract_leading_iso(trimmed)
}

fn zone_offset_minutes(name: &str) -> Option<i32> {
    ZONE_OFFSETS
        .iter()
        .find(|(zone, _)| *zone == name)
        .map(|(_, minutes)| *minutes)
}

/// `330` -> `"+0530"`, `-300` -> `"-0500"`.
fn numeric_offset(minutes: i32) -> String {
    let sign = if minutes < 0 { '-' } else { '+' };
    let minutes = minutes.abs();
    format!("{sign}{:02}{:02}", minutes / 60, minutes % 60)
}

fn parse_with_layouts(s: &str) -> Option<DateTime<Utc>> {
    LAYOUTS.iter().find_map(|layout| match layout {
        Layout::Rfc3339 => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Layout::Rfc2822 => DateTime::parse_from_rfc2822(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Layout::Zoned(fmt) => DateTime::parse_from_str(s, fmt)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Layout::Naive(fmt) => NaiveDateTime::parse_from_str(s, fmt)
            .ok()
            .map(|naive| naive.and_utc()),
        Layout::Date(fmt) => NaiveDate::parse_from_str(s, fmt)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc()),
    })
}

fn extract_leading_iso(s: &str) -> Option<DateTime<Utc>> {
    let caps = LEADING_ISO_DATE.captures(s)?;
    let num = |i: usize| -> Option<u32> { caps.get(i).and_then(|m| m.as_str().parse().ok()) };
    let year: i32 = caps.get(1)?.as_str().parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, num(2)?, num(3)?)?;
    let time =
        date.and_hms_opt(num(4).unwrap_or(0), num(5).unwrap_or(0), num(6).unwrap_or(0))?;
    Some(time.and_utc())
}

/// Whether a candidate dated `date` passes `threshold` (inclusive).
///
/// With no threshold every candidate passes. With a threshold, a candidate
/// whose date is unknown is rejected.
pub fn passes_threshold(
    date: Option<DateTime<Utc>>,
    threshold: Option<DateTime<Utc>>,
) -> bool {
    match (date, threshold) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(date), Some(threshold)) => date >= threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn test_parse_iso_variants() {
        assert_eq!(parse_date("2024-01-15T10:30:00Z"), Some(utc(2024, 1, 15, 10, 30, 0)));
        assert_eq!(parse_date("2024-01-15T12:30:00+02:00"), Some(utc(2024, 1, 15, 10, 30, 0)));
        assert_eq!(
            parse_date("2024-01-15T10:30:00.250Z").map(|d| d.timestamp()),
            Some(utc(2024, 1, 15, 10, 30, 0).timestamp())
        );
        assert_eq!(parse_date("2024-01-15T10:30:00"), Some(utc(2024, 1, 15, 10, 30, 0)));
        assert_eq!(parse_date("2024-01-15 10:30:00"), Some(utc(2024, 1, 15, 10, 30, 0)));
        assert_eq!(parse_date("2024-01-15"), Some(utc(2024, 1, 15, 0, 0, 0)));
    }

    #[test]
    fn test_parse_rfc822_variants() {
        assert_eq!(
            parse_date("Mon, 15 Jan 2024 10:30:00 +0000"),
            Some(utc(2024, 1, 15, 10, 30, 0))
        );
        assert_eq!(
            parse_date("Mon, 15 Jan 2024 10:30:00 GMT"),
            Some(utc(2024, 1, 15, 10, 30, 0))
        );
        assert_eq!(parse_date("15 Jan 2024 10:30:00 +0100"), Some(utc(2024, 1, 15, 9, 30, 0)));
    }

    #[test]
    fn test_parse_zone_abbreviations() {
        assert_eq!(
            parse_date("Mon, 15 Jan 2024 10:30:00 CET"),
            Some(utc(2024, 1, 15, 9, 30, 0))
        );
        assert_eq!(
            parse_date("Mon, 15 Jul 2024 10:30:00 CEST"),
            Some(utc(2024, 7, 15, 8, 30, 0))
        );
        assert_eq!(parse_date("Mon, 15 Jan 2024 10:30 JST"), Some(utc(2024, 1, 15, 1, 30, 0)));
        assert_eq!(parse_date("2024-01-15 10:30:00 UTC"), Some(utc(2024, 1, 15, 10, 30, 0)));
        assert_eq!(parse_date("Mon, 15 Jan 2024 10:30:00 EST"), Some(utc(2024, 1, 15, 15, 30, 0)));
        // Unknown abbreviation: rejected, not read as UTC.
        assert_eq!(parse_date("Mon, 15 Jan 2024 10:30:00 XYZ"), None);
        assert_eq!(parse_date("2024-01-15 10:30:00 IST"), None);
        assert_eq!(numeric_offset(330), "+0530");
        assert_eq!(numeric_offset(-300), "-0500");
    }

    #[test]
    fn test_parse_slash_and_dot_variants() {
        assert_eq!(parse_date("2024/01/15"), Some(utc(2024, 1, 15, 0, 0, 0)));
        assert_eq!(parse_date("2024/01/15 08:00:00"), Some(utc(2024, 1, 15, 8, 0, 0)));
        assert_eq!(parse_date("01/15/2024"), Some(utc(2024, 1, 15, 0, 0, 0)));
        assert_eq!(parse_date("15.01.2024"), Some(utc(2024, 1, 15, 0, 0, 0)));
    }

    #[test]
    fn test_parse_leading_iso_fallback() {
        assert_eq!(parse_date("2024-01-15T10:30 (updated)"), Some(utc(2024, 1, 15, 10, 30, 0)));
    }

    #[test]
    fn test_parse_garbage() {
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("   "), None);
        assert_eq!(parse_date("yesterday afternoon"), None);
        assert_eq!(parse_date("2024-13-45"), None);
    }

    #[test]
    fn test_passes_threshold() {
        let threshold = Some(utc(2024, 1, 1, 0, 0, 0));
        assert!(passes_threshold(Some(utc(2024, 1, 1, 0, 0, 0)), threshold));
        assert!(passes_threshold(Some(utc(2024, 6, 1, 0, 0, 0)), threshold));
        assert!(!passes_threshold(Some(utc(2023, 12, 31, 23, 59, 59)), threshold));
        assert!(!passes_threshold(None, threshold));
        assert!(passes_threshold(None, None));
    }
}
