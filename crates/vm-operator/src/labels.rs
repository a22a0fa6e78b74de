use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::{Error, Result};

/// Label holding a server's absolute expiry time.
pub const DELETE_AFTER_LABEL: &str = "delete_after";

/// Formats carrying an explicit UTC offset.
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y%m%dT%H%M%S%z",
];

/// Formats without an offset. These are read as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y%m%dT%H%M%S",
    "%Y%m%dT%H%M",
];

/// Hour-only forms, completed with zero minutes before parsing.
const HOUR_FORMATS: &[(&str, &str)] = &[("%Y-%m-%dT%H:%M", ":00"), ("%Y%m%dT%H%M", "00")];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y%m%d"];

/// A single `key=value` ownership selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSelector {
    pub key: String,
    pub value: String,
}

impl LabelSelector {
    /// Parse `key=value`, splitting on the first `=`.
    pub fn parse(raw: &str) -> Result<Self> {
        let (key, value) = raw
            .split_once('=')
            .ok_or_else(|| Error::InvalidSelector(format!("expected key=value, got {raw:?}")))?;

        if key.is_empty() {
            return Err(Error::InvalidSelector(format!("empty key in {raw:?}")));
        }

        Ok(Self {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        labels.get(&self.key).is_some_and(|v| *v == self.value)
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

impl FromStr for LabelSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Parse repeated `key=value` arguments into a label map. Later keys win.
pub fn parse_label_pairs<S: AsRef<str>>(pairs: &[S]) -> Result<HashMap<String, String>> {
    pairs
        .iter()
        .map(|raw| LabelSelector::parse(raw.as_ref()).map(|s| (s.key, s.value)))
        .collect()
}

/// Parse a `delete_after` label value.
///
/// Accepts ISO-8601 in extended or basic form, down to hour precision.
/// Values without an offset are taken as UTC; a bare date means midnight UTC.
/// Returns `None` for anything else.
pub fn parse_delete_after(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }

    for fmt in OFFSET_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(value, fmt) {
            return Some(ts.with_timezone(&Utc));
        }
    }

    // Basic form is commonly written with a trailing Z.
    let naive = value.strip_suffix('Z').unwrap_or(value);

    for fmt in NAIVE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Some(ts.and_utc());
        }
    }

    let hour_only = naive
        .split_once('T')
        .is_some_and(|(_, hour)| hour.len() == 2 && hour.bytes().all(|b| b.is_ascii_digit()));
    if hour_only {
        for (fmt, minutes) in HOUR_FORMATS {
            if let Ok(ts) = NaiveDateTime::parse_from_str(&format!("{naive}{minutes}"), fmt) {
                return Some(ts.and_utc());
            }
        }
    }

    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|ts| ts.and_utc());
        }
    }

    None
}

/// Render an expiry time as a label-safe value (`YYYYMMDDTHHMMSSZ`).
///
/// Hetzner label values may not contain `:`, so the extended form cannot be
/// stored directly.
pub fn delete_after_value(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn selector_splits_on_first_equals() {
        let sel = LabelSelector::parse("query=a=b").unwrap();
        assert_eq!(sel.key, "query");
        assert_eq!(sel.value, "a=b");
        assert_eq!(sel.to_string(), "query=a=b");
    }

    #[test]
    fn selector_allows_empty_value() {
        let sel: LabelSelector = "env=".parse().unwrap();
        assert_eq!(sel.value, "");
    }

    #[test]
    fn selector_rejects_missing_separator_and_empty_key() {
        assert!(matches!(
            LabelSelector::parse("env"),
            Err(Error::InvalidSelector(_))
        ));
        assert!(matches!(
            LabelSelector::parse("=scan"),
            Err(Error::InvalidSelector(_))
        ));
    }

    #[test]
    fn selector_matches_exact_value_only() {
        let sel = LabelSelector::parse("env=scan").unwrap();
        let mut labels = HashMap::new();
        assert!(!sel.matches(&labels));

        labels.insert("env".to_string(), "scanner".to_string());
        assert!(!sel.matches(&labels));

        labels.insert("env".to_string(), "scan".to_string());
        assert!(sel.matches(&labels));
    }

    #[test]
    fn label_pairs_collect_into_map() {
        let labels = parse_label_pairs(&["env=scan", "owner=masscan", "env=prod"]).unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels["env"], "prod");
        assert_eq!(labels["owner"], "masscan");

        assert!(parse_label_pairs(&["broken"]).is_err());
    }

    #[test]
    fn naive_timestamps_are_utc() {
        assert_eq!(
            parse_delete_after("2020-01-01T00:00:00"),
            Some(utc(2020, 1, 1, 0, 0, 0))
        );
        assert_eq!(
            parse_delete_after("2020-01-01 12:30:15.250"),
            Some(utc(2020, 1, 1, 12, 30, 15) + chrono::Duration::milliseconds(250))
        );
        assert_eq!(
            parse_delete_after("2020-01-01T08:15"),
            Some(utc(2020, 1, 1, 8, 15, 0))
        );
    }

    #[test]
    fn offsets_are_converted_to_utc() {
        assert_eq!(
            parse_delete_after("2020-01-01T02:00:00+02:00"),
            Some(utc(2020, 1, 1, 0, 0, 0))
        );
        assert_eq!(
            parse_delete_after("2020-01-01T00:00:00Z"),
            Some(utc(2020, 1, 1, 0, 0, 0))
        );
        assert_eq!(
            parse_delete_after("2019-12-31 19:00:00-05:00"),
            Some(utc(2020, 1, 1, 0, 0, 0))
        );
    }

    #[test]
    fn basic_format_and_dates() {
        assert_eq!(
            parse_delete_after("20200101T103000Z"),
            Some(utc(2020, 1, 1, 10, 30, 0))
        );
        assert_eq!(
            parse_delete_after("20200101T103000"),
            Some(utc(2020, 1, 1, 10, 30, 0))
        );
        assert_eq!(
            parse_delete_after("20200101T1030"),
            Some(utc(2020, 1, 1, 10, 30, 0))
        );
        assert_eq!(
            parse_delete_after("20200101T1030Z"),
            Some(utc(2020, 1, 1, 10, 30, 0))
        );
        assert_eq!(
            parse_delete_after("20200101T10"),
            Some(utc(2020, 1, 1, 10, 0, 0))
        );
        assert_eq!(
            parse_delete_after("20200101T10Z"),
            Some(utc(2020, 1, 1, 10, 0, 0))
        );
        assert_eq!(
            parse_delete_after("2020-01-01T10"),
            Some(utc(2020, 1, 1, 10, 0, 0))
        );
        assert_eq!(
            parse_delete_after("2020-01-01T10Z"),
            Some(utc(2020, 1, 1, 10, 0, 0))
        );
        assert_eq!(
            parse_delete_after("2020-01-01"),
            Some(utc(2020, 1, 1, 0, 0, 0))
        );
        assert_eq!(
            parse_delete_after("20200101"),
            Some(utc(2020, 1, 1, 0, 0, 0))
        );
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(parse_delete_after("tomorrow"), None);
        assert_eq!(parse_delete_after(""), None);
        assert_eq!(parse_delete_after("2020-13-01T00:00:00"), None);
        assert_eq!(parse_delete_after("2020-01-01T25"), None);
        assert_eq!(parse_delete_after("20200101T1"), None);
    }

    #[test]
    fn rendered_value_parses_back() {
        let at = utc(2026, 10, 16, 9, 5, 7);
        let value = delete_after_value(at);
        assert_eq!(value, "20261016T090507Z");
        assert!(!value.contains(':'));
        assert_eq!(parse_delete_after(&value), Some(at));
    }
}
