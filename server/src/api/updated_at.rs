//! `updated_at` wire format: RFC 3339, UTC, exactly millisecond precision
//! (`2024-06-01T12:34:56.789Z`).

use std::sync::LazyLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::Serializer;

use crate::error::{DomainError, DomainResult};

static UPDATED_AT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{3}Z$").expect("valid regex")
});

/// Parses a client watermark.
pub fn parse_updated_at(raw: &str) -> DomainResult<DateTime<Utc>> {
    let raw = raw.trim();
    if !UPDATED_AT_REGEX.is_match(raw) {
        return Err(DomainError::InvalidUpdatedAt);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| DomainError::InvalidUpdatedAt)
}

/// Parses an optional watermark; blank counts as absent.
pub fn parse_optional_updated_at(raw: Option<&str>) -> DomainResult<Option<DateTime<Utc>>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_updated_at(value).map(Some),
    }
}

pub fn format_updated_at(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `serialize_with` helper so clients can echo watermarks back verbatim.
pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_updated_at(*ts))
}

pub fn serialize_option<S: Serializer>(
    ts: &Option<DateTime<Utc>>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match ts {
        Some(ts) => serialize(ts, s),
        None => s.serialize_none(),
    }
}
