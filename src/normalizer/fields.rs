//! Typed access to schema-free raw record fields.
//!
//! Field names are matched case-insensitively against a list of aliases; the
//! first alias names the field in error reports.

use std::net::IpAddr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;

use crate::error::MalformedRecord;
use crate::models::{RawRecord, SourceKind};

const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Parses the timestamp formats seen across security exports.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Maps free-form severity labels onto critical/high/medium/low/info.
pub fn normalize_severity(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    match lower.as_str() {
        "critical" | "crit" | "severe" | "p0" => "critical",
        "high" | "important" | "p1" => "high",
        "medium" | "moderate" | "med" | "warning" | "p2" => "medium",
        "low" | "minor" | "p3" => "low",
        "info" | "informational" | "none" | "p4" => "info",
        _ => return lower,
    }
    .to_string()
}

/// Maps sign-in outcome labels onto failed/success/blocked.
pub fn normalize_status(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    match lower.as_str() {
        "failed" | "failure" | "fail" | "error" | "denied" => "failed",
        "success" | "succeeded" | "successful" | "ok" => "success",
        "blocked" | "locked" | "interrupted" => "blocked",
        _ => return lower,
    }
    .to_string()
}

/// A view over one raw record, reporting problems against its position.
pub struct RecordFields<'a> {
    source: SourceKind,
    index: usize,
    record: &'a RawRecord,
}

impl<'a> RecordFields<'a> {
    pub fn new(source: SourceKind, index: usize, record: &'a RawRecord) -> Self {
        Self {
            source,
            index,
            record,
        }
    }

    pub fn source(&self) -> SourceKind {
        self.source
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Builds a [`MalformedRecord`] for this record.
    pub fn malformed(&self, field: &str, reason: impl Into<String>) -> MalformedRecord {
        MalformedRecord {
            source: self.source,
            index: self.index,
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// First non-empty value under any alias.
    fn lookup(&self, aliases: &[&str]) -> Option<&'a JsonValue> {
        aliases.iter().find_map(|alias| {
            self.record
                .iter()
                .find(|(key, _)| key.trim().eq_ignore_ascii_case(alias))
                .map(|(_, value)| value)
                .filter(|value| !is_blank(value))
        })
    }

    /// Scalar value rendered as trimmed text.
    pub fn text(&self, aliases: &[&str]) -> Option<String> {
        self.lookup(aliases).and_then(|value| match value {
            JsonValue::String(s) => Some(s.trim().to_string()),
            JsonValue::Number(n) => Some(n.to_string()),
            JsonValue::Bool(b) => Some(b.to_string()),
            _ => None,
        })
    }

    pub fn required_text(&self, aliases: &[&str]) -> Result<String, MalformedRecord> {
        match self.lookup(aliases) {
            None => Err(self.malformed(aliases[0], "is missing")),
            Some(_) => self
                .text(aliases)
                .ok_or_else(|| self.malformed(aliases[0], "is not a scalar value")),
        }
    }

    /// A list given either as a JSON array or a comma/semicolon separated string.
    pub fn list(&self, aliases: &[&str]) -> Option<Vec<String>> {
        let items: Vec<String> = match self.lookup(aliases)? {
            JsonValue::Array(values) => values
                .iter()
                .filter_map(|v| match v {
                    JsonValue::String(s) => Some(s.trim().to_string()),
                    JsonValue::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            JsonValue::String(s) => s
                .split([',', ';'])
                .map(|part| part.trim().to_string())
                .collect(),
            _ => return None,
        };
        let items: Vec<String> = items.into_iter().filter(|s| !s.is_empty()).collect();
        (!items.is_empty()).then_some(items)
    }

    pub fn timestamp(&self, aliases: &[&str]) -> Result<Option<DateTime<Utc>>, MalformedRecord> {
        match self.text(aliases) {
            None => Ok(None),
            Some(raw) => parse_timestamp(&raw)
                .map(Some)
                .ok_or_else(|| self.malformed(aliases[0], format!("has invalid timestamp '{}'", raw))),
        }
    }

    pub fn float(&self, aliases: &[&str]) -> Result<Option<f64>, MalformedRecord> {
        match self.lookup(aliases) {
            None => Ok(None),
            Some(JsonValue::Number(n)) => Ok(n.as_f64()),
            Some(JsonValue::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| self.malformed(aliases[0], format!("is not a number: '{}'", s))),
            Some(_) => Err(self.malformed(aliases[0], "is not a number")),
        }
    }

    pub fn boolean(&self, aliases: &[&str]) -> Result<Option<bool>, MalformedRecord> {
        match self.lookup(aliases) {
            None => Ok(None),
            Some(JsonValue::Bool(b)) => Ok(Some(*b)),
            Some(JsonValue::Number(n)) => Ok(Some(n.as_i64() == Some(1))),
            Some(JsonValue::String(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "1" | "y" => Ok(Some(true)),
                "false" | "no" | "0" | "n" => Ok(Some(false)),
                other => Err(self.malformed(aliases[0], format!("is not a boolean: '{}'", other))),
            },
            Some(_) => Err(self.malformed(aliases[0], "is not a boolean")),
        }
    }

    /// An IP address in canonical textual form.
    pub fn ip(&self, aliases: &[&str]) -> Result<Option<String>, MalformedRecord> {
        match self.text(aliases) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<IpAddr>()
                .map(|ip| Some(ip.to_string()))
                .map_err(|_| self.malformed(aliases[0], format!("is not an IP address: '{}'", raw))),
        }
    }
}

fn is_blank(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::String(s) => s.trim().is_empty(),
        JsonValue::Array(items) => items.is_empty(),
        _ => false,
    }
}
