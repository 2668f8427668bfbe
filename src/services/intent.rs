//! Lightweight constraints parsed from an investigation question.
//!
//! Similarity alone cannot tell a failed sign-in from a successful one, or
//! last week's event from last year's. The intent carries the handful of
//! hard constraints a question states explicitly, plus the entities it
//! names outright.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use chrono::{DateTime, TimeDelta, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::models::{Entity, EntityType};

static STATUS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(failed|failure|failures|unsuccessful|successful|succeeded|blocked)\b")
        .unwrap()
});

static SEVERITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(critical|high|medium|low)\b").unwrap());

static WINDOW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:last|past|previous)\s+(\d+)\s+(minute|hour|day|week)s?\b").unwrap()
});

static UNIT_WINDOW_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:last|past)\s+(hour|day|week)\b").unwrap());

static TODAY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\btoday\b").unwrap());

static CVE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bCVE-\d{4}-\d{4,}\b").unwrap());

static USER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\buser\s+([a-z0-9][a-z0-9._@-]*)").unwrap());

static HOST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:host|asset|server)\s+([a-z0-9][a-z0-9._-]*)").unwrap());

static IPV4_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,3}(?:\.\d{1,3}){3})\b").unwrap());

/// Constraints and references stated in a question.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryIntent {
    /// Required `status` (`failed`, `success` or `blocked`).
    pub status: Option<String>,
    /// Accepted `severity` values; empty accepts any.
    pub severities: BTreeSet<String>,
    /// Oldest acceptable `timestamp`.
    pub since: Option<DateTime<Utc>>,
    /// Canonical ids of entities named in the question.
    pub references: Vec<String>,
}

impl QueryIntent {
    /// Parses `question`, anchoring time windows at `now`.
    pub fn parse(question: &str, now: DateTime<Utc>) -> Self {
        let status = STATUS_RE.captures(question).map(|caps| {
            match caps[1].to_lowercase().as_str() {
                "successful" | "succeeded" => "success",
                "blocked" => "blocked",
                _ => "failed",
            }
            .to_string()
        });

        let severities = SEVERITY_RE
            .captures_iter(question)
            .map(|caps| caps[1].to_lowercase())
            .collect();

        Self {
            status,
            severities,
            since: parse_window(question, now),
            references: parse_references(question),
        }
    }

    /// True when the question states no filtering constraint.
    pub fn is_unconstrained(&self) -> bool {
        self.status.is_none() && self.severities.is_empty() && self.since.is_none()
    }

    /// Whether an entity satisfies every constraint.
    ///
    /// Entities without the constrained attribute pass: a user has no
    /// status, an asset no severity.
    pub fn admits(&self, entity: &Entity) -> bool {
        if let (Some(wanted), Some(status)) = (&self.status, entity.text("status")) {
            if !status.eq_ignore_ascii_case(wanted) {
                return false;
            }
        }
        if let Some(severity) = entity.text("severity") {
            if !self.severities.is_empty() && !self.severities.contains(&severity.to_lowercase()) {
                return false;
            }
        }
        if let (Some(since), Some(at)) = (self.since, entity.timestamp()) {
            if at < since {
                return false;
            }
        }
        true
    }
}

/// Oldest timestamp a stated window admits. A window too wide to represent
/// is no constraint at all.
fn parse_window(question: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let span = |amount: i64, unit: &str| match unit.to_lowercase().as_str() {
        "minute" => TimeDelta::try_minutes(amount),
        "hour" => TimeDelta::try_hours(amount),
        "day" => TimeDelta::try_days(amount),
        _ => TimeDelta::try_weeks(amount),
    };

    if let Some(caps) = WINDOW_RE.captures(question) {
        let amount: i64 = caps[1].parse().ok()?;
        return span(amount, &caps[2]).and_then(|span| now.checked_sub_signed(span));
    }
    if let Some(caps) = UNIT_WINDOW_RE.captures(question) {
        return span(1, &caps[1]).and_then(|span| now.checked_sub_signed(span));
    }
    if TODAY_RE.is_match(question) {
        return now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight.and_utc());
    }
    None
}

fn parse_references(question: &str) -> Vec<String> {
    let mut refs = BTreeSet::new();
    let id = |t: EntityType, key: String| format!("{}:{}", t.id_prefix(), key);

    for m in CVE_RE.find_iter(question) {
        refs.insert(id(EntityType::Cve, m.as_str().to_uppercase()));
    }
    for caps in USER_RE.captures_iter(question) {
        refs.insert(id(EntityType::User, caps[1].to_lowercase()));
    }
    for caps in HOST_RE.captures_iter(question) {
        refs.insert(id(EntityType::Asset, caps[1].to_lowercase()));
    }
    for caps in IPV4_RE.captures_iter(question) {
        if let Ok(ip) = caps[1].parse::<Ipv4Addr>() {
            refs.insert(id(EntityType::IpAddress, ip.to_string()));
        }
    }
    refs.into_iter().collect()
}
