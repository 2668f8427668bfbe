//! Entity model representing nodes in the security graph.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{SourceKind, SourceRef};
use crate::error::AppError;

const RENDERED_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Kind of real-world object an entity stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    #[serde(rename = "CVE")]
    Cve,
    Asset,
    LogEvent,
    CloudConfig,
    SignInEvent,
    UserRole,
    Permission,
    /// A principal referenced by sign-ins, role assignments, logs and asset ownership.
    User,
    /// A network address referenced by sign-ins and assets.
    IpAddress,
}

impl EntityType {
    pub const ALL: [EntityType; 9] = [
        EntityType::Cve,
        EntityType::Asset,
        EntityType::LogEvent,
        EntityType::CloudConfig,
        EntityType::SignInEvent,
        EntityType::UserRole,
        EntityType::Permission,
        EntityType::User,
        EntityType::IpAddress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Cve => "CVE",
            EntityType::Asset => "Asset",
            EntityType::LogEvent => "LogEvent",
            EntityType::CloudConfig => "CloudConfig",
            EntityType::SignInEvent => "SignInEvent",
            EntityType::UserRole => "UserRole",
            EntityType::Permission => "Permission",
            EntityType::User => "User",
            EntityType::IpAddress => "IpAddress",
        }
    }

    /// Prefix of canonical entity ids of this type.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            EntityType::Cve => "cve",
            EntityType::Asset => "asset",
            EntityType::LogEvent => "log",
            EntityType::CloudConfig => "cloud",
            EntityType::SignInEvent => "signin",
            EntityType::UserRole => "role",
            EntityType::Permission => "perm",
            EntityType::User => "user",
            EntityType::IpAddress => "ip",
        }
    }

    /// Human heading used when rendering entities of this type.
    pub fn heading(&self) -> &'static str {
        match self {
            EntityType::Cve => "Vulnerabilities",
            EntityType::Asset => "Assets",
            EntityType::LogEvent => "Security Events",
            EntityType::CloudConfig => "Cloud Configurations",
            EntityType::SignInEvent => "Sign-in Activity",
            EntityType::UserRole => "Roles",
            EntityType::Permission => "Permissions",
            EntityType::User => "Users",
            EntityType::IpAddress => "Network Addresses",
        }
    }

    /// Attribute holding the entity's human-facing name.
    fn name_attribute(&self) -> &'static str {
        match self {
            EntityType::Cve => "cve_id",
            EntityType::Asset => "hostname",
            EntityType::LogEvent => "event_id",
            EntityType::CloudConfig => "resource_id",
            EntityType::SignInEvent => "log_id",
            EntityType::UserRole => "role_name",
            EntityType::Permission => "permission_id",
            EntityType::User => "username",
            EntityType::IpAddress => "ip_address",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| AppError::Validation(format!("unknown entity type: {}", s)))
    }
}

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    List(Vec<String>),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            AttributeValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Text values as a one-element slice, lists as-is.
    pub fn as_strings(&self) -> Vec<&str> {
        match self {
            AttributeValue::Text(s) => vec![s.as_str()],
            AttributeValue::List(items) => items.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Text(s) => f.write_str(s),
            AttributeValue::Integer(i) => write!(f, "{}", i),
            AttributeValue::Float(x) => write!(f, "{}", x),
            AttributeValue::Bool(b) => write!(f, "{}", b),
            AttributeValue::Timestamp(ts) => write!(f, "{}", ts.format(RENDERED_TIMESTAMP)),
            AttributeValue::List(items) => f.write_str(&items.join(", ")),
        }
    }
}

/// When and where an attribute value was observed.
///
/// Ordering is the merge precedence: later observations win, then source
/// precedence. A missing timestamp sorts before any timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttributeStamp {
    pub observed_at: Option<DateTime<Utc>>,
    pub source: SourceKind,
}

/// An entity in the security graph.
///
/// `entity_id` is derived from the type's resolution key, so every raw
/// record describing the same real-world object lands on the same entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Canonical, source-independent identifier (e.g. `cve:CVE-2024-1234`).
    pub entity_id: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Observation stamp per attribute, consulted when merging.
    #[serde(default)]
    pub stamps: BTreeMap<String, AttributeStamp>,
    pub source_refs: BTreeSet<SourceRef>,
    pub embedding_text: String,
}

impl Entity {
    /// Creates an entity with no attributes.
    pub fn new(entity_id: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type,
            attributes: BTreeMap::new(),
            stamps: BTreeMap::new(),
            source_refs: BTreeSet::new(),
            embedding_text: String::new(),
        }
    }

    /// Sets an attribute together with its observation stamp.
    pub fn set(&mut self, key: &str, value: AttributeValue, stamp: AttributeStamp) {
        self.attributes.insert(key.to_string(), value);
        self.stamps.insert(key.to_string(), stamp);
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(AttributeValue::as_text)
    }

    /// The most recent timestamp attribute, if the entity carries one.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.attributes
            .get("timestamp")
            .and_then(AttributeValue::as_timestamp)
    }

    /// A short human-facing name.
    pub fn display_name(&self) -> String {
        self.attributes
            .get(self.entity_type.name_attribute())
            .map(|v| v.to_string())
            .unwrap_or_else(|| {
                self.entity_id
                    .split_once(':')
                    .map(|(_, key)| key.to_string())
                    .unwrap_or_else(|| self.entity_id.clone())
            })
    }

    /// Recomputes `embedding_text` from the current attributes.
    ///
    /// The text is a pure function of type and attributes, so merged entities
    /// render identically regardless of how they were assembled.
    pub fn refresh_embedding_text(&mut self) {
        self.embedding_text = self.render_text();
    }

    /// Rebuilds an entity from its rendered embedding text.
    ///
    /// Attributes come back as text, or as timestamps where the rendering
    /// was one; stamps and provenance are lost.
    pub fn from_embedding_text(
        entity_id: impl Into<String>,
        entity_type: EntityType,
        text: &str,
    ) -> Self {
        let mut entity = Self::new(entity_id, entity_type);
        for line in text.lines().skip(1) {
            let Some((key, value)) = line.split_once(": ") else {
                continue;
            };
            let key = key.trim().replace(' ', "_");
            if key.is_empty() {
                continue;
            }
            let value = match NaiveDateTime::parse_from_str(value, RENDERED_TIMESTAMP) {
                Ok(at) => AttributeValue::Timestamp(at.and_utc()),
                Err(_) => AttributeValue::Text(value.to_string()),
            };
            entity.attributes.insert(key, value);
        }
        entity.embedding_text = text.to_string();
        entity
    }

    fn render_text(&self) -> String {
        let mut out = self.title();
        for (key, value) in &self.attributes {
            out.push('\n');
            out.push_str(&key.replace('_', " "));
            out.push_str(": ");
            out.push_str(&value.to_string());
        }
        out
    }

    fn title(&self) -> String {
        let name = self.display_name();
        let get = |key: &str| self.attributes.get(key).map(|v| v.to_string());
        match self.entity_type {
            EntityType::Cve => format!("Vulnerability {}", name),
            EntityType::Asset => format!("Asset {}", name),
            EntityType::LogEvent => format!(
                "Security event {}",
                get("event_type").unwrap_or(name)
            ),
            EntityType::CloudConfig => format!(
                "Cloud configuration {} {}",
                name,
                get("setting_name").unwrap_or_default()
            )
            .trim_end()
            .to_string(),
            EntityType::SignInEvent => format!(
                "Login attempt by {} from {} ({})",
                get("username").unwrap_or_else(|| "unknown user".into()),
                get("source_ip").unwrap_or_else(|| "unknown address".into()),
                get("status").unwrap_or_else(|| "unknown".into())
            ),
            EntityType::UserRole => format!("Role {}", name),
            EntityType::Permission => format!(
                "Permission {} {}",
                name,
                get("action").unwrap_or_default()
            )
            .trim_end()
            .to_string(),
            EntityType::User => format!("User {}", name),
            EntityType::IpAddress => format!("Network address {}", name),
        }
    }
}
