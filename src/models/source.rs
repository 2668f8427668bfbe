//! Signal sources and raw records.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::AppError;

/// A schema-free raw record: field name to JSON value.
pub type RawRecord = Map<String, JsonValue>;

/// The seven telemetry sources the normalizer understands.
///
/// Declaration order doubles as merge precedence when two observations of
/// the same attribute carry the same timestamp (later variants win).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Logs,
    SigninLogs,
    CloudConfigs,
    RolePermissions,
    UserRoles,
    Cves,
    Assets,
}

impl SourceKind {
    /// All sources, in ingestion order used by the CLI.
    pub const ALL: [SourceKind; 7] = [
        SourceKind::Cves,
        SourceKind::Assets,
        SourceKind::Logs,
        SourceKind::CloudConfigs,
        SourceKind::SigninLogs,
        SourceKind::UserRoles,
        SourceKind::RolePermissions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Cves => "cves",
            SourceKind::Assets => "assets",
            SourceKind::Logs => "logs",
            SourceKind::CloudConfigs => "cloud_configs",
            SourceKind::SigninLogs => "signin_logs",
            SourceKind::UserRoles => "user_roles",
            SourceKind::RolePermissions => "role_permissions",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| AppError::Validation(format!("unknown source type: {}", s)))
    }
}

/// Identifies the raw record an entity or attribute came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceRef {
    pub source: SourceKind,
    /// The record's natural identifier, or `#<index>` when it has none.
    pub record: String,
}

impl SourceRef {
    pub fn new(source: SourceKind, record: impl Into<String>) -> Self {
        Self {
            source,
            record: record.into(),
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_round_trips_through_str() {
        for kind in SourceKind::ALL {
            assert_eq!(kind.as_str().parse::<SourceKind>().unwrap(), kind);
        }
        assert!("netflow".parse::<SourceKind>().is_err());
    }
}
