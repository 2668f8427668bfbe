//! Typed, directed relationships between entities.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Relationship types in the security graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    /// CVE affects an asset.
    Affects,
    /// User holds a role.
    HasRole,
    /// Role grants a permission.
    GrantsPermission,
    /// User authenticated from a network address.
    LoggedInFrom,
    /// Event occurred on an asset.
    RunsOn,
    /// User owns an asset.
    Owns,
    /// User caused an event.
    Triggered,
    /// User performed a sign-in.
    SignedIn,
    /// Sign-in came from a network address.
    OriginatedFrom,
    /// Asset is reachable at a network address.
    HasAddress,
    /// Cloud configuration applies to an asset.
    Configures,
}

impl RelationshipType {
    pub const ALL: [RelationshipType; 11] = [
        RelationshipType::Affects,
        RelationshipType::HasRole,
        RelationshipType::GrantsPermission,
        RelationshipType::LoggedInFrom,
        RelationshipType::RunsOn,
        RelationshipType::Owns,
        RelationshipType::Triggered,
        RelationshipType::SignedIn,
        RelationshipType::OriginatedFrom,
        RelationshipType::HasAddress,
        RelationshipType::Configures,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Affects => "AFFECTS",
            RelationshipType::HasRole => "HAS_ROLE",
            RelationshipType::GrantsPermission => "GRANTS_PERMISSION",
            RelationshipType::LoggedInFrom => "LOGGED_IN_FROM",
            RelationshipType::RunsOn => "RUNS_ON",
            RelationshipType::Owns => "OWNS",
            RelationshipType::Triggered => "TRIGGERED",
            RelationshipType::SignedIn => "SIGNED_IN",
            RelationshipType::OriginatedFrom => "ORIGINATED_FROM",
            RelationshipType::HasAddress => "HAS_ADDRESS",
            RelationshipType::Configures => "CONFIGURES",
        }
    }

    /// No relationship type currently permits an entity to point at itself.
    pub fn allows_self_loop(&self) -> bool {
        false
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationshipType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RelationshipType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| AppError::Validation(format!("unknown relationship type: {}", s)))
    }
}

fn default_weight() -> f32 {
    1.0
}

/// A directed, typed edge between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub relationship_type: RelationshipType,
    pub source_entity_id: String,
    pub target_entity_id: String,
    /// Confidence in the edge, 1.0 unless inferred.
    #[serde(default = "default_weight")]
    pub weight: f32,
    /// Most recent observation, for temporal edges.
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

impl Relationship {
    pub fn new(
        relationship_type: RelationshipType,
        source_entity_id: impl Into<String>,
        target_entity_id: impl Into<String>,
    ) -> Self {
        Self {
            relationship_type,
            source_entity_id: source_entity_id.into(),
            target_entity_id: target_entity_id.into(),
            weight: default_weight(),
            observed_at: None,
        }
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    pub fn observed(mut self, observed_at: Option<DateTime<Utc>>) -> Self {
        self.observed_at = observed_at;
        self
    }

    /// Identity of the edge: one edge per (source, type, target).
    pub fn key(&self) -> (String, RelationshipType, String) {
        (
            self.source_entity_id.clone(),
            self.relationship_type,
            self.target_entity_id.clone(),
        )
    }

    /// Rejects self-loops for types that do not allow them.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.source_entity_id == self.target_entity_id
            && !self.relationship_type.allows_self_loop()
        {
            return Err(AppError::SelfLoop {
                relationship: self.relationship_type.to_string(),
                entity_id: self.source_entity_id.clone(),
            });
        }
        Ok(())
    }

    /// Folds another observation of the same edge into this one.
    ///
    /// Keeps the highest weight and the latest observation, so merging is
    /// order-independent.
    pub fn absorb(&mut self, other: &Relationship) {
        self.weight = self.weight.max(other.weight);
        self.observed_at = self.observed_at.max(other.observed_at);
    }

    /// The endpoint opposite `entity_id`.
    pub fn other_end(&self, entity_id: &str) -> &str {
        if self.source_entity_id == entity_id {
            &self.target_entity_id
        } else {
            &self.source_entity_id
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -[{}]-> {}",
            self.source_entity_id, self.relationship_type, self.target_entity_id
        )
    }
}
