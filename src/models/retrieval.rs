//! Retrieval results: ranked, budgeted context with provenance.

use serde::{Deserialize, Serialize};

use super::{Entity, EntityType, Relationship, RelationshipType};
use crate::error::StoreKind;

/// One traversed edge on a provenance path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathStep {
    pub relationship: Relationship,
    /// True when the edge was walked from its target back to its source.
    pub reversed: bool,
}

impl PathStep {
    /// The entity this step arrives at.
    pub fn reached(&self) -> &str {
        if self.reversed {
            &self.relationship.source_entity_id
        } else {
            &self.relationship.target_entity_id
        }
    }
}

/// How a retrieved item connects back to the seed that surfaced it.
///
/// Empty `steps` means the item was itself a seed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProvenancePath {
    pub seed_id: String,
    pub steps: Vec<PathStep>,
}

impl ProvenancePath {
    pub fn seed(seed_id: impl Into<String>) -> Self {
        Self {
            seed_id: seed_id.into(),
            steps: Vec::new(),
        }
    }

    /// Number of hops from the seed.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn relationship_types(&self) -> Vec<RelationshipType> {
        self.steps
            .iter()
            .map(|s| s.relationship.relationship_type)
            .collect()
    }

    /// Relationship type names, the sequence compared for tie-breaks.
    pub fn type_names(&self) -> Vec<&'static str> {
        self.steps
            .iter()
            .map(|s| s.relationship.relationship_type.as_str())
            .collect()
    }

    /// Renders the path as `seed -[TYPE]-> a <-[TYPE]- b`.
    pub fn describe(&self) -> String {
        let mut out = self.seed_id.clone();
        for step in &self.steps {
            let rel = step.relationship.relationship_type;
            if step.reversed {
                out.push_str(&format!(" <-[{}]- {}", rel, step.reached()));
            } else {
                out.push_str(&format!(" -[{}]-> {}", rel, step.reached()));
            }
        }
        out
    }
}

/// Either half of the graph can appear in a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextItem {
    Entity(Entity),
    Relationship(Relationship),
}

/// A ranked context entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedItem {
    pub item: ContextItem,
    pub score: f32,
    pub path: ProvenancePath,
}

impl RetrievedItem {
    pub fn entity(&self) -> Option<&Entity> {
        match &self.item {
            ContextItem::Entity(e) => Some(e),
            ContextItem::Relationship(_) => None,
        }
    }

    pub fn entity_type(&self) -> Option<EntityType> {
        self.entity().map(|e| e.entity_type)
    }

    /// Rough token cost of carrying this item (4 characters per token).
    pub fn estimated_tokens(&self) -> usize {
        let chars = match &self.item {
            ContextItem::Entity(e) => e.embedding_text.chars().count(),
            ContextItem::Relationship(r) => r.to_string().chars().count(),
        };
        chars.div_ceil(4)
    }
}

/// Why a retrieval produced nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyReason {
    /// The vector index holds no documents.
    EmptyIndex,
    /// Nothing scored above the minimum-similarity floor.
    BelowFloor,
    /// Candidates existed but none satisfied the query constraints.
    FilteredOut,
}

/// Outcome of a retrieval.
///
/// `Empty` is a valid answer ("no relevant signal") and is distinct from a
/// store failure, which is either `Degraded` or an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RetrievalStatus {
    Complete,
    /// Some stores did not answer; the context holds what the others returned.
    Degraded { unavailable: Vec<StoreKind> },
    Empty { reason: EmptyReason },
}

/// Size limits for a retrieval context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalBudget {
    pub max_items: usize,
    pub max_tokens: Option<usize>,
}

impl RetrievalBudget {
    pub fn items(max_items: usize) -> Self {
        Self {
            max_items,
            max_tokens: None,
        }
    }
}

/// The transient result of a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalContext {
    pub query_id: String,
    pub query: String,
    /// Ranked by descending score.
    pub items: Vec<RetrievedItem>,
    pub status: RetrievalStatus,
    /// Distinct entities found before budget truncation.
    pub candidates_considered: usize,
    pub warnings: Vec<String>,
}

impl RetrievalContext {
    pub fn empty(query_id: String, query: &str, reason: EmptyReason) -> Self {
        Self {
            query_id,
            query: query.to_string(),
            items: Vec::new(),
            status: RetrievalStatus::Empty { reason },
            candidates_considered: 0,
            warnings: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Entity items, in rank order.
    pub fn entities(&self) -> impl Iterator<Item = (&Entity, &RetrievedItem)> {
        self.items
            .iter()
            .filter_map(|item| item.entity().map(|e| (e, item)))
    }

    /// Looks up a retrieved entity by id.
    pub fn find(&self, entity_id: &str) -> Option<&RetrievedItem> {
        self.items
            .iter()
            .find(|item| item.entity().is_some_and(|e| e.entity_id == entity_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_path_with_reversed_step() {
        let path = ProvenancePath {
            seed_id: "signin:s1".into(),
            steps: vec![PathStep {
                relationship: Relationship::new(
                    RelationshipType::SignedIn,
                    "user:alice",
                    "signin:s1",
                ),
                reversed: true,
            }],
        };
        assert_eq!(path.describe(), "signin:s1 <-[SIGNED_IN]- user:alice");
        assert_eq!(path.len(), 1);
        assert_eq!(path.type_names(), vec!["SIGNED_IN"]);
    }
}
