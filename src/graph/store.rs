//! The graph store abstraction used by ingestion and retrieval.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::AppError;
use crate::graph::traversal;
use crate::models::{Entity, EntityType, PathStep, Relationship, RelationshipType};

/// Which relationship types a traversal may follow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EdgeFilter {
    #[default]
    All,
    Only(BTreeSet<RelationshipType>),
}

impl EdgeFilter {
    pub fn only(types: impl IntoIterator<Item = RelationshipType>) -> Self {
        EdgeFilter::Only(types.into_iter().collect())
    }

    pub fn allows(&self, relationship_type: RelationshipType) -> bool {
        match self {
            EdgeFilter::All => true,
            EdgeFilter::Only(types) => types.contains(&relationship_type),
        }
    }
}

/// An entity reached by expansion, with the path that reached it first.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub entity_id: String,
    pub hop: usize,
    pub path: Vec<PathStep>,
}

/// Entity and relationship counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphStats {
    pub entities: usize,
    pub relationships: usize,
    pub entities_by_type: BTreeMap<EntityType, usize>,
}

/// Persistence for entities and relationships.
///
/// Implementations must give identical observable results for the same
/// sequence of writes; the in-memory and AGE stores share traversal logic
/// through [`GraphStore::neighbors`] to guarantee it.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Inserts or replaces an entity.
    async fn upsert_node(&self, entity: &Entity) -> Result<(), AppError>;

    /// Inserts an edge, or folds it into the existing edge with the same
    /// (source, type, target). Both endpoints must exist.
    async fn upsert_edge(&self, relationship: &Relationship) -> Result<(), AppError>;

    /// Deletes the edge with this (source, type, target), if any.
    ///
    /// Returns whether an edge was removed.
    async fn remove_edge(
        &self,
        source_entity_id: &str,
        relationship_type: RelationshipType,
        target_entity_id: &str,
    ) -> Result<bool, AppError>;

    async fn get(&self, entity_id: &str) -> Result<Option<Entity>, AppError>;

    /// Edges touching `entity_id` in either direction, in a stable order.
    async fn incident_edges(
        &self,
        entity_id: &str,
        edge_types: &EdgeFilter,
    ) -> Result<Vec<Relationship>, AppError>;

    async fn entities_of_type(&self, entity_type: EntityType) -> Result<Vec<Entity>, AppError>;

    async fn stats(&self) -> Result<GraphStats, AppError>;

    /// Entities within `max_hops` of `entity_id`, each with its shortest
    /// path (ties broken by the smallest relationship type sequence).
    ///
    /// Edges are followed in both directions. The start entity is only
    /// returned when a cycle leads back to it.
    async fn neighbors(
        &self,
        entity_id: &str,
        edge_types: &EdgeFilter,
        max_hops: usize,
    ) -> Result<Vec<Neighbor>, AppError> {
        traversal::expand(self, entity_id, edge_types, max_hops).await
    }
}

/// Sorts edges the way every store returns them.
pub(crate) fn sort_edges(edges: &mut [Relationship]) {
    edges.sort_by(|a, b| {
        (
            a.relationship_type.as_str(),
            &a.source_entity_id,
            &a.target_entity_id,
        )
            .cmp(&(
                b.relationship_type.as_str(),
                &b.source_entity_id,
                &b.target_entity_id,
            ))
    });
}
