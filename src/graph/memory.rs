//! In-process graph store.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::AppError;
use crate::graph::store::{sort_edges, EdgeFilter, GraphStats, GraphStore};
use crate::models::{Entity, EntityType, Relationship, RelationshipType};

type EdgeKey = (String, RelationshipType, String);

#[derive(Default)]
struct GraphState {
    nodes: BTreeMap<String, Entity>,
    edges: BTreeMap<EdgeKey, Relationship>,
    /// Edge keys touching each entity, in either direction.
    incident: HashMap<String, BTreeSet<EdgeKey>>,
}

/// Graph store backed by in-memory maps.
///
/// Used for tests and single-process runs; semantics match the AGE store.
#[derive(Default)]
pub struct InMemoryGraphStore {
    state: RwLock<GraphState>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_node(&self, entity: &Entity) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        state
            .nodes
            .insert(entity.entity_id.clone(), entity.clone());
        Ok(())
    }

    async fn upsert_edge(&self, relationship: &Relationship) -> Result<(), AppError> {
        relationship.validate()?;

        let mut state = self.state.write().await;
        for endpoint in [
            &relationship.source_entity_id,
            &relationship.target_entity_id,
        ] {
            if !state.nodes.contains_key(endpoint) {
                return Err(AppError::MissingEndpoint {
                    relationship: relationship.to_string(),
                    entity_id: endpoint.clone(),
                });
            }
        }

        let key = relationship.key();
        match state.edges.get_mut(&key) {
            Some(existing) => existing.absorb(relationship),
            None => {
                state.edges.insert(key.clone(), relationship.clone());
                for endpoint in [&key.0, &key.2] {
                    state
                        .incident
                        .entry(endpoint.clone())
                        .or_default()
                        .insert(key.clone());
                }
            }
        }
        Ok(())
    }

    async fn remove_edge(
        &self,
        source_entity_id: &str,
        relationship_type: RelationshipType,
        target_entity_id: &str,
    ) -> Result<bool, AppError> {
        let key = (
            source_entity_id.to_string(),
            relationship_type,
            target_entity_id.to_string(),
        );
        let mut state = self.state.write().await;
        if state.edges.remove(&key).is_none() {
            return Ok(false);
        }
        for endpoint in [&key.0, &key.2] {
            if let Some(keys) = state.incident.get_mut(endpoint) {
                keys.remove(&key);
            }
        }
        Ok(true)
    }

    async fn get(&self, entity_id: &str) -> Result<Option<Entity>, AppError> {
        Ok(self.state.read().await.nodes.get(entity_id).cloned())
    }

    async fn incident_edges(
        &self,
        entity_id: &str,
        edge_types: &EdgeFilter,
    ) -> Result<Vec<Relationship>, AppError> {
        let state = self.state.read().await;
        let mut edges: Vec<Relationship> = state
            .incident
            .get(entity_id)
            .into_iter()
            .flatten()
            .filter(|key| edge_types.allows(key.1))
            .filter_map(|key| state.edges.get(key).cloned())
            .collect();
        sort_edges(&mut edges);
        Ok(edges)
    }

    async fn entities_of_type(&self, entity_type: EntityType) -> Result<Vec<Entity>, AppError> {
        Ok(self
            .state
            .read()
            .await
            .nodes
            .values()
            .filter(|e| e.entity_type == entity_type)
            .cloned()
            .collect())
    }

    async fn stats(&self) -> Result<GraphStats, AppError> {
        let state = self.state.read().await;
        let mut entities_by_type = BTreeMap::new();
        for entity in state.nodes.values() {
            *entities_by_type.entry(entity.entity_type).or_insert(0) += 1;
        }
        Ok(GraphStats {
            entities: state.nodes.len(),
            relationships: state.edges.len(),
            entities_by_type,
        })
    }
}
