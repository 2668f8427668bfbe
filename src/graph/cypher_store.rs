//! Graph store over any Cypher backend (Apache AGE in production).
//!
//! Every entity is an `:Entity` vertex carrying its id, its type and the
//! serialized entity document. Relationships are edges labelled with their
//! type; the type is repeated in a `rel_type` property so incident edges can
//! be read back without label functions.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::graph::store::{sort_edges, EdgeFilter, GraphStats, GraphStore};
use crate::graph::traits::finish;
use crate::graph::{CypherExecutor, Graph, GraphClient, QueryExt, Row};
use crate::models::{Entity, EntityType, Relationship, RelationshipType};

const OUTGOING: &str = "MATCH (a:Entity {id: $id})-[r]->(b:Entity) \
     RETURN r.rel_type AS rel_type, b.id AS other, r.weight AS weight, r.observed_at AS observed_at";
const INCOMING: &str = "MATCH (a:Entity {id: $id})<-[r]-(b:Entity) \
     RETURN r.rel_type AS rel_type, b.id AS other, r.weight AS weight, r.observed_at AS observed_at";

/// Graph store issuing Cypher through a [`GraphClient`].
pub struct CypherGraphStore<C: GraphClient> {
    graph: Graph<C>,
}

impl<C: GraphClient> CypherGraphStore<C> {
    pub fn new(client: C) -> Self {
        Self {
            graph: Graph::new(client),
        }
    }

    pub fn client(&self) -> &C {
        self.graph.client()
    }

    /// Deletes every entity and relationship.
    pub async fn clear(&self) -> Result<(), AppError> {
        self.graph
            .query("MATCH (e:Entity) DETACH DELETE e")
            .run()
            .await
    }
}

async fn write_node<E: CypherExecutor>(txn: &E, entity: &Entity) -> Result<(), AppError> {
    let doc = serde_json::to_string(entity)
        .map_err(|e| AppError::Internal(format!("Failed to encode entity: {}", e)))?;

    let existing = txn
        .query("MATCH (e:Entity {id: $id}) RETURN e.id AS id")
        .param("id", &entity.entity_id)
        .fetch_one()
        .await?;

    // AGE doesn't support ON CREATE SET, so check then create or update
    let cypher = if existing.is_some() {
        "MATCH (e:Entity {id: $id}) SET e.entity_type = $entity_type, e.doc = $doc"
    } else {
        "CREATE (:Entity {id: $id, entity_type: $entity_type, doc: $doc})"
    };
    txn.query(cypher)
        .param("id", &entity.entity_id)
        .param("entity_type", entity.entity_type.as_str())
        .param("doc", doc)
        .run()
        .await
}

async fn write_edge<E: CypherExecutor>(txn: &E, relationship: &Relationship) -> Result<(), AppError> {
    let source = &relationship.source_entity_id;
    let target = &relationship.target_entity_id;

    let present: HashSet<String> = txn
        .query("MATCH (e:Entity) WHERE e.id = $source OR e.id = $target RETURN e.id AS id")
        .param("source", source)
        .param("target", target)
        .fetch_all()
        .await?
        .iter()
        .map(|row| row.get::<String>("id"))
        .collect::<Result<_, _>>()?;
    for endpoint in [source, target] {
        if !present.contains(endpoint) {
            return Err(AppError::MissingEndpoint {
                relationship: relationship.to_string(),
                entity_id: endpoint.clone(),
            });
        }
    }

    let label = relationship.relationship_type.as_str();
    let pattern = format!(
        "MATCH (a:Entity {{id: $source}})-[r:{}]->(b:Entity {{id: $target}})",
        label
    );
    let existing = txn
        .query(&format!(
            "{} RETURN r.weight AS weight, r.observed_at AS observed_at",
            pattern
        ))
        .param("source", source)
        .param("target", target)
        .fetch_one()
        .await?;

    let (cypher, edge) = match existing {
        Some(row) => {
            let mut merged = relationship.clone();
            merged.absorb(&Relationship {
                weight: row.get_opt("weight")?.unwrap_or(0.0),
                observed_at: row.get_opt("observed_at")?,
                ..relationship.clone()
            });
            (
                format!(
                    "{} SET r.weight = $weight, r.observed_at = $observed_at",
                    pattern
                ),
                merged,
            )
        }
        None => (
            format!(
                "MATCH (a:Entity {{id: $source}}), (b:Entity {{id: $target}}) \
                 CREATE (a)-[r:{} {{rel_type: $rel_type, weight: $weight, observed_at: $observed_at}}]->(b)",
                label
            ),
            relationship.clone(),
        ),
    };

    txn.query(&cypher)
        .param("source", source)
        .param("target", target)
        .param("rel_type", label)
        .param("weight", edge.weight)
        .param("observed_at", edge.observed_at)
        .run()
        .await
}

async fn delete_edge<E: CypherExecutor>(
    txn: &E,
    source: &str,
    relationship_type: RelationshipType,
    target: &str,
) -> Result<bool, AppError> {
    let pattern = format!(
        "MATCH (a:Entity {{id: $source}})-[r:{}]->(b:Entity {{id: $target}})",
        relationship_type.as_str()
    );
    let existing = txn
        .query(&format!("{} RETURN r.rel_type AS rel_type", pattern))
        .param("source", source)
        .param("target", target)
        .fetch_one()
        .await?;
    if existing.is_none() {
        return Ok(false);
    }
    txn.query(&format!("{} DELETE r", pattern))
        .param("source", source)
        .param("target", target)
        .run()
        .await?;
    Ok(true)
}

/// Rebuilds an edge read from the neighbourhood of `entity_id`.
fn edge_from_row(row: &Row, entity_id: &str, outgoing: bool) -> Result<Relationship, AppError> {
    let relationship_type: RelationshipType = row.get::<String>("rel_type")?.parse()?;
    let other: String = row.get("other")?;
    let observed_at: Option<DateTime<Utc>> = row.get_opt("observed_at")?;
    let (source, target) = if outgoing {
        (entity_id.to_string(), other)
    } else {
        (other, entity_id.to_string())
    };
    Ok(Relationship::new(relationship_type, source, target)
        .with_weight(row.get_opt("weight")?.unwrap_or(1.0))
        .observed(observed_at))
}

#[async_trait]
impl<C: GraphClient> GraphStore for CypherGraphStore<C> {
    async fn upsert_node(&self, entity: &Entity) -> Result<(), AppError> {
        let txn = self.graph.client().begin().await?;
        let result = write_node(&txn, entity).await;
        finish(txn, result).await
    }

    async fn upsert_edge(&self, relationship: &Relationship) -> Result<(), AppError> {
        relationship.validate()?;
        let txn = self.graph.client().begin().await?;
        let result = write_edge(&txn, relationship).await;
        finish(txn, result).await
    }

    async fn remove_edge(
        &self,
        source_entity_id: &str,
        relationship_type: RelationshipType,
        target_entity_id: &str,
    ) -> Result<bool, AppError> {
        let txn = self.graph.client().begin().await?;
        let result = delete_edge(&txn, source_entity_id, relationship_type, target_entity_id).await;
        finish(txn, result).await
    }

    async fn get(&self, entity_id: &str) -> Result<Option<Entity>, AppError> {
        self.graph
            .query("MATCH (e:Entity {id: $id}) RETURN e.doc AS doc")
            .param("id", entity_id)
            .fetch_one()
            .await?
            .map(|row| row.get_document("doc"))
            .transpose()
    }

    async fn incident_edges(
        &self,
        entity_id: &str,
        edge_types: &EdgeFilter,
    ) -> Result<Vec<Relationship>, AppError> {
        let mut edges = Vec::new();
        for (cypher, outgoing) in [(OUTGOING, true), (INCOMING, false)] {
            let rows = self
                .graph
                .query(cypher)
                .param("id", entity_id)
                .fetch_all()
                .await?;
            for row in &rows {
                let edge = edge_from_row(row, entity_id, outgoing)?;
                if edge_types.allows(edge.relationship_type) {
                    edges.push(edge);
                }
            }
        }
        sort_edges(&mut edges);
        Ok(edges)
    }

    async fn entities_of_type(&self, entity_type: EntityType) -> Result<Vec<Entity>, AppError> {
        self.graph
            .query("MATCH (e:Entity {entity_type: $entity_type}) RETURN e.doc AS doc")
            .param("entity_type", entity_type.as_str())
            .fetch_all()
            .await?
            .iter()
            .map(|row| row.get_document("doc"))
            .collect()
    }

    async fn stats(&self) -> Result<GraphStats, AppError> {
        let mut stats = GraphStats {
            entities_by_type: BTreeMap::new(),
            ..GraphStats::default()
        };

        let rows = self
            .graph
            .query("MATCH (e:Entity) RETURN e.entity_type AS entity_type, count(e) AS total")
            .fetch_all()
            .await?;
        for row in &rows {
            let entity_type: EntityType = row.get::<String>("entity_type")?.parse()?;
            let total: usize = row.get("total")?;
            stats.entities += total;
            stats.entities_by_type.insert(entity_type, total);
        }

        if let Some(row) = self
            .graph
            .query("MATCH (:Entity)-[r]->(:Entity) RETURN count(r) AS total")
            .fetch_one()
            .await?
        {
            stats.relationships = row.get("total")?;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn row(value: serde_json::Value) -> Row {
        serde_json::from_value::<HashMap<String, serde_json::Value>>(value)
            .unwrap()
            .into()
    }

    #[test]
    fn test_edge_direction_from_rows() {
        let r = row(json!({
            "rel_type": "SIGNED_IN",
            "other": "user:alice",
            "weight": 1.0,
            "observed_at": "2024-05-01T08:00:00Z"
        }));

        let incoming = edge_from_row(&r, "signin:s1", false).unwrap();
        assert_eq!(incoming.source_entity_id, "user:alice");
        assert_eq!(incoming.target_entity_id, "signin:s1");
        assert!(incoming.observed_at.is_some());

        let outgoing = edge_from_row(&r, "signin:s1", true).unwrap();
        assert_eq!(outgoing.source_entity_id, "signin:s1");
    }

    #[test]
    fn test_missing_weight_defaults_to_one() {
        let r = row(json!({"rel_type": "OWNS", "other": "asset:web01", "weight": null}));
        let edge = edge_from_row(&r, "user:bob", true).unwrap();
        assert_eq!(edge.weight, 1.0);
        assert_eq!(edge.observed_at, None);
    }

    #[test]
    fn test_unknown_relationship_type_is_an_error() {
        let r = row(json!({"rel_type": "FRIENDS_WITH", "other": "user:bob"}));
        assert!(matches!(
            edge_from_row(&r, "user:alice", true),
            Err(AppError::Validation(_))
        ));
    }
}
