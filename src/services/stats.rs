//! Read-only counts across the ledger and both stores.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{AppError, StoreKind};
use crate::graph::GraphStore;
use crate::models::{EntityType, SourceKind};
use crate::services::builder::{IngestionLedger, SourceLedgerEntry};
use crate::vector::VectorStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total_entities: usize,
    pub per_source: BTreeMap<SourceKind, SourceLedgerEntry>,
    pub graph_nodes: usize,
    pub graph_edges: usize,
    pub nodes_by_type: BTreeMap<EntityType, usize>,
    pub vector_documents: usize,
}

pub struct StatsService {
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorStore>,
    ledger: Arc<IngestionLedger>,
}

impl StatsService {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
        ledger: Arc<IngestionLedger>,
    ) -> Self {
        Self {
            graph,
            vectors,
            ledger,
        }
    }

    pub async fn snapshot(&self) -> Result<StatsSnapshot, AppError> {
        let graph = self
            .graph
            .stats()
            .await
            .map_err(|e| AppError::unavailable(StoreKind::Graph, e))?;
        let vector_documents = self
            .vectors
            .count()
            .await
            .map_err(|e| AppError::unavailable(StoreKind::Vector, e))?;

        Ok(StatsSnapshot {
            total_entities: graph.entities,
            per_source: self.ledger.snapshot().await,
            graph_nodes: graph.entities,
            graph_edges: graph.relationships,
            nodes_by_type: graph.entities_by_type,
            vector_documents,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::graph::InMemoryGraphStore;
    use crate::services::builder::MemoryGraphBuilder;
    use crate::vector::InMemoryVectorStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_snapshot_counts_everything() {
        let graph = Arc::new(InMemoryGraphStore::new());
        let vectors = Arc::new(InMemoryVectorStore::new(32));
        let builder =
            MemoryGraphBuilder::new(graph.clone(), vectors.clone(), Arc::new(HashingEmbedder::new(32)));
        let records: Vec<crate::models::RawRecord> = serde_json::from_value(json!([
            {"log_id": "s1", "user": "alice", "source_ip": "10.0.0.9", "status": "failed"},
            {"log_id": "s2", "status": "failed"}
        ]))
        .unwrap();
        builder.ingest(SourceKind::SigninLogs, &records).await.unwrap();

        let stats = StatsService::new(graph, vectors, builder.ledger())
            .snapshot()
            .await
            .unwrap();
        assert_eq!(stats.total_entities, 3);
        assert_eq!(stats.graph_edges, 3);
        assert_eq!(stats.vector_documents, 3);
        assert_eq!(stats.nodes_by_type[&EntityType::User], 1);
        let signins = &stats.per_source[&SourceKind::SigninLogs];
        assert_eq!((signins.records, signins.ingested, signins.malformed), (2, 1, 1));
    }
}
