//! Brute-force in-memory vector index.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{check_dimensions, VectorStore};
use crate::embedding::cosine_similarity;
use crate::error::AppError;
use crate::models::{EmbeddingRecord, VectorMatch};

/// Vector store scanning every record per query.
///
/// Fine for tests and datasets up to tens of thousands of entities.
pub struct InMemoryVectorStore {
    dimensions: usize,
    records: RwLock<BTreeMap<String, EmbeddingRecord>>,
}

impl InMemoryVectorStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            records: RwLock::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, entity_id: &str, vector: &[f32], text: &str) -> Result<(), AppError> {
        check_dimensions(vector, self.dimensions)?;
        let record = EmbeddingRecord {
            entity_id: entity_id.to_string(),
            vector: vector.to_vec(),
            text: text.to_string(),
        };
        self.records
            .write()
            .await
            .insert(entity_id.to_string(), record);
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorMatch>, AppError> {
        check_dimensions(vector, self.dimensions)?;

        let records = self.records.read().await;
        let mut scored: Vec<VectorMatch> = records
            .values()
            .map(|r| VectorMatch {
                entity_id: r.entity_id.clone(),
                score: cosine_similarity(vector, &r.vector),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn get(&self, entity_id: &str) -> Result<Option<EmbeddingRecord>, AppError> {
        Ok(self.records.read().await.get(entity_id).cloned())
    }

    async fn count(&self) -> Result<usize, AppError> {
        Ok(self.records.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_query_ranks_by_similarity_then_id() {
        let store = InMemoryVectorStore::new(2);
        store.upsert("b", &[1.0, 0.0], "b").await.unwrap();
        store.upsert("a", &[1.0, 0.0], "a").await.unwrap();
        store.upsert("c", &[0.0, 1.0], "c").await.unwrap();

        let hits = store.query(&[1.0, 0.1], 2).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_counts_once() {
        let store = InMemoryVectorStore::new(2);
        store.upsert("a", &[1.0, 0.0], "old").await.unwrap();
        store.upsert("a", &[0.0, 1.0], "new").await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.get("a").await.unwrap().unwrap().text, "new");
    }

    #[tokio::test]
    async fn test_empty_index_returns_no_matches() {
        let store = InMemoryVectorStore::new(3);
        assert!(store.query(&[1.0, 0.0, 0.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let store = InMemoryVectorStore::new(3);
        assert!(matches!(
            store.upsert("a", &[1.0], "a").await,
            Err(AppError::Validation(_))
        ));
    }
}
