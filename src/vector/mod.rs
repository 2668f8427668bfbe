//! Embedding index.
//!
//! [`VectorStore`] is the capability the builder and retriever need: upsert
//! one vector per entity and look up nearest neighbours by cosine
//! similarity. [`InMemoryVectorStore`] and [`PgVectorStore`] rank
//! identically, ties broken by entity id.

mod memory;
mod pgvector;

pub use memory::InMemoryVectorStore;
pub use pgvector::PgVectorStore;

use async_trait::async_trait;

use crate::error::AppError;
use crate::models::{EmbeddingRecord, VectorMatch};

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Inserts or replaces the vector for an entity.
    async fn upsert(&self, entity_id: &str, vector: &[f32], text: &str) -> Result<(), AppError>;

    /// The `top_k` most similar entities, best first.
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorMatch>, AppError>;

    async fn get(&self, entity_id: &str) -> Result<Option<EmbeddingRecord>, AppError>;

    /// Number of stored documents.
    async fn count(&self) -> Result<usize, AppError>;
}

/// Rejects vectors of the wrong dimension.
pub(crate) fn check_dimensions(vector: &[f32], dimensions: usize) -> Result<(), AppError> {
    if vector.len() != dimensions {
        return Err(AppError::Validation(format!(
            "expected a {}-dimensional vector, got {}",
            dimensions,
            vector.len()
        )));
    }
    Ok(())
}
