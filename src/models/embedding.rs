//! Embedding records stored in the vector index.

use serde::{Deserialize, Serialize};

/// One vector per entity, with the text that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub entity_id: String,
    pub vector: Vec<f32>,
    pub text: String,
}

/// A nearest-neighbour hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub entity_id: String,
    /// Cosine similarity (-1.0 to 1.0).
    pub score: f32,
}
