//! Domain models for the security graph.

mod embedding;
mod entity;
mod relationship;
mod retrieval;
mod source;

pub use embedding::{EmbeddingRecord, VectorMatch};
pub use entity::{AttributeStamp, AttributeValue, Entity, EntityType};
pub use relationship::{Relationship, RelationshipType};
pub use retrieval::{
    ContextItem, EmptyReason, PathStep, ProvenancePath, RetrievalBudget, RetrievalContext,
    RetrievalStatus, RetrievedItem,
};
pub use source::{RawRecord, SourceKind, SourceRef};

/// Generates a new ULID string.
pub fn generate_ulid() -> String {
    ulid::Ulid::new().to_string()
}
