//! Application error types.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::SourceKind;

/// A raw record that could not be normalized.
///
/// Malformed records are skipped and reported; they never abort the rest
/// of a source batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MalformedRecord {
    pub source: SourceKind,
    pub index: usize,
    pub field: String,
    pub reason: String,
}

impl fmt::Display for MalformedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} record #{}: field '{}' {}",
            self.source, self.index, self.field, self.reason
        )
    }
}

/// Two observations disagreed on an attribute during a merge.
///
/// Resolved by the merge policy and kept only for audit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionConflict {
    pub entity_id: String,
    pub attribute: String,
    pub kept: String,
    pub discarded: String,
}

impl fmt::Display for ResolutionConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}: kept '{}', discarded '{}'",
            self.entity_id, self.attribute, self.kept, self.discarded
        )
    }
}

/// Which backing store an operation talked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Graph,
    Vector,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Graph => f.write_str("graph"),
            StoreKind::Vector => f.write_str("vector"),
        }
    }
}

/// Application-level errors for signalgraph.
#[derive(Error, Debug)]
pub enum AppError {
    // Ingestion errors
    #[error("Malformed record: {0}")]
    MalformedRecord(MalformedRecord),

    #[error("Resolution conflict: {0}")]
    ResolutionConflict(ResolutionConflict),

    // Store errors
    #[error("{store} store unavailable: {message}")]
    StoreUnavailable { store: StoreKind, message: String },

    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("Query error: {message}")]
    Query { message: String, query: String },

    // Domain errors
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Relationship {relationship} references missing entity: {entity_id}")]
    MissingEndpoint {
        relationship: String,
        entity_id: String,
    },

    #[error("Self-loop rejected: {relationship} on {entity_id}")]
    SelfLoop {
        relationship: String,
        entity_id: String,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    // Embedding errors
    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    // Source errors
    #[error("Failed to load {origin}: {message}")]
    SourceLoad { origin: String, message: String },

    // Config errors
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether retrying the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::StoreUnavailable { .. }
                | AppError::Timeout { .. }
                | AppError::Query { .. }
                | AppError::Internal(_)
        )
    }

    /// Wraps an error from a store backend as [`AppError::StoreUnavailable`].
    ///
    /// Domain errors (missing endpoints, self-loops, validation) pass through
    /// unchanged.
    pub fn unavailable(store: StoreKind, err: AppError) -> Self {
        match err {
            AppError::StoreUnavailable { .. } => err,
            e if e.is_transient() => AppError::StoreUnavailable {
                store,
                message: e.to_string(),
            },
            e => e,
        }
    }
}
