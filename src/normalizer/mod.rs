//! Normalization of raw security telemetry into entities and relationships.
//!
//! Each [`SourceKind`] has one rule mapping a raw record to the entities it
//! describes and the relationships it implies. Entities referenced but not
//! described by a record (the user behind a sign-in, the role behind a
//! permission) are emitted as stubs carrying only their key attributes; the
//! resolver merges them with full records.

mod fields;
mod rules;

pub use fields::{normalize_severity, normalize_status, parse_timestamp, RecordFields};

use serde::Serialize;

use crate::error::MalformedRecord;
use crate::models::{Entity, RawRecord, Relationship, SourceKind};

/// Output of normalizing one source batch.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedBatch {
    pub source: SourceKind,
    /// Number of raw records seen.
    pub records: usize,
    /// Candidate entities, possibly several per canonical id.
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    /// Records skipped because they could not be normalized.
    pub malformed: Vec<MalformedRecord>,
}

impl NormalizedBatch {
    /// Records that produced at least one entity.
    pub fn normalized_records(&self) -> usize {
        self.records - self.malformed.len()
    }
}

/// Maps raw records of each source type to the unified graph model.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalizes a batch. Malformed records are skipped and reported; the
    /// rest of the batch is still normalized.
    pub fn normalize(&self, source: SourceKind, records: &[RawRecord]) -> NormalizedBatch {
        let mut batch = NormalizedBatch {
            source,
            records: records.len(),
            entities: Vec::new(),
            relationships: Vec::new(),
            malformed: Vec::new(),
        };

        for (index, record) in records.iter().enumerate() {
            let fields = RecordFields::new(source, index, record);
            let result = match source {
                SourceKind::Cves => rules::cve(&fields),
                SourceKind::Assets => rules::asset(&fields),
                SourceKind::Logs => rules::log_event(&fields),
                SourceKind::CloudConfigs => rules::cloud_config(&fields),
                SourceKind::SigninLogs => rules::sign_in(&fields),
                SourceKind::UserRoles => rules::user_role(&fields),
                SourceKind::RolePermissions => rules::role_permission(&fields),
            };

            match result {
                Ok(graph) => {
                    batch.entities.extend(graph.entities);
                    batch.relationships.extend(graph.relationships);
                }
                Err(malformed) => {
                    tracing::warn!(%malformed, "Skipping malformed record");
                    batch.malformed.push(malformed);
                }
            }
        }

        tracing::debug!(
            source = %source,
            records = batch.records,
            entities = batch.entities.len(),
            relationships = batch.relationships.len(),
            malformed = batch.malformed.len(),
            "Normalized batch"
        );
        batch
    }
}
