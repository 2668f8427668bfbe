//! The ingestion write path.
//!
//! [`MemoryGraphBuilder`] drives the normalizer and resolver and writes the
//! result to both stores. A source batch is one logical unit: it is retried
//! as a whole on transient failures, and because every write is an upsert,
//! re-running the batch reconciles whatever an earlier attempt left behind
//! instead of rolling it back.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::embedding::Embedder;
use crate::error::{AppError, MalformedRecord, ResolutionConflict, StoreKind};
use crate::graph::{EdgeFilter, GraphStore};
use crate::inference::{infer, rules_for, Side};
use crate::models::{Entity, EntityType, RawRecord, Relationship, RelationshipType, SourceKind};
use crate::normalizer::Normalizer;
use crate::resolver::EntityResolver;
use crate::retry::RetryPolicy;
use crate::sources::SignalSource;
use crate::vector::VectorStore;

/// Number of mutexes entity ids are hashed onto.
const ENTITY_LOCK_STRIPES: usize = 64;

type EdgeKey = (String, RelationshipType, String);

/// Outcome of ingesting one source batch.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: SourceKind,
    /// Raw records in the batch.
    pub records: usize,
    /// Records that normalized cleanly.
    pub normalized: usize,
    pub malformed: Vec<MalformedRecord>,
    /// Distinct canonical entities the batch touched.
    pub entities: usize,
    /// Entities whose stored form changed in the attempt that succeeded.
    pub entities_changed: usize,
    /// Distinct relationships implied by the batch's records.
    pub relationships: usize,
    /// Relationships inferred against entities already in the graph.
    pub inferred: usize,
    pub conflicts: Vec<ResolutionConflict>,
}

/// A source that could not be loaded or ingested.
#[derive(Debug, Clone, Serialize)]
pub struct SourceFailure {
    pub source: SourceKind,
    pub error: String,
}

/// Outcome of ingesting several sources.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestionReport {
    pub sources: Vec<SourceReport>,
    pub failures: Vec<SourceFailure>,
}

impl IngestionReport {
    pub fn total_records(&self) -> usize {
        self.sources.iter().map(|s| s.records).sum()
    }

    pub fn total_malformed(&self) -> usize {
        self.sources.iter().map(|s| s.malformed.len()).sum()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Running per-source ingestion counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceLedgerEntry {
    pub batches: usize,
    pub records: usize,
    pub ingested: usize,
    pub malformed: usize,
    pub last_ingested_at: Option<DateTime<Utc>>,
}

/// Per-source counters shared between the builder and the stats service.
#[derive(Debug, Default)]
pub struct IngestionLedger {
    entries: RwLock<BTreeMap<SourceKind, SourceLedgerEntry>>,
}

impl IngestionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    async fn record(&self, report: &SourceReport) {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(report.source).or_default();
        entry.batches += 1;
        entry.records += report.records;
        entry.ingested += report.normalized;
        entry.malformed += report.malformed.len();
        entry.last_ingested_at = Some(Utc::now());
    }

    pub async fn snapshot(&self) -> BTreeMap<SourceKind, SourceLedgerEntry> {
        self.entries.read().await.clone()
    }
}

/// What one write attempt accomplished.
#[derive(Debug, Default)]
struct BatchWrite {
    changed: usize,
    inferred: usize,
    conflicts: Vec<ResolutionConflict>,
}

/// Populates the graph and vector stores from raw source batches.
///
/// Writes to a canonical entity are serialized through striped locks, so
/// sources can be ingested concurrently. Relationship inference runs under
/// one builder-wide lock after a batch's own writes, which guarantees that
/// whichever of two concurrent batches links second sees the other's
/// entities.
pub struct MemoryGraphBuilder {
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    normalizer: Normalizer,
    resolver: EntityResolver,
    retry: RetryPolicy,
    entity_locks: Vec<Mutex<()>>,
    link_lock: Mutex<()>,
    ledger: Arc<IngestionLedger>,
}

fn graph_error(err: AppError) -> AppError {
    AppError::unavailable(StoreKind::Graph, err)
}

fn vector_error(err: AppError) -> AppError {
    AppError::unavailable(StoreKind::Vector, err)
}

impl MemoryGraphBuilder {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            graph,
            vectors,
            embedder,
            normalizer: Normalizer::new(),
            resolver: EntityResolver::new(),
            retry: RetryPolicy::default(),
            entity_locks: (0..ENTITY_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            link_lock: Mutex::new(()),
            ledger: Arc::new(IngestionLedger::new()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<IngestionLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn ledger(&self) -> Arc<IngestionLedger> {
        Arc::clone(&self.ledger)
    }

    /// Normalizes, resolves and writes one source batch.
    ///
    /// Malformed records are reported, not fatal. A store failure that
    /// outlasts the retry policy fails the batch with a typed error.
    pub async fn ingest(
        &self,
        source: SourceKind,
        records: &[RawRecord],
    ) -> Result<SourceReport, AppError> {
        let batch = self.normalizer.normalize(source, records);
        let normalized = batch.normalized_records();

        let mut groups: BTreeMap<String, Vec<Entity>> = BTreeMap::new();
        for candidate in batch.entities {
            match self.resolver.resolve(&candidate) {
                Ok(entity_id) => groups.entry(entity_id).or_default().push(candidate),
                Err(e) => tracing::warn!(%source, error = %e, "Dropping unresolvable entity"),
            }
        }

        let mut edges: BTreeMap<EdgeKey, Relationship> = BTreeMap::new();
        for rel in batch.relationships {
            match edges.get_mut(&rel.key()) {
                Some(existing) => existing.absorb(&rel),
                None => {
                    edges.insert(rel.key(), rel);
                }
            }
        }
        let edges: Vec<Relationship> = edges.into_values().collect();

        let (groups, edges) = (&groups, &edges);
        let written = self
            .retry
            .run(source.as_str(), move || async move {
                self.write_batch(groups, edges).await
            })
            .await?;

        let report = SourceReport {
            source,
            records: batch.records,
            normalized,
            malformed: batch.malformed,
            entities: groups.len(),
            entities_changed: written.changed,
            relationships: edges.len(),
            inferred: written.inferred,
            conflicts: written.conflicts,
        };
        self.ledger.record(&report).await;

        tracing::info!(
            %source,
            records = report.records,
            malformed = report.malformed.len(),
            entities = report.entities,
            changed = report.entities_changed,
            relationships = report.relationships,
            inferred = report.inferred,
            conflicts = report.conflicts.len(),
            "Ingested source batch"
        );
        Ok(report)
    }

    /// Loads and ingests every source concurrently.
    ///
    /// One failing source does not stop the others; it is listed in
    /// [`IngestionReport::failures`].
    pub async fn ingest_all(&self, sources: &[Box<dyn SignalSource>]) -> IngestionReport {
        let runs = sources.iter().map(|source| self.ingest_source(source.as_ref()));
        let mut report = IngestionReport::default();
        for (kind, result) in join_all(runs).await {
            match result {
                Ok(source_report) => report.sources.push(source_report),
                Err(e) => {
                    tracing::warn!(source = %kind, error = %e, "Source ingestion failed");
                    report.failures.push(SourceFailure {
                        source: kind,
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }

    async fn ingest_source(
        &self,
        source: &dyn SignalSource,
    ) -> (SourceKind, Result<SourceReport, AppError>) {
        let kind = source.kind();
        let result = match source.load().await {
            Ok(records) => self.ingest(kind, &records).await,
            Err(e) => Err(e),
        };
        (kind, result)
    }

    async fn lock_entity(&self, entity_id: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        entity_id.hash(&mut hasher);
        let stripe = (hasher.finish() as usize) % self.entity_locks.len();
        self.entity_locks[stripe].lock().await
    }

    async fn write_batch(
        &self,
        groups: &BTreeMap<String, Vec<Entity>>,
        edges: &[Relationship],
    ) -> Result<BatchWrite, AppError> {
        let mut written = BatchWrite::default();
        let mut touched = Vec::with_capacity(groups.len());

        for (entity_id, candidates) in groups {
            let _guard = self.lock_entity(entity_id).await;
            let (entity, changed) = self
                .write_entity(entity_id, candidates, &mut written.conflicts)
                .await?;
            if changed {
                written.changed += 1;
            }
            touched.push(entity);
        }

        for edge in edges {
            let _guard = self.lock_entity(&edge.source_entity_id).await;
            self.graph.upsert_edge(edge).await.map_err(graph_error)?;
        }

        written.inferred = self.link(&touched).await?;
        Ok(written)
    }

    /// Merges all candidates for one canonical id into the stored entity and
    /// brings its embedding up to date. Caller holds the entity's lock.
    async fn write_entity(
        &self,
        entity_id: &str,
        candidates: &[Entity],
        conflicts: &mut Vec<ResolutionConflict>,
    ) -> Result<(Entity, bool), AppError> {
        let stored = self.graph.get(entity_id).await.map_err(graph_error)?;

        let mut current = stored.clone();
        for candidate in candidates {
            let outcome = self.resolver.merge(current.take(), candidate.clone())?;
            conflicts.extend(outcome.conflicts);
            current = Some(outcome.entity);
        }
        let entity = current
            .ok_or_else(|| AppError::Internal(format!("no candidates for {}", entity_id)))?;

        let changed = stored.as_ref() != Some(&entity);
        if changed {
            self.graph.upsert_node(&entity).await.map_err(graph_error)?;
            tracing::debug!(entity_id, created = stored.is_none(), "Entity written");
        }
        self.sync_embedding(&entity).await?;
        Ok((entity, changed))
    }

    /// Re-embeds the entity when the vector store holds no vector for it or
    /// one produced from different text.
    async fn sync_embedding(&self, entity: &Entity) -> Result<(), AppError> {
        let stored = self
            .vectors
            .get(&entity.entity_id)
            .await
            .map_err(vector_error)?;
        if stored.is_some_and(|record| record.text == entity.embedding_text) {
            return Ok(());
        }

        let vector = self.embedder.embed(&entity.embedding_text).await?;
        self.vectors
            .upsert(&entity.entity_id, &vector, &entity.embedding_text)
            .await
            .map_err(vector_error)
    }

    /// Re-evaluates link rules for the touched entities against the graph.
    ///
    /// Edges a rule now implies are written; inferred edges whose rule no
    /// longer holds for the current entity states are removed. Entities are
    /// read back under the link lock, so a newer write from a concurrent
    /// batch is never judged by a stale copy.
    async fn link(&self, touched: &[Entity]) -> Result<usize, AppError> {
        let _link = self.link_lock.lock().await;

        let mut by_type: HashMap<EntityType, Vec<Entity>> = HashMap::new();
        let mut inferred: BTreeMap<EdgeKey, Relationship> = BTreeMap::new();
        let mut stale: Vec<EdgeKey> = Vec::new();

        for entity in touched {
            let rules = rules_for(entity.entity_type);
            if rules.is_empty() {
                continue;
            }
            let Some(entity) = self.graph.get(&entity.entity_id).await.map_err(graph_error)? else {
                continue;
            };

            for (rule, side, other_type) in rules {
                if !by_type.contains_key(&other_type) {
                    let found = self
                        .graph
                        .entities_of_type(other_type)
                        .await
                        .map_err(graph_error)?;
                    by_type.insert(other_type, found);
                }
                let others = by_type
                    .get(&other_type)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let implied = infer(&rule, side, &entity, others);

                let existing = self
                    .graph
                    .incident_edges(
                        &entity.entity_id,
                        &EdgeFilter::only([rule.relationship_type]),
                    )
                    .await
                    .map_err(graph_error)?;
                for edge in existing {
                    let on_side = match side {
                        Side::From => edge.source_entity_id == entity.entity_id,
                        Side::To => edge.target_entity_id == entity.entity_id,
                    };
                    if on_side && !implied.iter().any(|e| e.key() == edge.key()) {
                        stale.push(edge.key());
                    }
                }

                for edge in implied {
                    match inferred.get_mut(&edge.key()) {
                        Some(existing) => existing.absorb(&edge),
                        None => {
                            inferred.insert(edge.key(), edge);
                        }
                    }
                }
            }
        }

        stale.retain(|key| !inferred.contains_key(key));
        for (source, relationship_type, target) in &stale {
            let _guard = self.lock_entity(source).await;
            if self
                .graph
                .remove_edge(source, *relationship_type, target)
                .await
                .map_err(graph_error)?
            {
                tracing::debug!(%source, %relationship_type, %target, "Retracted inferred relationship");
            }
        }
        for edge in inferred.values() {
            let _guard = self.lock_entity(&edge.source_entity_id).await;
            self.graph.upsert_edge(edge).await.map_err(graph_error)?;
            tracing::debug!(relationship = %edge, "Inferred relationship");
        }
        Ok(inferred.len())
    }
}
