//! Hybrid retrieval: vector seeds expanded through the graph.
//!
//! A query is embedded and matched against the vector index; matches above
//! the similarity floor, plus any entity the question names outright,
//! become seeds. An empty index yields an empty context. Each seed is expanded through the graph and every entity
//! reached inherits `seed score × decay^hop`. Entities reached more than
//! once keep their best score and their shortest provenance path.
//!
//! Every store call runs under a timeout and the retry policy. When one
//! store gives up, retrieval continues with the other and the context is
//! marked degraded.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::error::{AppError, StoreKind};
use crate::graph::{EdgeFilter, GraphStore};
use crate::models::{
    generate_ulid, ContextItem, EmbeddingRecord, EmptyReason, Entity, EntityType,
    ProvenancePath, RetrievalBudget, RetrievalContext, RetrievalStatus, RetrievedItem,
    VectorMatch,
};
use crate::retry::{with_timeout, RetryPolicy};
use crate::services::intent::QueryIntent;
use crate::vector::VectorStore;

/// Score given to entities the question names explicitly.
const REFERENCE_SCORE: f32 = 1.0;

/// Tunables for a [`HybridRetriever`].
#[derive(Debug, Clone)]
pub struct RetrievalPolicy {
    pub seed_top_k: usize,
    pub max_hops: usize,
    pub decay_factor: f32,
    pub min_similarity: f32,
    pub include_relationships: bool,
    pub edge_types: EdgeFilter,
    pub store_timeout: Duration,
    pub request_timeout: Duration,
    /// Budget used when the caller does not pass one.
    pub budget: RetrievalBudget,
}

impl Default for RetrievalPolicy {
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

impl From<&RetrievalConfig> for RetrievalPolicy {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            seed_top_k: config.seed_top_k,
            max_hops: config.max_hops,
            decay_factor: config.decay_factor,
            min_similarity: config.min_similarity,
            include_relationships: config.include_relationships,
            edge_types: EdgeFilter::All,
            store_timeout: config.store_timeout(),
            request_timeout: config.request_timeout(),
            budget: RetrievalBudget {
                max_items: config.max_items,
                max_tokens: config.max_tokens,
            },
        }
    }
}

/// Stores that failed during one retrieval.
#[derive(Default)]
struct Degradation {
    unavailable: BTreeSet<StoreKind>,
    warnings: Vec<String>,
}

impl Degradation {
    fn record(&mut self, store: StoreKind, err: &AppError) {
        tracing::warn!(%store, error = %err, "Store unavailable, degrading retrieval");
        self.unavailable.insert(store);
        self.warnings.push(format!("{} store unavailable: {}", store, err));
    }

    fn failed(&self, store: StoreKind) -> bool {
        self.unavailable.contains(&store)
    }
}

struct Candidate {
    entity: Entity,
    score: f32,
    path: ProvenancePath,
    /// First-seen position, the secondary sort key.
    order: usize,
}

/// Entities found so far, keyed by id.
#[derive(Default)]
struct CandidateSet {
    by_id: HashMap<String, Candidate>,
}

impl CandidateSet {
    /// Keeps the maximum score and, independently, the shortest path
    /// (smallest relationship-type sequence, then smallest id sequence).
    fn offer(&mut self, entity: Entity, score: f32, path: ProvenancePath) {
        let order = self.by_id.len();
        match self.by_id.get_mut(&entity.entity_id) {
            Some(existing) => {
                existing.score = existing.score.max(score);
                if path_rank(&path) < path_rank(&existing.path) {
                    existing.path = path;
                }
            }
            None => {
                self.by_id.insert(
                    entity.entity_id.clone(),
                    Candidate {
                        entity,
                        score,
                        path,
                        order,
                    },
                );
            }
        }
    }

    fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Candidates by descending score, first-seen order breaking ties.
    fn ranked(self) -> Vec<Candidate> {
        let mut ranked: Vec<Candidate> = self.by_id.into_values().collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.order.cmp(&b.order)));
        ranked
    }
}

fn path_rank(path: &ProvenancePath) -> (usize, Vec<&'static str>, Vec<&str>) {
    (
        path.len(),
        path.type_names(),
        path.steps.iter().map(|s| s.reached()).collect(),
    )
}

/// Rebuilds a bare entity from its embedding when the graph cannot be read.
fn detached_entity(record: EmbeddingRecord) -> Option<Entity> {
    let (prefix, _) = record.entity_id.split_once(':')?;
    let entity_type = EntityType::ALL
        .into_iter()
        .find(|t| t.id_prefix() == prefix)?;
    Some(Entity::from_embedding_text(
        record.entity_id,
        entity_type,
        &record.text,
    ))
}

/// Keeps the longest prefix of `items` that fits the budget.
fn apply_budget(items: Vec<RetrievedItem>, budget: RetrievalBudget) -> Vec<RetrievedItem> {
    let mut kept = Vec::new();
    let mut tokens = 0;
    for item in items {
        if kept.len() >= budget.max_items {
            break;
        }
        let cost = item.estimated_tokens();
        if budget.max_tokens.is_some_and(|max| tokens + cost > max) {
            break;
        }
        tokens += cost;
        kept.push(item);
    }
    kept
}

/// Combines vector similarity with graph expansion.
pub struct HybridRetriever {
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    policy: RetrievalPolicy,
    retry: RetryPolicy,
}

impl HybridRetriever {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        policy: RetrievalPolicy,
    ) -> Self {
        Self {
            graph,
            vectors,
            embedder,
            policy,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Retrieves with the policy's default budget.
    pub async fn retrieve_default(&self, query: &str) -> Result<RetrievalContext, AppError> {
        self.retrieve(query, self.policy.budget).await
    }

    /// Produces a ranked, budgeted context for `query`.
    ///
    /// An empty context is a result, not an error. The call fails only when
    /// no retrieval mode could run (the vector store is unavailable and the
    /// graph is unavailable or has nothing named to look up), the request
    /// times out, or the input is invalid.
    pub async fn retrieve(
        &self,
        query: &str,
        budget: RetrievalBudget,
    ) -> Result<RetrievalContext, AppError> {
        if query.trim().is_empty() {
            return Err(AppError::Validation("query text is empty".into()));
        }
        if budget.max_items == 0 {
            return Err(AppError::Validation("retrieval budget allows no items".into()));
        }
        with_timeout(
            "retrieval",
            self.policy.request_timeout,
            self.run(query, budget),
        )
        .await
    }

    async fn run(&self, query: &str, budget: RetrievalBudget) -> Result<RetrievalContext, AppError> {
        let query_id = generate_ulid();
        let intent = QueryIntent::parse(query, Utc::now());
        let mut degradation = Degradation::default();

        let vector = self.embedder.embed(query).await?;
        let matches = {
            let (vectors, vector, top_k) = (&self.vectors, &vector, self.policy.seed_top_k);
            match self
                .guarded(StoreKind::Vector, "vector query", move || {
                    vectors.query(vector, top_k)
                })
                .await
            {
                Ok(matches) => matches,
                Err(e) => {
                    degradation.record(StoreKind::Vector, &e);
                    Vec::new()
                }
            }
        };
        // A reachable but empty index means nothing has been ingested; named
        // references are not looked up without it.
        if matches.is_empty() && !degradation.failed(StoreKind::Vector) {
            tracing::info!(%query_id, "Vector index is empty");
            return Ok(RetrievalContext::empty(
                query_id,
                query,
                EmptyReason::EmptyIndex,
            ));
        }

        let above_floor: Vec<&VectorMatch> = matches
            .iter()
            .filter(|m| m.score >= self.policy.min_similarity)
            .collect();

        let seeds = self.seeds(&intent, &above_floor, &mut degradation).await;
        tracing::debug!(
            %query_id,
            matches = matches.len(),
            above_floor = above_floor.len(),
            seeds = seeds.len(),
            "Seeds selected"
        );

        // Without the vector store the graph is only consulted for named
        // references; if there are none, no retrieval mode ran at all.
        let graph_unusable =
            degradation.failed(StoreKind::Graph) || intent.references.is_empty();
        if degradation.failed(StoreKind::Vector) && graph_unusable {
            return Err(AppError::StoreUnavailable {
                store: StoreKind::Vector,
                message: format!(
                    "no retrieval mode available: {}",
                    degradation.warnings.join("; ")
                ),
            });
        }

        let (admitted, rejected): (Vec<_>, Vec<_>) =
            seeds.into_iter().partition(|(entity, _)| intent.admits(entity));
        if !rejected.is_empty() {
            tracing::debug!(%query_id, rejected = rejected.len(), "Seeds filtered by query constraints");
        }

        let mut candidates = CandidateSet::default();
        for (seed, score) in &admitted {
            candidates.offer(
                seed.clone(),
                *score,
                ProvenancePath::seed(&seed.entity_id),
            );
        }
        if !degradation.failed(StoreKind::Graph) {
            self.expand(&intent, &admitted, &mut candidates, &mut degradation)
                .await;
        }

        let candidates_considered = candidates.len();
        let items = apply_budget(self.items(candidates), budget);

        let status = if !degradation.unavailable.is_empty() {
            RetrievalStatus::Degraded {
                unavailable: degradation.unavailable.iter().copied().collect(),
            }
        } else if items.is_empty() {
            let reason = if !admitted.is_empty() || !rejected.is_empty() {
                EmptyReason::FilteredOut
            } else {
                EmptyReason::BelowFloor
            };
            RetrievalStatus::Empty { reason }
        } else {
            RetrievalStatus::Complete
        };

        tracing::info!(
            %query_id,
            items = items.len(),
            candidates = candidates_considered,
            status = ?status,
            "Retrieval finished"
        );

        Ok(RetrievalContext {
            query_id,
            query: query.to_string(),
            items,
            status,
            candidates_considered,
            warnings: degradation.warnings,
        })
    }

    /// Explicit references first, then vector matches in rank order.
    async fn seeds(
        &self,
        intent: &QueryIntent,
        matches: &[&VectorMatch],
        degradation: &mut Degradation,
    ) -> Vec<(Entity, f32)> {
        let mut seeds: Vec<(Entity, f32)> = Vec::new();

        for reference in &intent.references {
            if degradation.failed(StoreKind::Graph) {
                break;
            }
            match self.fetch(reference).await {
                Ok(Some(entity)) => seeds.push((entity, REFERENCE_SCORE)),
                Ok(None) => {}
                Err(e) => degradation.record(StoreKind::Graph, &e),
            }
        }

        for m in matches {
            if seeds.iter().any(|(e, _)| e.entity_id == m.entity_id) {
                continue;
            }
            let entity = if degradation.failed(StoreKind::Graph) {
                None
            } else {
                match self.fetch(&m.entity_id).await {
                    Ok(found) => {
                        if found.is_none() {
                            tracing::debug!(entity_id = %m.entity_id, "Vector match has no graph entity");
                        }
                        found
                    }
                    Err(e) => {
                        degradation.record(StoreKind::Graph, &e);
                        None
                    }
                }
            };
            let entity = match entity {
                Some(entity) => Some(entity),
                None if degradation.failed(StoreKind::Graph) => self.detached(&m.entity_id).await,
                None => None,
            };
            if let Some(entity) = entity {
                seeds.push((entity, m.score));
            }
        }
        seeds
    }

    /// Adds every admitted entity within `max_hops` of an admitted seed.
    async fn expand(
        &self,
        intent: &QueryIntent,
        seeds: &[(Entity, f32)],
        candidates: &mut CandidateSet,
        degradation: &mut Degradation,
    ) {
        let mut cache: HashMap<String, Option<Entity>> = HashMap::new();

        'seeds: for (seed, seed_score) in seeds {
            let neighbors = {
                let (graph, id, edge_types, max_hops) = (
                    &self.graph,
                    seed.entity_id.as_str(),
                    &self.policy.edge_types,
                    self.policy.max_hops,
                );
                match self
                    .guarded(StoreKind::Graph, "graph expansion", move || {
                        graph.neighbors(id, edge_types, max_hops)
                    })
                    .await
                {
                    Ok(neighbors) => neighbors,
                    Err(e) => {
                        degradation.record(StoreKind::Graph, &e);
                        break 'seeds;
                    }
                }
            };

            for neighbor in neighbors {
                let entity = match cache.get(&neighbor.entity_id) {
                    Some(found) => found.clone(),
                    None => match self.fetch(&neighbor.entity_id).await {
                        Ok(found) => {
                            cache.insert(neighbor.entity_id.clone(), found.clone());
                            found
                        }
                        Err(e) => {
                            degradation.record(StoreKind::Graph, &e);
                            break 'seeds;
                        }
                    },
                };
                let Some(entity) = entity else {
                    continue;
                };
                if !intent.admits(&entity) {
                    continue;
                }
                let score = seed_score * self.policy.decay_factor.powi(neighbor.hop as i32);
                candidates.offer(
                    entity,
                    score,
                    ProvenancePath {
                        seed_id: seed.entity_id.clone(),
                        steps: neighbor.path,
                    },
                );
            }
        }
    }

    /// Ranked items; each expanded entity is followed by the edge that
    /// reached it when relationships are included.
    fn items(&self, candidates: CandidateSet) -> Vec<RetrievedItem> {
        let mut items = Vec::new();
        let mut edges_seen = HashSet::new();
        for candidate in candidates.ranked() {
            let edge = self
                .policy
                .include_relationships
                .then(|| candidate.path.steps.last())
                .flatten()
                .map(|step| step.relationship.clone());
            let (score, path) = (candidate.score, candidate.path);

            items.push(RetrievedItem {
                item: ContextItem::Entity(candidate.entity),
                score,
                path: path.clone(),
            });
            if let Some(edge) = edge {
                if edges_seen.insert(edge.key()) {
                    items.push(RetrievedItem {
                        item: ContextItem::Relationship(edge),
                        score,
                        path,
                    });
                }
            }
        }
        items
    }

    async fn fetch(&self, entity_id: &str) -> Result<Option<Entity>, AppError> {
        let graph = &self.graph;
        self.guarded(StoreKind::Graph, "graph get", move || graph.get(entity_id))
            .await
    }

    async fn detached(&self, entity_id: &str) -> Option<Entity> {
        let vectors = &self.vectors;
        match self
            .guarded(StoreKind::Vector, "vector get", move || vectors.get(entity_id))
            .await
        {
            Ok(record) => record.and_then(detached_entity),
            Err(e) => {
                tracing::debug!(entity_id, error = %e, "Could not read embedding text");
                None
            }
        }
    }

    /// Runs a store call under the per-call timeout and the retry policy.
    async fn guarded<T, F, Fut>(
        &self,
        store: StoreKind,
        operation: &str,
        mut call: F,
    ) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let limit = self.policy.store_timeout;
        self.retry
            .run(operation, move || with_timeout(operation, limit, call()))
            .await
            .map_err(|e| AppError::unavailable(store, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttributeStamp, AttributeValue, Relationship, RelationshipType, SourceKind};

    fn entity(id: &str, t: EntityType, text: &str) -> Entity {
        let mut e = Entity::new(id, t);
        e.embedding_text = text.to_string();
        e
    }

    fn stamp() -> AttributeStamp {
        AttributeStamp {
            observed_at: None,
            source: SourceKind::Logs,
        }
    }

    #[test]
    fn test_offer_keeps_max_score_and_shortest_path() {
        let mut set = CandidateSet::default();
        let e = entity("asset:web01", EntityType::Asset, "Asset web01");
        let long = ProvenancePath {
            seed_id: "cve:CVE-1".into(),
            steps: vec![
                crate::models::PathStep {
                    relationship: Relationship::new(
                        RelationshipType::Owns,
                        "user:bob",
                        "asset:web01",
                    ),
                    reversed: false,
                },
                crate::models::PathStep {
                    relationship: Relationship::new(
                        RelationshipType::Affects,
                        "cve:CVE-1",
                        "asset:web01",
                    ),
                    reversed: false,
                },
            ],
        };
        set.offer(e.clone(), 0.5, long);
        set.offer(e.clone(), 0.2, ProvenancePath::seed("asset:web01"));

        let ranked = set.ranked();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].score, 0.5);
        assert!(ranked[0].path.is_empty());
    }

    #[test]
    fn test_ties_keep_first_seen_order() {
        let mut set = CandidateSet::default();
        for id in ["user:zed", "user:amy", "user:kim"] {
            set.offer(
                entity(id, EntityType::User, id),
                0.3,
                ProvenancePath::seed(id),
            );
        }
        let ids: Vec<_> = set
            .ranked()
            .into_iter()
            .map(|c| c.entity.entity_id)
            .collect();
        assert_eq!(ids, vec!["user:zed", "user:amy", "user:kim"]);
    }

    #[test]
    fn test_budget_keeps_prefix() {
        let mut big = entity("log:e1", EntityType::LogEvent, &"x".repeat(400));
        big.set("event_id", AttributeValue::Text("e1".into()), stamp());
        let small = entity("user:amy", EntityType::User, "User amy");
        let item = |e: Entity, score| RetrievedItem {
            item: ContextItem::Entity(e),
            score,
            path: ProvenancePath::default(),
        };
        let items = vec![item(small.clone(), 0.9), item(big, 0.8), item(small, 0.7)];

        let kept = apply_budget(
            items.clone(),
            RetrievalBudget {
                max_items: 10,
                max_tokens: Some(50),
            },
        );
        assert_eq!(kept.len(), 1);

        let kept = apply_budget(items, RetrievalBudget::items(2));
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_detached_entity_from_embedding() {
        let entity = detached_entity(EmbeddingRecord {
            entity_id: "signin:s1".into(),
            vector: vec![],
            text: "Login attempt by alice from 10.0.0.9 (failed)\nstatus: failed\nusername: alice".into(),
        })
        .unwrap();
        assert_eq!(entity.entity_type, EntityType::SignInEvent);
        assert_eq!(entity.text("status"), Some("failed"));
        assert_eq!(entity.text("username"), Some("alice"));
        assert!(entity.embedding_text.starts_with("Login attempt by alice"));
        assert!(detached_entity(EmbeddingRecord {
            entity_id: "nope".into(),
            vector: vec![],
            text: String::new(),
        })
        .is_none());
    }
}
