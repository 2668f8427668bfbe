//! End-to-end ingestion and retrieval over the in-memory stores.

use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use signalgraph::answer::ExtractiveAnswerGenerator;
use signalgraph::embedding::HashingEmbedder;
use signalgraph::error::{AppError, StoreKind};
use signalgraph::graph::{EdgeFilter, GraphStats, GraphStore, InMemoryGraphStore};
use signalgraph::models::{
    EmbeddingRecord, EmptyReason, Entity, EntityType, RawRecord, Relationship, RelationshipType,
    RetrievalBudget, RetrievalStatus, SourceKind, VectorMatch,
};
use signalgraph::retry::RetryPolicy;
use signalgraph::services::{
    ContextAssembler, HybridRetriever, MemoryGraphBuilder, QueryRequest, QueryService,
    RetrievalPolicy,
};
use signalgraph::vector::{InMemoryVectorStore, VectorStore};

const DIMENSIONS: usize = 384;

fn records(value: Value) -> Vec<RawRecord> {
    serde_json::from_value(value).expect("records must be an array of objects")
}

fn no_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 1,
        backoff_base_ms: 1,
        backoff_max_ms: 1,
    }
}

struct Stores {
    graph: Arc<InMemoryGraphStore>,
    vectors: Arc<InMemoryVectorStore>,
    builder: MemoryGraphBuilder,
}

impl Stores {
    fn new() -> Self {
        let graph = Arc::new(InMemoryGraphStore::new());
        let vectors = Arc::new(InMemoryVectorStore::new(DIMENSIONS));
        let builder = MemoryGraphBuilder::new(
            graph.clone(),
            vectors.clone(),
            Arc::new(HashingEmbedder::new(DIMENSIONS)),
        );
        Self {
            graph,
            vectors,
            builder,
        }
    }

    fn retriever(&self, policy: RetrievalPolicy) -> HybridRetriever {
        HybridRetriever::new(
            self.graph.clone(),
            self.vectors.clone(),
            Arc::new(HashingEmbedder::new(DIMENSIONS)),
            policy,
        )
        .with_retry(no_retry())
    }

    async fn ingest(&self, batches: &[(SourceKind, Vec<RawRecord>)]) {
        for (source, batch) in batches {
            self.builder.ingest(*source, batch).await.unwrap();
        }
    }

    /// Every entity and edge, in a stable order.
    async fn dump(&self) -> (Vec<Entity>, Vec<Relationship>) {
        let mut entities = Vec::new();
        let mut edges = Vec::new();
        for entity_type in EntityType::ALL {
            for entity in self.graph.entities_of_type(entity_type).await.unwrap() {
                for edge in self
                    .graph
                    .incident_edges(&entity.entity_id, &EdgeFilter::All)
                    .await
                    .unwrap()
                {
                    if edge.source_entity_id == entity.entity_id {
                        edges.push(edge);
                    }
                }
                entities.push(entity);
            }
        }
        entities.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        edges.sort_by_key(Relationship::key);
        (entities, edges)
    }

    async fn stats(&self) -> GraphStats {
        self.graph.stats().await.unwrap()
    }
}

/// A varied batch per source, with overlapping users and assets.
fn telemetry() -> Vec<(SourceKind, Vec<RawRecord>)> {
    let recent = (Utc::now() - Duration::hours(3)).to_rfc3339();
    vec![
        (
            SourceKind::Cves,
            records(json!([
                {"cve_id": "CVE-2024-1234", "severity": "critical", "cvss_score": 9.8,
                 "affected_product": "nginx 1.18", "published_date": "2024-03-01"},
                {"cve_id": "cve-2023-4863", "severity": "high", "affected_products": ["libwebp"]}
            ])),
        ),
        (
            SourceKind::Assets,
            records(json!([
                {"asset_id": "A-1", "hostname": "web01", "software": ["nginx 1.18", "openssl 3.0"],
                 "owner": "bob", "ip_address": "10.0.0.5", "last_scan_date": "2024-05-01"},
                {"asset_id": "A-2", "hostname": "db01", "software": ["postgresql 15"], "owner": "carol"}
            ])),
        ),
        (
            SourceKind::Logs,
            records(json!([
                {"event_id": "E-1", "event_type": "malware_detected", "timestamp": recent,
                 "severity": "high", "user": "bob", "asset_id": "web01"}
            ])),
        ),
        (
            SourceKind::CloudConfigs,
            records(json!([
                {"config_id": "C-1", "resource_id": "db01", "setting_name": "public_access",
                 "setting_value": "enabled", "compliant": "no", "risk_level": "high"}
            ])),
        ),
        (
            SourceKind::SigninLogs,
            records(json!([
                {"log_id": "S-1", "user": "Bob", "source_ip": "203.0.113.9",
                 "status": "failure", "timestamp": recent}
            ])),
        ),
        (
            SourceKind::UserRoles,
            records(json!([
                {"user": "bob", "user_id": "u-42", "role_id": "R-admin", "role_name": "Administrator",
                 "assigned_date": "2024-01-15"}
            ])),
        ),
        (
            SourceKind::RolePermissions,
            records(json!([
                {"permission_id": "P-1", "role_id": "R-admin", "action": "delete", "resource": "*"}
            ])),
        ),
    ]
}

#[tokio::test]
async fn test_critical_cve_reaches_affected_asset() {
    let stores = Stores::new();
    stores
        .ingest(&[
            (
                SourceKind::Cves,
                records(json!([
                    {"id": "CVE-2024-1234", "severity": "critical", "affected_product": "nginx 1.18"}
                ])),
            ),
            (
                SourceKind::Assets,
                records(json!([{"hostname": "web01", "software": ["nginx 1.18"]}])),
            ),
        ])
        .await;

    let edges = stores
        .graph
        .incident_edges("cve:CVE-2024-1234", &EdgeFilter::only([RelationshipType::Affects]))
        .await
        .unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].source_entity_id, "cve:CVE-2024-1234");
    assert_eq!(edges[0].target_entity_id, "asset:web01");

    let context = stores
        .retriever(RetrievalPolicy::default())
        .retrieve_default("Which assets are affected by critical CVEs?")
        .await
        .unwrap();
    assert_eq!(context.status, RetrievalStatus::Complete);

    let asset = context.find("asset:web01").expect("web01 in context");
    assert!(asset.score > 0.0);
    assert_eq!(asset.path.len(), 1);
    assert_eq!(asset.path.seed_id, "cve:CVE-2024-1234");
    assert_eq!(
        asset.path.relationship_types(),
        vec![RelationshipType::Affects]
    );
}

#[tokio::test]
async fn test_failed_login_question_excludes_successful_sign_in() {
    let stores = Stores::new();
    let failed_at = (Utc::now() - Duration::hours(2)).to_rfc3339();
    let succeeded_at = (Utc::now() - Duration::hours(5)).to_rfc3339();
    stores
        .ingest(&[(
            SourceKind::SigninLogs,
            records(json!([
                {"log_id": "S-1", "user": "alice", "source_ip": "203.0.113.9",
                 "status": "failed", "timestamp": failed_at},
                {"log_id": "S-2", "user": "alice", "source_ip": "198.51.100.7",
                 "status": "success", "timestamp": succeeded_at}
            ])),
        )])
        .await;

    let context = stores
        .retriever(RetrievalPolicy::default())
        .retrieve_default("Show me failed login attempts in the last 24 hours")
        .await
        .unwrap();

    assert!(context.find("signin:S-1").is_some());
    assert!(context.find("signin:S-2").is_none());
    for (entity, _) in context.entities() {
        assert_ne!(entity.text("status"), Some("success"));
    }
}

#[tokio::test]
async fn test_reingesting_a_batch_changes_nothing() {
    let stores = Stores::new();
    let batches = telemetry();
    stores.ingest(&batches).await;
    let first = stores.dump().await;
    let first_stats = stores.stats().await;
    let documents = stores.vectors.count().await.unwrap();

    for (source, batch) in &batches {
        let report = stores.builder.ingest(*source, batch).await.unwrap();
        assert_eq!(report.entities_changed, 0, "{} changed on re-ingest", source);
    }

    assert_eq!(stores.dump().await, first);
    assert_eq!(stores.stats().await, first_stats);
    assert_eq!(stores.vectors.count().await.unwrap(), documents);
}

#[tokio::test]
async fn test_ingestion_order_does_not_change_the_graph() {
    let forward = Stores::new();
    let backward = Stores::new();
    let mut batches = telemetry();
    forward.ingest(&batches).await;
    batches.reverse();
    backward.ingest(&batches).await;

    let (entities, edges) = forward.dump().await;
    assert_eq!((entities.clone(), edges.clone()), backward.dump().await);

    // Both sides of every cross-source link exist whichever side came first
    let keys: Vec<_> = edges.iter().map(Relationship::key).collect();
    assert!(keys.contains(&(
        "cve:CVE-2024-1234".to_string(),
        RelationshipType::Affects,
        "asset:web01".to_string()
    )));
    assert!(keys.contains(&(
        "log:E-1".to_string(),
        RelationshipType::RunsOn,
        "asset:web01".to_string()
    )));
    assert!(keys.contains(&(
        "cloud:C-1".to_string(),
        RelationshipType::Configures,
        "asset:db01".to_string()
    )));

    for entity in &entities {
        let a = forward.vectors.get(&entity.entity_id).await.unwrap();
        let b = backward.vectors.get(&entity.entity_id).await.unwrap();
        assert_eq!(a.map(|r| r.text), b.map(|r| r.text));
    }
}

#[tokio::test]
async fn test_written_entity_reads_back_intact() {
    let stores = Stores::new();
    stores.ingest(&telemetry()).await;

    let cve = stores.graph.get("cve:CVE-2024-1234").await.unwrap().unwrap();
    assert_eq!(cve.entity_type, EntityType::Cve);
    assert_eq!(cve.text("severity"), Some("critical"));
    assert_eq!(
        cve.attribute("cvss_score").map(|v| v.to_string()),
        Some("9.8".to_string())
    );
    assert_eq!(
        cve.attribute("affected_products").map(|v| v.to_string()),
        Some("nginx 1.18".to_string())
    );
    assert!(cve.source_refs.iter().any(|r| r.source == SourceKind::Cves));

    // Merged from the asset owner, the sign-in and the role assignment
    let bob = stores.graph.get("user:bob").await.unwrap().unwrap();
    assert_eq!(bob.text("user_id"), Some("u-42"));
    let sources: Vec<SourceKind> = bob.source_refs.iter().map(|r| r.source).collect();
    for source in [SourceKind::Assets, SourceKind::SigninLogs, SourceKind::UserRoles] {
        assert!(sources.contains(&source), "missing {}", source);
    }

    let stored = stores.vectors.get("cve:CVE-2024-1234").await.unwrap().unwrap();
    assert_eq!(stored.text, cve.embedding_text);
}

#[tokio::test]
async fn test_more_hops_never_shrink_the_candidate_set() {
    let stores = Stores::new();
    stores.ingest(&telemetry()).await;
    let question = "What happened around CVE-2024-1234?";

    let mut previous = 0;
    for max_hops in 0..=3 {
        let policy = RetrievalPolicy {
            max_hops,
            budget: RetrievalBudget::items(1_000),
            ..RetrievalPolicy::default()
        };
        let decay = policy.decay_factor;
        let context = stores
            .retriever(policy)
            .retrieve_default(question)
            .await
            .unwrap();

        assert!(
            context.candidates_considered >= previous,
            "max_hops {} considered {} < {}",
            max_hops,
            context.candidates_considered,
            previous
        );
        previous = context.candidates_considered;

        let best_seed = context
            .entities()
            .filter(|(_, item)| item.path.is_empty())
            .map(|(_, item)| item.score)
            .fold(0.0f32, f32::max);
        for (entity, item) in context.entities() {
            assert!(item.path.len() <= max_hops);
            let ceiling = best_seed * decay.powi(item.path.len() as i32);
            assert!(
                item.score <= ceiling + 1e-6,
                "{} scored {} above {}",
                entity.entity_id,
                item.score,
                ceiling
            );
        }
    }
    assert!(previous > 1);
}

#[tokio::test]
async fn test_empty_index_is_an_empty_context() {
    let stores = Stores::new();
    let context = stores
        .retriever(RetrievalPolicy::default())
        .retrieve_default("Which assets are affected by critical CVEs?")
        .await
        .unwrap();

    assert!(context.is_empty());
    assert_eq!(
        context.status,
        RetrievalStatus::Empty {
            reason: EmptyReason::EmptyIndex
        }
    );
}

#[tokio::test]
async fn test_serialized_context_respects_every_budget() {
    let stores = Stores::new();
    stores.ingest(&telemetry()).await;
    let context = stores
        .retriever(RetrievalPolicy {
            budget: RetrievalBudget::items(1_000),
            ..RetrievalPolicy::default()
        })
        .retrieve_default("Which critical CVEs affect assets owned by bob?")
        .await
        .unwrap();
    assert!(!context.is_empty());

    let mut previous_included = 0;
    for max_chars in [0, 40, 120, 300, 800, 2_000, 100_000] {
        let assembled = ContextAssembler::new(max_chars).assemble(&context);
        assert!(
            assembled.text.chars().count() <= max_chars,
            "{} chars for budget {}",
            assembled.text.chars().count(),
            max_chars
        );
        assert_eq!(assembled.included + assembled.dropped, context.items.len());
        assert!(assembled.included >= previous_included);
        previous_included = assembled.included;
    }
    assert_eq!(previous_included, context.items.len());
}

#[tokio::test]
async fn test_item_budget_keeps_the_top_ranked_prefix() {
    let stores = Stores::new();
    stores.ingest(&telemetry()).await;
    let retriever = stores.retriever(RetrievalPolicy::default());
    let question = "Which critical CVEs affect assets owned by bob?";

    let full = retriever
        .retrieve(question, RetrievalBudget::items(1_000))
        .await
        .unwrap();
    let limited = retriever
        .retrieve(question, RetrievalBudget::items(3))
        .await
        .unwrap();

    assert_eq!(limited.items.len(), 3.min(full.items.len()));
    assert_eq!(limited.items[..], full.items[..limited.items.len()]);
}

/// A store whose every call fails as unavailable.
struct Unreachable;

fn down(store: StoreKind) -> AppError {
    AppError::StoreUnavailable {
        store,
        message: "connection refused".into(),
    }
}

#[async_trait]
impl GraphStore for Unreachable {
    async fn upsert_node(&self, _entity: &Entity) -> Result<(), AppError> {
        Err(down(StoreKind::Graph))
    }

    async fn upsert_edge(&self, _relationship: &Relationship) -> Result<(), AppError> {
        Err(down(StoreKind::Graph))
    }

    async fn remove_edge(
        &self,
        _source_entity_id: &str,
        _relationship_type: RelationshipType,
        _target_entity_id: &str,
    ) -> Result<bool, AppError> {
        Err(down(StoreKind::Graph))
    }

    async fn get(&self, _entity_id: &str) -> Result<Option<Entity>, AppError> {
        Err(down(StoreKind::Graph))
    }

    async fn incident_edges(
        &self,
        _entity_id: &str,
        _edge_types: &EdgeFilter,
    ) -> Result<Vec<Relationship>, AppError> {
        Err(down(StoreKind::Graph))
    }

    async fn entities_of_type(&self, _entity_type: EntityType) -> Result<Vec<Entity>, AppError> {
        Err(down(StoreKind::Graph))
    }

    async fn stats(&self) -> Result<GraphStats, AppError> {
        Err(down(StoreKind::Graph))
    }
}

#[async_trait]
impl VectorStore for Unreachable {
    async fn upsert(&self, _entity_id: &str, _vector: &[f32], _text: &str) -> Result<(), AppError> {
        Err(down(StoreKind::Vector))
    }

    async fn query(&self, _vector: &[f32], _top_k: usize) -> Result<Vec<VectorMatch>, AppError> {
        Err(down(StoreKind::Vector))
    }

    async fn get(&self, _entity_id: &str) -> Result<Option<EmbeddingRecord>, AppError> {
        Err(down(StoreKind::Vector))
    }

    async fn count(&self) -> Result<usize, AppError> {
        Err(down(StoreKind::Vector))
    }
}

fn retriever_over(graph: Arc<dyn GraphStore>, vectors: Arc<dyn VectorStore>) -> HybridRetriever {
    retriever_with(graph, vectors, RetrievalPolicy::default())
}

fn retriever_with(
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorStore>,
    policy: RetrievalPolicy,
) -> HybridRetriever {
    HybridRetriever::new(
        graph,
        vectors,
        Arc::new(HashingEmbedder::new(DIMENSIONS)),
        policy,
    )
    .with_retry(no_retry())
}

const STALL: StdDuration = StdDuration::from_secs(10);

fn impatient() -> RetrievalPolicy {
    RetrievalPolicy {
        store_timeout: StdDuration::from_millis(50),
        request_timeout: StdDuration::from_secs(5),
        ..RetrievalPolicy::default()
    }
}

/// A graph whose reads stall far past any store timeout.
struct StalledGraph(Arc<InMemoryGraphStore>);

#[async_trait]
impl GraphStore for StalledGraph {
    async fn upsert_node(&self, entity: &Entity) -> Result<(), AppError> {
        self.0.upsert_node(entity).await
    }

    async fn upsert_edge(&self, relationship: &Relationship) -> Result<(), AppError> {
        self.0.upsert_edge(relationship).await
    }

    async fn remove_edge(
        &self,
        source_entity_id: &str,
        relationship_type: RelationshipType,
        target_entity_id: &str,
    ) -> Result<bool, AppError> {
        self.0
            .remove_edge(source_entity_id, relationship_type, target_entity_id)
            .await
    }

    async fn get(&self, entity_id: &str) -> Result<Option<Entity>, AppError> {
        tokio::time::sleep(STALL).await;
        self.0.get(entity_id).await
    }

    async fn incident_edges(
        &self,
        entity_id: &str,
        edge_types: &EdgeFilter,
    ) -> Result<Vec<Relationship>, AppError> {
        tokio::time::sleep(STALL).await;
        self.0.incident_edges(entity_id, edge_types).await
    }

    async fn entities_of_type(&self, entity_type: EntityType) -> Result<Vec<Entity>, AppError> {
        tokio::time::sleep(STALL).await;
        self.0.entities_of_type(entity_type).await
    }

    async fn stats(&self) -> Result<GraphStats, AppError> {
        self.0.stats().await
    }
}

/// A vector index whose similarity search stalls.
struct StalledVectors(Arc<InMemoryVectorStore>);

#[async_trait]
impl VectorStore for StalledVectors {
    async fn upsert(&self, entity_id: &str, vector: &[f32], text: &str) -> Result<(), AppError> {
        self.0.upsert(entity_id, vector, text).await
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorMatch>, AppError> {
        tokio::time::sleep(STALL).await;
        self.0.query(vector, top_k).await
    }

    async fn get(&self, entity_id: &str) -> Result<Option<EmbeddingRecord>, AppError> {
        self.0.get(entity_id).await
    }

    async fn count(&self) -> Result<usize, AppError> {
        self.0.count().await
    }
}

#[tokio::test]
async fn test_vector_outage_falls_back_to_graph_references() {
    let stores = Stores::new();
    stores.ingest(&telemetry()).await;

    let context = retriever_over(stores.graph.clone(), Arc::new(Unreachable))
        .retrieve_default("Which assets does CVE-2024-1234 affect?")
        .await
        .unwrap();

    assert_eq!(
        context.status,
        RetrievalStatus::Degraded {
            unavailable: vec![StoreKind::Vector]
        }
    );
    assert!(!context.warnings.is_empty());
    assert_eq!(context.items[0].score, 1.0);
    assert_eq!(
        context.items[0].entity().map(|e| e.entity_id.as_str()),
        Some("cve:CVE-2024-1234")
    );
    assert!(context.find("asset:web01").is_some());

    let assembled = ContextAssembler::new(4_000).assemble(&context);
    assert!(assembled.text.starts_with("Note: partial context"));
}

#[tokio::test]
async fn test_graph_outage_keeps_vector_matches() {
    let stores = Stores::new();
    stores.ingest(&telemetry()).await;

    let context = retriever_over(Arc::new(Unreachable), stores.vectors.clone())
        .retrieve_default("Which assets are affected by critical CVEs?")
        .await
        .unwrap();

    assert_eq!(
        context.status,
        RetrievalStatus::Degraded {
            unavailable: vec![StoreKind::Graph]
        }
    );
    let cve = context
        .find("cve:CVE-2024-1234")
        .expect("vector match survives without the graph");
    assert!(cve.path.is_empty());
    assert!(cve
        .entity()
        .is_some_and(|e| e.embedding_text.starts_with("Vulnerability CVE-2024-1234")));
}

#[tokio::test]
async fn test_both_stores_down_is_an_error() {
    let result = retriever_over(Arc::new(Unreachable), Arc::new(Unreachable))
        .retrieve_default("What did user bob do on CVE-2024-1234?")
        .await;
    assert!(matches!(
        result,
        Err(AppError::StoreUnavailable { .. })
    ));
}

#[tokio::test]
async fn test_vector_outage_without_references_is_an_error() {
    let stores = Stores::new();
    stores.ingest(&telemetry()).await;

    let result = retriever_over(stores.graph.clone(), Arc::new(Unreachable))
        .retrieve_default("Show me failed login attempts in the last 24 hours")
        .await;
    assert!(matches!(
        result,
        Err(AppError::StoreUnavailable {
            store: StoreKind::Vector,
            ..
        })
    ));
}

#[tokio::test]
async fn test_empty_index_ignores_named_references() {
    let stores = Stores::new();
    stores.ingest(&telemetry()).await;

    let context = retriever_over(
        stores.graph.clone(),
        Arc::new(InMemoryVectorStore::new(DIMENSIONS)),
    )
    .retrieve_default("Which assets does CVE-2024-1234 affect?")
    .await
    .unwrap();

    assert!(context.is_empty());
    assert_eq!(context.candidates_considered, 0);
    assert_eq!(
        context.status,
        RetrievalStatus::Empty {
            reason: EmptyReason::EmptyIndex
        }
    );
}

#[tokio::test]
async fn test_degraded_context_without_items_answers_unavailable() {
    let stores = Stores::new();
    stores.ingest(&telemetry()).await;

    // The named CVE is critical, so the only seed is filtered out
    let retriever = retriever_over(stores.graph.clone(), Arc::new(Unreachable));
    let service = QueryService::new(
        Arc::new(retriever),
        ContextAssembler::new(4_000),
        Arc::new(ExtractiveAnswerGenerator::default()),
    );
    let response = service
        .answer(&QueryRequest::new("Any low severity findings for CVE-2024-1234?"))
        .await
        .unwrap();

    assert_eq!(
        response.status,
        RetrievalStatus::Degraded {
            unavailable: vec![StoreKind::Vector]
        }
    );
    assert!(response.answer.starts_with("No answer available"));
    assert!(!response.answer.starts_with("No relevant data found"));
    assert!(response.sources.is_empty());
    assert_eq!(response.model, "none");
    assert_eq!(
        response.context,
        "Note: partial context, unavailable stores: vector"
    );
}

#[tokio::test]
async fn test_graph_outage_still_applies_question_constraints() {
    let stores = Stores::new();
    let failed_at = (Utc::now() - Duration::hours(2)).to_rfc3339();
    let succeeded_at = (Utc::now() - Duration::hours(5)).to_rfc3339();
    let stale_at = (Utc::now() - Duration::days(30)).to_rfc3339();
    stores
        .ingest(&[(
            SourceKind::SigninLogs,
            records(json!([
                {"log_id": "S-1", "user": "alice", "source_ip": "203.0.113.9",
                 "status": "failed", "timestamp": failed_at},
                {"log_id": "S-2", "user": "alice", "source_ip": "198.51.100.7",
                 "status": "success", "timestamp": succeeded_at},
                {"log_id": "S-3", "user": "alice", "source_ip": "192.0.2.44",
                 "status": "failed", "timestamp": stale_at}
            ])),
        )])
        .await;

    let context = retriever_over(Arc::new(Unreachable), stores.vectors.clone())
        .retrieve_default("Show me failed login attempts in the last 24 hours")
        .await
        .unwrap();

    assert_eq!(
        context.status,
        RetrievalStatus::Degraded {
            unavailable: vec![StoreKind::Graph]
        }
    );
    assert!(context.find("signin:S-2").is_none());
    assert!(context.find("signin:S-3").is_none());
    for (entity, _) in context.entities() {
        assert_ne!(entity.text("status"), Some("success"));
    }
}

#[tokio::test]
async fn test_stalled_vector_store_degrades_within_the_store_timeout() {
    let stores = Stores::new();
    stores.ingest(&telemetry()).await;

    let started = Instant::now();
    let context = retriever_with(
        stores.graph.clone(),
        Arc::new(StalledVectors(stores.vectors.clone())),
        impatient(),
    )
    .retrieve_default("Which assets does CVE-2024-1234 affect?")
    .await
    .unwrap();

    assert!(started.elapsed() < StdDuration::from_secs(5));
    assert_eq!(
        context.status,
        RetrievalStatus::Degraded {
            unavailable: vec![StoreKind::Vector]
        }
    );
    assert!(context.find("cve:CVE-2024-1234").is_some());
    assert!(context.warnings.iter().any(|w| w.contains("vector")));
}

#[tokio::test]
async fn test_stalled_graph_store_degrades_within_the_store_timeout() {
    let stores = Stores::new();
    stores.ingest(&telemetry()).await;

    let started = Instant::now();
    let context = retriever_with(
        Arc::new(StalledGraph(stores.graph.clone())),
        stores.vectors.clone(),
        impatient(),
    )
    .retrieve_default("Which assets are affected by critical CVEs?")
    .await
    .unwrap();

    assert!(started.elapsed() < StdDuration::from_secs(5));
    assert_eq!(
        context.status,
        RetrievalStatus::Degraded {
            unavailable: vec![StoreKind::Graph]
        }
    );
    let cve = context
        .find("cve:CVE-2024-1234")
        .expect("vector match survives a stalled graph");
    assert!(cve.path.is_empty());
}
