//! Application context: the stores and shared state services are built from.

use std::sync::Arc;

use crate::answer::AnswerGenerator;
use crate::config::{BackendKind, Config};
use crate::embedding::{Embedder, HashingEmbedder};
use crate::error::AppError;
use crate::graph::backends::postgres::PostgresClient;
use crate::graph::{CypherGraphStore, GraphStore, InMemoryGraphStore};
use crate::retry::RetryPolicy;
use crate::services::{
    ContextAssembler, HybridRetriever, IngestionLedger, MemoryGraphBuilder, QueryService,
    RetrievalPolicy, StatsService,
};
use crate::vector::{InMemoryVectorStore, PgVectorStore, VectorStore};

/// Root application context.
///
/// Cheap to clone; every store is shared. Builders and retrievers made from
/// the same context see the same data and the same ingestion ledger.
#[derive(Clone)]
pub struct Context {
    pub config: Arc<Config>,
    pub graph: Arc<dyn GraphStore>,
    pub vectors: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    pub ledger: Arc<IngestionLedger>,
}

impl Context {
    /// A context over empty in-memory stores, whatever the configured backend.
    pub fn in_memory(config: Config) -> Self {
        let dimensions = config.embedding.dimensions;
        Self::with_stores(
            config,
            Arc::new(InMemoryGraphStore::new()),
            Arc::new(InMemoryVectorStore::new(dimensions)),
        )
    }

    /// Builds the context for the configured backend.
    ///
    /// The PostgreSQL backend expects `signalgraph init` to have run.
    pub async fn connect(config: Config) -> Result<Self, AppError> {
        config.validate()?;
        match config.backend.kind {
            BackendKind::Memory => Ok(Self::in_memory(config)),
            BackendKind::Postgres => {
                let uri = config.backend.postgres_uri.as_deref().ok_or_else(|| {
                    AppError::Validation("backend.postgres_uri is not set".into())
                })?;
                let client = PostgresClient::connect(uri, &config.backend.graph_name).await?;
                tracing::debug!(graph = %config.backend.graph_name, "Connected to PostgreSQL");

                let dimensions = config.embedding.dimensions;
                Ok(Self::with_stores(
                    config,
                    Arc::new(CypherGraphStore::new(client.clone())),
                    Arc::new(PgVectorStore::new(client, dimensions)),
                ))
            }
        }
    }

    pub fn with_stores(
        config: Config,
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
    ) -> Self {
        let embedder = Arc::new(HashingEmbedder::new(config.embedding.dimensions));
        Self {
            config: Arc::new(config),
            graph,
            vectors,
            embedder,
            ledger: Arc::new(IngestionLedger::new()),
        }
    }

    fn retry(&self) -> RetryPolicy {
        RetryPolicy::from(&self.config.ingestion)
    }

    pub fn builder(&self) -> MemoryGraphBuilder {
        MemoryGraphBuilder::new(
            Arc::clone(&self.graph),
            Arc::clone(&self.vectors),
            Arc::clone(&self.embedder),
        )
        .with_retry(self.retry())
        .with_ledger(Arc::clone(&self.ledger))
    }

    pub fn retriever(&self) -> HybridRetriever {
        HybridRetriever::new(
            Arc::clone(&self.graph),
            Arc::clone(&self.vectors),
            Arc::clone(&self.embedder),
            RetrievalPolicy::from(&self.config.retrieval),
        )
        .with_retry(self.retry())
    }

    pub fn query_service(&self, generator: Arc<dyn AnswerGenerator>) -> QueryService {
        QueryService::new(
            Arc::new(self.retriever()),
            ContextAssembler::new(self.config.context.max_chars),
            generator,
        )
    }

    pub fn stats_service(&self) -> StatsService {
        StatsService::new(
            Arc::clone(&self.graph),
            Arc::clone(&self.vectors),
            Arc::clone(&self.ledger),
        )
    }
}
