//! Ingestion and retrieval services.
//!
//! Services own no storage; they are built over the [`GraphStore`],
//! [`VectorStore`] and [`Embedder`] trait objects held by the application
//! context.
//!
//! [`GraphStore`]: crate::graph::GraphStore
//! [`VectorStore`]: crate::vector::VectorStore
//! [`Embedder`]: crate::embedding::Embedder

mod assembler;
mod builder;
mod intent;
mod query;
mod retriever;
mod stats;

pub use assembler::{label, AssembledContext, ContextAssembler};
pub use builder::{
    IngestionLedger, IngestionReport, MemoryGraphBuilder, SourceFailure, SourceLedgerEntry,
    SourceReport,
};
pub use intent::QueryIntent;
pub use query::{
    no_data_answer, unavailable_answer, QueryOutcome, QueryRequest, QueryResponse, QueryService,
};
pub use retriever::{HybridRetriever, RetrievalPolicy};
pub use stats::{StatsService, StatsSnapshot};
