//! Schema migration: pgvector extension and the embeddings table.

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::AppError;
use crate::graph::SqlExecutor;
use crate::migrations::Migration;

/// Creates `entity_embeddings`, one row per entity.
pub struct M001Schema {
    pub dimensions: usize,
}

impl M001Schema {
    fn create_table(&self) -> String {
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS entity_embeddings (
                entity_id TEXT PRIMARY KEY,
                embedding vector({}) NOT NULL,
                text TEXT NOT NULL,
                updated_at TIMESTAMPTZ DEFAULT NOW()
            );

            CREATE INDEX IF NOT EXISTS entity_embeddings_vector_idx
            ON entity_embeddings USING hnsw (embedding vector_cosine_ops);
            "#,
            self.dimensions
        )
    }
}

impl Migration for M001Schema {
    type Context = dyn SqlExecutor + Sync;

    fn id(&self) -> &'static str {
        "db001_schema"
    }

    fn version(&self) -> u32 {
        1
    }

    fn description(&self) -> &'static str {
        "Database setup (pgvector extension, entity_embeddings table)"
    }

    fn up<'a>(&'a self, ctx: &'a Self::Context) -> BoxFuture<'a, Result<(), AppError>> {
        async move {
            ctx.execute_sql("CREATE EXTENSION IF NOT EXISTS vector")
                .await?;
            ctx.execute_sql(&self.create_table()).await?;
            Ok(())
        }
        .boxed()
    }
}
