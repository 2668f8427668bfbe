//! pgvector-backed vector store.

use async_trait::async_trait;
use futures::TryStreamExt;

use super::{check_dimensions, VectorStore};
use crate::error::AppError;
use crate::graph::{SqlExecutor, SqlParam};
use crate::models::{EmbeddingRecord, VectorMatch};

const UPSERT: &str = "INSERT INTO entity_embeddings (entity_id, embedding, text, updated_at) \
     VALUES ($1, $2::text::vector, $3, now()) \
     ON CONFLICT (entity_id) DO UPDATE \
     SET embedding = EXCLUDED.embedding, text = EXCLUDED.text, updated_at = now()";

// Cosine distance; ties ordered by id like the in-memory store
const NEAREST: &str = "SELECT entity_id, 1 - (embedding <=> $1::text::vector) AS score \
     FROM entity_embeddings \
     ORDER BY embedding <=> $1::text::vector, entity_id \
     LIMIT $2";

const GET: &str =
    "SELECT entity_id, embedding::text AS embedding, text FROM entity_embeddings WHERE entity_id = $1";

const COUNT: &str = "SELECT count(*) AS total FROM entity_embeddings";

/// Vector store over the `entity_embeddings` table.
///
/// The table is created by the database migrations.
pub struct PgVectorStore<S: SqlExecutor> {
    executor: S,
    dimensions: usize,
}

impl<S: SqlExecutor> PgVectorStore<S> {
    pub fn new(executor: S, dimensions: usize) -> Self {
        Self {
            executor,
            dimensions,
        }
    }
}

/// pgvector's text input format, e.g. `[0.1,0.2]`.
fn vector_literal(vector: &[f32]) -> String {
    let parts: Vec<String> = vector.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(","))
}

#[async_trait]
impl<S: SqlExecutor> VectorStore for PgVectorStore<S> {
    async fn upsert(&self, entity_id: &str, vector: &[f32], text: &str) -> Result<(), AppError> {
        check_dimensions(vector, self.dimensions)?;
        self.executor
            .execute_sql_with(
                UPSERT,
                &[
                    entity_id.into(),
                    vector_literal(vector).into(),
                    text.into(),
                ],
            )
            .await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorMatch>, AppError> {
        check_dimensions(vector, self.dimensions)?;
        let params = [
            SqlParam::Text(vector_literal(vector)),
            SqlParam::Int(top_k as i64),
        ];
        let rows: Vec<_> = self
            .executor
            .query_sql_with(NEAREST, &params)
            .await?
            .try_collect()
            .await?;

        rows.iter()
            .map(|row| -> Result<VectorMatch, AppError> {
                Ok(VectorMatch {
                    entity_id: row.get("entity_id")?,
                    // NaN for zero vectors
                    score: row.get_opt::<f32>("score")?.unwrap_or(0.0),
                })
            })
            .collect()
    }

    async fn get(&self, entity_id: &str) -> Result<Option<EmbeddingRecord>, AppError> {
        let params = [SqlParam::from(entity_id)];
        let mut stream = self.executor.query_sql_with(GET, &params).await?;
        let Some(row) = stream.try_next().await? else {
            return Ok(None);
        };

        let literal: String = row.get("embedding")?;
        let vector: Vec<f32> = serde_json::from_str(&literal)
            .map_err(|e| AppError::Internal(format!("Malformed stored vector: {}", e)))?;
        Ok(Some(EmbeddingRecord {
            entity_id: row.get("entity_id")?,
            vector,
            text: row.get("text")?,
        }))
    }

    async fn count(&self) -> Result<usize, AppError> {
        let mut stream = self.executor.query_sql(COUNT).await?;
        match stream.try_next().await? {
            Some(row) => row.get("total"),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Row, RowStream};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Records statements and answers queries with canned rows.
    struct ScriptedSql {
        statements: Mutex<Vec<(String, Vec<SqlParam>)>>,
        rows: Vec<HashMap<String, serde_json::Value>>,
    }

    impl ScriptedSql {
        fn new(rows: Vec<serde_json::Value>) -> Self {
            Self {
                statements: Mutex::new(Vec::new()),
                rows: rows
                    .into_iter()
                    .map(|v| serde_json::from_value(v).unwrap())
                    .collect(),
            }
        }

        fn stream(&self) -> RowStream<'_> {
            let rows: Vec<Result<Row, AppError>> =
                self.rows.iter().cloned().map(|r| Ok(Row::new(r))).collect();
            Box::pin(futures::stream::iter(rows))
        }
    }

    #[async_trait]
    impl SqlExecutor for ScriptedSql {
        async fn execute_sql(&self, sql: &str) -> Result<(), AppError> {
            self.statements
                .lock()
                .unwrap()
                .push((sql.to_string(), Vec::new()));
            Ok(())
        }

        async fn query_sql(&self, sql: &str) -> Result<RowStream<'_>, AppError> {
            self.query_sql_with(sql, &[]).await
        }

        async fn execute_sql_with(&self, sql: &str, params: &[SqlParam]) -> Result<u64, AppError> {
            self.statements
                .lock()
                .unwrap()
                .push((sql.to_string(), params.to_vec()));
            Ok(1)
        }

        async fn query_sql_with(
            &self,
            sql: &str,
            params: &[SqlParam],
        ) -> Result<RowStream<'_>, AppError> {
            self.statements
                .lock()
                .unwrap()
                .push((sql.to_string(), params.to_vec()));
            Ok(self.stream())
        }
    }

    #[test]
    fn test_vector_literal() {
        assert_eq!(vector_literal(&[0.5, -1.0, 0.0]), "[0.5,-1,0]");
    }

    #[tokio::test]
    async fn test_upsert_binds_literal() {
        let store = PgVectorStore::new(ScriptedSql::new(vec![]), 2);
        store.upsert("cve:CVE-1", &[0.25, 0.75], "text").await.unwrap();

        let statements = store.executor.statements.lock().unwrap();
        assert_eq!(statements[0].0, UPSERT);
        assert_eq!(
            statements[0].1,
            vec![
                SqlParam::Text("cve:CVE-1".into()),
                SqlParam::Text("[0.25,0.75]".into()),
                SqlParam::Text("text".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_query_maps_rows() {
        let store = PgVectorStore::new(
            ScriptedSql::new(vec![
                serde_json::json!({"entity_id": "asset:web01", "score": 0.9}),
                serde_json::json!({"entity_id": "asset:db01", "score": null}),
            ]),
            2,
        );
        let hits = store.query(&[1.0, 0.0], 5).await.unwrap();
        assert_eq!(hits[0].entity_id, "asset:web01");
        assert!((hits[0].score - 0.9).abs() < 1e-6);
        assert_eq!(hits[1].score, 0.0);

        let statements = store.executor.statements.lock().unwrap();
        assert_eq!(statements[0].1[1], SqlParam::Int(5));
    }

    #[tokio::test]
    async fn test_get_parses_stored_vector() {
        let store = PgVectorStore::new(
            ScriptedSql::new(vec![serde_json::json!({
                "entity_id": "user:alice",
                "embedding": "[0.6,0.8]",
                "text": "User alice"
            })]),
            2,
        );
        let record = store.get("user:alice").await.unwrap().unwrap();
        assert_eq!(record.vector, vec![0.6, 0.8]);
        assert_eq!(record.text, "User alice");
    }
}
