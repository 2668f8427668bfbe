//! Core traits for database access.
//!
//! - [`CypherExecutor`] runs Cypher against the graph
//! - [`SqlExecutor`] runs plain SQL (schema, pgvector)
//! - [`Transaction`] commits or rolls back
//! - [`GraphClient`] owns the pool and opens transactions

use async_trait::async_trait;

use crate::error::AppError;
use crate::graph::row::{Params, RowStream, SqlParam};

/// Executes Cypher queries against a graph database.
#[async_trait]
pub trait CypherExecutor: Send + Sync {
    /// Executes a query and returns a stream of result rows.
    async fn execute_cypher(&self, cypher: &str, params: Params)
        -> Result<RowStream<'_>, AppError>;

    /// Executes a mutation without returning results.
    async fn run_cypher(&self, cypher: &str, params: Params) -> Result<(), AppError>;
}

/// Executes SQL against the database.
///
/// Used for DDL in migrations and by the pgvector store, which has no Cypher
/// counterpart.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Executes one or more statements without parameters.
    async fn execute_sql(&self, sql: &str) -> Result<(), AppError>;

    async fn query_sql(&self, sql: &str) -> Result<RowStream<'_>, AppError>;

    /// Executes a single parameterized statement, returning affected rows.
    async fn execute_sql_with(&self, sql: &str, params: &[SqlParam]) -> Result<u64, AppError>;

    async fn query_sql_with(
        &self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<RowStream<'_>, AppError>;
}

/// Transaction lifecycle management.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Commits the transaction. Consumes it.
    async fn commit(self) -> Result<(), AppError>;

    /// Rolls back the transaction. Consumes it.
    async fn rollback(self) -> Result<(), AppError>;
}

/// A graph database client that can begin transactions.
///
/// Executor methods on the client auto-commit each query.
#[async_trait]
pub trait GraphClient: CypherExecutor {
    type Tx<'a>: Transaction + CypherExecutor
    where
        Self: 'a;

    /// Begins a new transaction.
    ///
    /// ```ignore
    /// let txn = client.begin().await?;
    /// txn.run_cypher("CREATE (e:Entity {id: $id})", params).await?;
    /// txn.commit().await?;
    /// ```
    async fn begin(&self) -> Result<Self::Tx<'_>, AppError>;
}

/// Commits on success, rolls back on failure, and returns the outcome.
pub async fn finish<T: Transaction, R>(
    txn: T,
    result: Result<R, AppError>,
) -> Result<R, AppError> {
    match result {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = txn.rollback().await {
                tracing::warn!(error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}
