//! Query builder for fluent Cypher query construction.

use futures::{StreamExt, TryStreamExt};
use serde::Serialize;

use crate::error::AppError;
use crate::graph::row::{Params, Row, RowStream};
use crate::graph::traits::CypherExecutor;

/// A builder for constructing and executing Cypher queries.
///
/// ```ignore
/// let rows = Query::new(&client, "MATCH (e:Entity {id: $id}) RETURN e.doc AS doc")
///     .param("id", "asset:web01")
///     .fetch_all()
///     .await?;
/// ```
pub struct Query<'a, E: CypherExecutor + ?Sized> {
    executor: &'a E,
    cypher: String,
    params: Params,
    // First parameter that failed to serialize, reported at execution
    invalid: Option<String>,
}

impl<'a, E: CypherExecutor + ?Sized> Query<'a, E> {
    pub fn new(executor: &'a E, cypher: &str) -> Self {
        Self {
            executor,
            cypher: cypher.to_string(),
            params: Params::new(),
            invalid: None,
        }
    }

    /// Adds a parameter, referenced in Cypher as `$name`.
    ///
    /// A value that cannot be serialized fails the query when it executes.
    pub fn param<T: Serialize>(mut self, name: &str, value: T) -> Self {
        match serde_json::to_value(value) {
            Ok(json) => {
                self.params.insert(name.to_string(), json);
            }
            Err(e) if self.invalid.is_none() => {
                self.invalid = Some(format!("parameter '{}': {}", name, e));
            }
            Err(_) => {}
        }
        self
    }

    fn checked(self) -> Result<(&'a E, String, Params), AppError> {
        match self.invalid {
            Some(message) => Err(AppError::Validation(message)),
            None => Ok((self.executor, self.cypher, self.params)),
        }
    }

    /// Executes the query and returns a stream of rows.
    pub async fn execute(self) -> Result<RowStream<'a>, AppError> {
        let (executor, cypher, params) = self.checked()?;
        executor.execute_cypher(&cypher, params).await
    }

    pub async fn fetch_all(self) -> Result<Vec<Row>, AppError> {
        self.execute().await?.try_collect().await
    }

    pub async fn fetch_one(self) -> Result<Option<Row>, AppError> {
        let mut stream = self.execute().await?;
        stream.next().await.transpose()
    }

    /// Executes the query without returning results.
    pub async fn run(self) -> Result<(), AppError> {
        let (executor, cypher, params) = self.checked()?;
        executor.run_cypher(&cypher, params).await
    }
}

/// Adds `executor.query("...")` to every [`CypherExecutor`].
pub trait QueryExt: CypherExecutor {
    fn query(&self, cypher: &str) -> Query<'_, Self>
    where
        Self: Sized,
    {
        Query::new(self, cypher)
    }
}

impl<E: CypherExecutor> QueryExt for E {}
