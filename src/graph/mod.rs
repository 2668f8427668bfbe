//! Graph storage.
//!
//! Two layers live here:
//!
//! - Backend access: [`CypherExecutor`], [`SqlExecutor`], [`Transaction`] and
//!   [`GraphClient`], with the PostgreSQL + Apache AGE implementation in
//!   [`backends::postgres`].
//! - The domain store: [`GraphStore`], implemented in memory by
//!   [`InMemoryGraphStore`] and over Cypher by [`CypherGraphStore`]. Both
//!   share one traversal so their expansion results are identical.
//!
//! ```ignore
//! use signalgraph::graph::{Graph, QueryExt};
//!
//! let graph = Graph::new(client);
//! let rows = graph
//!     .query("MATCH (e:Entity {entity_type: $t}) RETURN e.doc AS doc")
//!     .param("t", "CVE")
//!     .fetch_all()
//!     .await?;
//! ```

mod columns;
mod cypher_store;
mod memory;
mod query;
mod row;
mod store;
mod traits;
mod traversal;

pub mod backends;

pub use columns::{extract_return_columns, ColumnError};
pub use cypher_store::CypherGraphStore;
pub use memory::InMemoryGraphStore;
pub use query::{Query, QueryExt};
pub use row::{Params, Row, RowStream, SqlParam};
pub use store::{EdgeFilter, GraphStats, GraphStore, Neighbor};
pub use traits::{finish, CypherExecutor, GraphClient, SqlExecutor, Transaction};

use crate::error::AppError;

/// Wraps a [`GraphClient`] for auto-commit queries.
///
/// Writes that need several statements open a transaction on
/// [`client`](Graph::client) and close it with [`finish`].
pub struct Graph<C: GraphClient> {
    client: C,
}

impl<C: GraphClient> Graph<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Creates a query builder; the query runs in its own implicit
    /// transaction.
    pub fn query(&self, cypher: &str) -> Query<'_, C> {
        Query::new(&self.client, cypher)
    }
}

#[async_trait::async_trait]
impl<C: GraphClient> CypherExecutor for Graph<C> {
    async fn execute_cypher(
        &self,
        cypher: &str,
        params: Params,
    ) -> Result<RowStream<'_>, AppError> {
        self.client.execute_cypher(cypher, params).await
    }

    async fn run_cypher(&self, cypher: &str, params: Params) -> Result<(), AppError> {
        self.client.run_cypher(cypher, params).await
    }
}
