//! PostgreSQL + Apache AGE backend.
//!
//! One pooled client serves both stores: Cypher through AGE for the graph,
//! plain SQL for the pgvector embeddings table.
//!
//! ```ignore
//! use signalgraph::graph::backends::postgres::PostgresClient;
//! use signalgraph::graph::QueryExt;
//!
//! let client = PostgresClient::connect("postgresql://localhost/signals", "signalgraph").await?;
//! client.ensure_graph_exists().await?;
//! let rows = client.query("MATCH (e:Entity) RETURN e.id AS id").fetch_all().await?;
//! ```

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::BytesMut;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use futures::{StreamExt, TryStreamExt};
use serde_json::Value as JsonValue;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::NoTls;

use crate::error::AppError;
use crate::graph::columns::{extract_return_columns, ColumnError};
use crate::graph::row::{Params, Row, RowStream, SqlParam};
use crate::graph::traits::{CypherExecutor, GraphClient, SqlExecutor, Transaction};

/// AGE agtype parameter.
///
/// `cypher()` takes its parameter map as `agtype`, not TEXT. The binary
/// format is a version byte (1) followed by the JSON text. Parameters are
/// sent through the extended query protocol and never interpolated into the
/// query string.
#[derive(Debug, Clone)]
struct Agtype(String);

impl ToSql for Agtype {
    fn to_sql(
        &self,
        _ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        out.extend_from_slice(&[1]);
        out.extend_from_slice(self.0.as_bytes());
        Ok(IsNull::No)
    }

    fn accepts(ty: &Type) -> bool {
        // OID varies per installation
        ty.name() == "agtype"
    }

    to_sql_checked!();
}

impl ToSql for SqlParam {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            SqlParam::Text(s) if <String as ToSql>::accepts(ty) => s.to_sql(ty, out),
            SqlParam::Int(i) if <i64 as ToSql>::accepts(ty) => i.to_sql(ty, out),
            other => Err(format!("cannot bind {:?} as {}", other, ty).into()),
        }
    }

    fn accepts(ty: &Type) -> bool {
        <String as ToSql>::accepts(ty) || <i64 as ToSql>::accepts(ty)
    }

    to_sql_checked!();
}

/// PostgreSQL + Apache AGE client.
///
/// Cheap to clone; the pool is `Arc`-based.
#[derive(Clone)]
pub struct PostgresClient {
    pool: Pool,
    graph_name: Arc<str>,
}

impl PostgresClient {
    /// Creates a client with a connection pool.
    ///
    /// Connections are opened lazily, so an unreachable server surfaces on
    /// the first query rather than here.
    pub async fn connect(connection_string: &str, graph_name: &str) -> Result<Self, AppError> {
        let pg_config: tokio_postgres::Config = connection_string.parse().map_err(|e| {
            AppError::Validation(format!("Invalid PostgreSQL connection string: {}", e))
        })?;

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(16)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create connection pool: {}", e)))?;

        Ok(Self {
            pool,
            graph_name: Arc::from(graph_name),
        })
    }

    /// Gets a pooled connection with the AGE session loaded.
    async fn get_connection(&self) -> Result<Object, AppError> {
        let conn = self.pool.get().await.map_err(|e| {
            AppError::Internal(format!("Failed to get connection from pool: {}", e))
        })?;

        conn.batch_execute("LOAD 'age'; SET search_path = ag_catalog, public;")
            .await
            .map_err(|e| AppError::Internal(format!("Failed to initialize AGE session: {}", e)))?;

        Ok(conn)
    }

    pub fn graph_name(&self) -> &str {
        &self.graph_name
    }

    /// Creates the AGE graph if it does not exist yet.
    pub async fn ensure_graph_exists(&self) -> Result<(), AppError> {
        let conn = self.get_connection().await?;

        // create_graph has no IF NOT EXISTS
        let sql = format!(
            r#"
            DO $$
            BEGIN
                IF NOT EXISTS (
                    SELECT 1 FROM ag_catalog.ag_graph WHERE name = '{}'
                ) THEN
                    PERFORM ag_catalog.create_graph('{}');
                END IF;
            END $$;
            "#,
            self.graph_name, self.graph_name
        );

        conn.batch_execute(&sql)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to ensure graph exists: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl CypherExecutor for PostgresClient {
    async fn execute_cypher(
        &self,
        cypher: &str,
        params: Params,
    ) -> Result<RowStream<'_>, AppError> {
        let conn = self.get_connection().await?;
        execute_pg_cypher_owned(conn, self.graph_name.clone(), cypher.to_string(), params)
    }

    async fn run_cypher(&self, cypher: &str, params: Params) -> Result<(), AppError> {
        drain(self.execute_cypher(cypher, params).await?).await
    }
}

#[async_trait]
impl SqlExecutor for PostgresClient {
    async fn execute_sql(&self, sql: &str) -> Result<(), AppError> {
        let conn = self.get_connection().await?;
        batch_execute(&conn, sql).await
    }

    async fn query_sql(&self, sql: &str) -> Result<RowStream<'_>, AppError> {
        self.query_sql_with(sql, &[]).await
    }

    async fn execute_sql_with(&self, sql: &str, params: &[SqlParam]) -> Result<u64, AppError> {
        let conn = self.get_connection().await?;
        execute_with(&conn, sql, params).await
    }

    async fn query_sql_with(
        &self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<RowStream<'_>, AppError> {
        let conn = self.get_connection().await?;
        Ok(query_sql_owned(conn, sql.to_string(), params.to_vec()))
    }
}

#[async_trait]
impl GraphClient for PostgresClient {
    type Tx<'a> = PostgresTransaction;

    async fn begin(&self) -> Result<Self::Tx<'_>, AppError> {
        let conn = self.get_connection().await?;

        conn.batch_execute("BEGIN")
            .await
            .map_err(|e| AppError::Internal(format!("Failed to begin transaction: {}", e)))?;

        Ok(PostgresTransaction {
            conn,
            graph_name: self.graph_name.clone(),
            finished: false,
        })
    }
}

/// A transaction on one pooled connection.
///
/// Must be committed or rolled back explicitly; dropping it unfinished logs
/// a warning.
pub struct PostgresTransaction {
    conn: Object,
    graph_name: Arc<str>,
    finished: bool,
}

#[async_trait]
impl CypherExecutor for PostgresTransaction {
    async fn execute_cypher(
        &self,
        cypher: &str,
        params: Params,
    ) -> Result<RowStream<'_>, AppError> {
        execute_pg_cypher(&self.conn, &self.graph_name, cypher, params).await
    }

    async fn run_cypher(&self, cypher: &str, params: Params) -> Result<(), AppError> {
        drain(self.execute_cypher(cypher, params).await?).await
    }
}

#[async_trait]
impl SqlExecutor for PostgresTransaction {
    async fn execute_sql(&self, sql: &str) -> Result<(), AppError> {
        batch_execute(&self.conn, sql).await
    }

    async fn query_sql(&self, sql: &str) -> Result<RowStream<'_>, AppError> {
        self.query_sql_with(sql, &[]).await
    }

    async fn execute_sql_with(&self, sql: &str, params: &[SqlParam]) -> Result<u64, AppError> {
        execute_with(&self.conn, sql, params).await
    }

    async fn query_sql_with(
        &self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<RowStream<'_>, AppError> {
        let stream = self
            .conn
            .query_raw(sql, params.iter())
            .await
            .map_err(|e| AppError::Query {
                message: format!("SQL query failed: {}", db_error_detail(&e)),
                query: sql.to_string(),
            })?;

        Ok(Box::pin(stream.map_ok(|row| parse_pg_row(&row)).map_err(
            |e| AppError::Internal(format!("Failed to fetch row: {}", e)),
        )))
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn commit(mut self) -> Result<(), AppError> {
        self.finished = true;
        self.conn
            .batch_execute("COMMIT")
            .await
            .map_err(|e| AppError::Internal(format!("Failed to commit transaction: {}", e)))?;
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), AppError> {
        self.finished = true;
        self.conn
            .batch_execute("ROLLBACK")
            .await
            .map_err(|e| AppError::Internal(format!("Failed to rollback transaction: {}", e)))?;
        Ok(())
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                "PostgresTransaction dropped without commit or rollback - connection state undefined"
            );
        }
    }
}

fn db_error_detail(e: &tokio_postgres::Error) -> String {
    e.as_db_error()
        .map(|db_err| {
            format!(
                "{}: {} ({})",
                db_err.severity(),
                db_err.message(),
                db_err.code().code()
            )
        })
        .unwrap_or_else(|| e.to_string())
}

async fn drain(mut stream: RowStream<'_>) -> Result<(), AppError> {
    while let Some(result) = stream.next().await {
        result?;
    }
    Ok(())
}

async fn batch_execute(conn: &Object, sql: &str) -> Result<(), AppError> {
    conn.batch_execute(sql).await.map_err(|e| {
        AppError::Internal(format!("SQL execution failed: {}", db_error_detail(&e)))
    })
}

async fn execute_with(conn: &Object, sql: &str, params: &[SqlParam]) -> Result<u64, AppError> {
    conn.execute_raw(sql, params.iter())
        .await
        .map_err(|e| AppError::Query {
            message: format!("SQL statement failed: {}", db_error_detail(&e)),
            query: sql.to_string(),
        })
}

/// Streams a parameterized SQL query on an owned connection.
fn query_sql_owned(conn: Object, sql: String, params: Vec<SqlParam>) -> RowStream<'static> {
    Box::pin(try_stream! {
        let stream = conn
            .query_raw(sql.as_str(), params.iter())
            .await
            .map_err(|e| AppError::Query {
                message: format!("SQL query failed: {}", db_error_detail(&e)),
                query: sql.clone(),
            })?;

        futures::pin_mut!(stream);
        while let Some(pg_row) = stream.try_next().await.map_err(|e| {
            AppError::Internal(format!("Failed to fetch row: {}", e))
        })? {
            yield parse_pg_row(&pg_row);
        }
    })
}

/// Executes a Cypher query via AGE on a borrowed connection.
async fn execute_pg_cypher<'a>(
    conn: &'a Object,
    graph_name: &str,
    cypher: &str,
    params: Params,
) -> Result<RowStream<'a>, AppError> {
    let (sql, agtype_param) = build_age_query(graph_name, cypher, &params)?;

    let stream = match &agtype_param {
        None => {
            conn.query_raw::<_, &Agtype, _>(&sql, std::iter::empty())
                .await
        }
        Some(param) => conn.query_raw(&sql, std::iter::once(param)).await,
    };

    let stream = stream.map_err(|e| AppError::Query {
        message: format!("Cypher query failed: {}", db_error_detail(&e)),
        query: cypher.to_string(),
    })?;

    Ok(Box::pin(stream.map_ok(|row| parse_pg_row(&row)).map_err(
        |e| AppError::Internal(format!("Failed to fetch row: {}", e)),
    )))
}

/// Executes a Cypher query via AGE on an owned connection.
///
/// The generator captures the connection, keeping it alive for the stream's
/// lifetime.
fn execute_pg_cypher_owned(
    conn: Object,
    graph_name: Arc<str>,
    cypher: String,
    params: Params,
) -> Result<RowStream<'static>, AppError> {
    let (sql, agtype_param) = build_age_query(&graph_name, &cypher, &params)?;

    Ok(Box::pin(try_stream! {
        let stream = match &agtype_param {
            None => conn.query_raw::<_, &Agtype, _>(&sql, std::iter::empty()).await,
            Some(param) => conn.query_raw(&sql, std::iter::once(param)).await,
        };

        let stream = stream.map_err(|e| AppError::Query {
            message: format!("Cypher query failed: {}", db_error_detail(&e)),
            query: cypher.clone(),
        })?;

        futures::pin_mut!(stream);
        while let Some(pg_row) = stream.try_next().await.map_err(|e| {
            AppError::Internal(format!("Failed to fetch row: {}", e))
        })? {
            yield parse_pg_row(&pg_row);
        }
    }))
}

/// Wraps a Cypher statement in AGE's `cypher()` SQL call.
///
/// The SQL column list mirrors the RETURN clause; write-only statements get
/// a placeholder column. Column names are always quoted since aliases such
/// as `count` are reserved words in PostgreSQL.
fn build_age_query(
    graph_name: &str,
    cypher: &str,
    params: &Params,
) -> Result<(String, Option<Agtype>), AppError> {
    let columns_sql = match extract_return_columns(cypher) {
        Ok(columns) => columns
            .iter()
            .map(|name| format!("\"{}\" agtype", name.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(", "),
        Err(ColumnError::NoReturnClause) => "result agtype".to_string(),
        Err(e) => {
            return Err(AppError::Query {
                message: e.to_string(),
                query: cypher.to_string(),
            })
        }
    };

    if params.is_empty() {
        let sql = format!(
            "SELECT * FROM cypher('{}', $$ {} $$) as ({})",
            graph_name, cypher, columns_sql
        );
        Ok((sql, None))
    } else {
        let sql = format!(
            "SELECT * FROM cypher('{}', $$ {} $$, $1) as ({})",
            graph_name, cypher, columns_sql
        );
        let params_json = serde_json::to_string(params)
            .map_err(|e| AppError::Internal(format!("Failed to serialize parameters: {}", e)))?;
        Ok((sql, Some(Agtype(params_json))))
    }
}

/// Converts a PostgreSQL row to a [`Row`].
///
/// agtype columns are decoded from their JSON text; standard types map to
/// their JSON equivalents.
fn parse_pg_row(pg_row: &tokio_postgres::Row) -> Row {
    let mut data = HashMap::new();

    for (idx, column) in pg_row.columns().iter().enumerate() {
        let name = column.name().to_string();

        let value = match column.type_().name() {
            "agtype" => pg_row
                .try_get::<_, AgtypeValue>(idx)
                .ok()
                .map(|v| v.0),
            "int2" => pg_row.try_get::<_, i16>(idx).ok().map(JsonValue::from),
            "int4" => pg_row.try_get::<_, i32>(idx).ok().map(JsonValue::from),
            "int8" => pg_row.try_get::<_, i64>(idx).ok().map(JsonValue::from),
            "float4" => pg_row
                .try_get::<_, f32>(idx)
                .ok()
                .and_then(|v| serde_json::Number::from_f64(v as f64))
                .map(JsonValue::Number),
            "float8" => pg_row
                .try_get::<_, f64>(idx)
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number),
            "bool" => pg_row.try_get::<_, bool>(idx).ok().map(JsonValue::Bool),
            "json" | "jsonb" => pg_row.try_get::<_, JsonValue>(idx).ok(),
            _ => pg_row.try_get::<_, String>(idx).ok().map(JsonValue::String),
        };

        data.insert(name, value.unwrap_or(JsonValue::Null));
    }

    Row::new(data)
}

/// agtype column value.
#[derive(Debug)]
struct AgtypeValue(JsonValue);

impl<'a> tokio_postgres::types::FromSql<'a> for AgtypeValue {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        if raw.is_empty() {
            return Ok(AgtypeValue(JsonValue::Null));
        }

        let json_bytes = if raw[0] == 1 { &raw[1..] } else { raw };
        let json_str = std::str::from_utf8(json_bytes)?;

        let clean_json = json_str
            .trim_end_matches("::vertex")
            .trim_end_matches("::edge")
            .trim_end_matches("::path");

        Ok(AgtypeValue(serde_json::from_str(clean_json)?))
    }

    fn accepts(ty: &Type) -> bool {
        ty.name() == "agtype"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_age_query_quotes_aliases() {
        let (sql, param) = build_age_query(
            "signalgraph",
            "MATCH (e:Entity) RETURN e.entity_type AS entity_type, count(e) AS count",
            &Params::new(),
        )
        .unwrap();

        assert_eq!(
            sql,
            "SELECT * FROM cypher('signalgraph', $$ MATCH (e:Entity) RETURN e.entity_type AS entity_type, count(e) AS count $$) as (\"entity_type\" agtype, \"count\" agtype)"
        );
        assert!(param.is_none());
    }

    #[test]
    fn test_build_age_query_binds_params_as_agtype() {
        let mut params = Params::new();
        params.insert("id".into(), JsonValue::String("asset:web01".into()));

        let (sql, param) = build_age_query(
            "signalgraph",
            "MATCH (e:Entity {id: $id}) RETURN e.doc AS doc",
            &params,
        )
        .unwrap();

        assert!(sql.contains("$$, $1) as (\"doc\" agtype)"));
        assert!(param.unwrap().0.contains("asset:web01"));
    }

    #[test]
    fn test_build_age_query_write_only_placeholder() {
        let (sql, _) = build_age_query(
            "signalgraph",
            "MATCH (e:Entity) DETACH DELETE e",
            &Params::new(),
        )
        .unwrap();
        assert!(sql.ends_with("as (result agtype)"));
    }

    #[test]
    fn test_build_age_query_rejects_return_star() {
        let result = build_age_query("signalgraph", "MATCH (e) RETURN *", &Params::new());
        assert!(matches!(result, Err(AppError::Query { .. })));
    }

    #[test]
    fn test_agtype_value_strips_suffix() {
        let raw = b"\x01{\"id\": 1, \"label\": \"Entity\", \"properties\": {}}::vertex";
        let value = <AgtypeValue as tokio_postgres::types::FromSql>::from_sql(&Type::TEXT, raw)
            .unwrap();
        assert_eq!(value.0["label"], "Entity");
    }
}
