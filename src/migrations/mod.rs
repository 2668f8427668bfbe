//! Schema migrations for the PostgreSQL backend with version tracking.
//!
//! Migrations are:
//! - **Idempotent**: `IF NOT EXISTS` everywhere, safe to re-run after a failure
//! - **Forward-only**: no rollback support
//! - **Version-tracked**: the version lives in the `db_schema_version` table
//!
//! The graph itself needs no migrations: AGE creates vertex and edge labels
//! on first write, and [`PostgresClient::ensure_graph_exists`] creates the
//! graph.
//!
//! [`PostgresClient::ensure_graph_exists`]: crate::graph::backends::postgres::PostgresClient::ensure_graph_exists

pub mod db;
mod runner;
mod traits;

pub use runner::{run_migrations, MigrationResult};
pub use traits::{DbMigration, Migration, Register};
