//! Init command handler.

use color_eyre::Result;

use crate::config::{BackendKind, Config};
use crate::graph::backends::postgres::PostgresClient;
use crate::migrations::run_migrations;

use super::App;

impl App {
    /// Run the init command to initialize the database schema.
    pub async fn run_init(&self) -> Result<()> {
        let config = Config::load()?;
        config.validate()?;

        if config.backend.kind == BackendKind::Memory {
            tracing::info!("In-memory backend configured, nothing to initialize");
            return Ok(());
        }

        let graph_name = &config.backend.graph_name;
        let uri = config.backend.postgres_uri.as_deref().unwrap_or_default();

        tracing::info!("Connecting to PostgreSQL (graph: {})", graph_name);
        let client = PostgresClient::connect(uri, graph_name)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Failed to connect: {}", e))?;

        tracing::info!("Ensuring graph '{}' exists...", graph_name);
        client
            .ensure_graph_exists()
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Failed to create graph: {}", e))?;

        tracing::info!("Running migrations...");
        let result = run_migrations(&client, config.embedding.dimensions)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Migration failed: {}", e))?;

        if result.applied_db_migrations.is_empty() {
            tracing::info!(
                "Database already at db_version={}, no migrations needed",
                result.db_version
            );
        } else {
            tracing::info!(
                "DB migrations complete: v{} -> v{}, applied: {:?}",
                result.previous_version,
                result.db_version,
                result.applied_db_migrations
            );
        }

        Ok(())
    }
}
