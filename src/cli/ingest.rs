//! Ingest command handler.

use std::path::Path;

use color_eyre::Result;

use crate::config::{BackendKind, Config};
use crate::context::Context;

use super::{ingest_dir, App};

impl App {
    /// Ingest a data directory and print the per-source report.
    pub async fn run_ingest(&self, data_dir: Option<&Path>) -> Result<()> {
        let config = Config::load()?;
        if config.backend.kind == BackendKind::Memory {
            tracing::warn!("In-memory backend configured, ingested data is discarded on exit");
        }
        let dir = data_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| config.ingestion.data_dir.clone());

        let ctx = Context::connect(config).await?;
        let report = ingest_dir(&ctx, &dir).await?;

        for source in &report.sources {
            tracing::info!(
                source = %source.source,
                records = source.records,
                entities = source.entities,
                relationships = source.relationships,
                inferred = source.inferred,
                malformed = source.malformed.len(),
                "Ingested"
            );
            for malformed in &source.malformed {
                tracing::debug!("{}", malformed);
            }
        }
        println!("{}", serde_json::to_string_pretty(&report)?);

        if !report.is_success() {
            return Err(color_eyre::eyre::eyre!(
                "{} source(s) failed to ingest",
                report.failures.len()
            ));
        }
        Ok(())
    }
}
