//! CLI module for signalgraph.
//!
//! Subcommands:
//! - `init`: Create the PostgreSQL schema (graph and embeddings table)
//! - `ingest`: Load a data directory into the configured stores
//! - `query`: Answer an investigation question
//! - `stats`: Show what the stores hold

mod ingest;
mod init;
mod query;
mod stats;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::Result;

use crate::config::{BackendKind, Config};
use crate::context::Context;
use crate::services::IngestionReport;
use crate::sources::{FileSource, SignalSource};

/// signalgraph - hybrid context retrieval over security telemetry
#[derive(Parser)]
#[command(name = "signalgraph")]
#[command(about = "Graph-expanded retrieval over security telemetry for investigation questions")]
#[command(version)]
pub struct App {
    /// Run in verbose mode
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the database schema (postgres backend only)
    Init,

    /// Ingest every known source file found in a directory
    Ingest {
        /// Directory holding cves.json or cves.csv, assets.json, ... (defaults to ingestion.data_dir)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Ask an investigation question
    Query {
        question: String,

        /// Directory to ingest first when running against the in-memory backend
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Override retrieval.max_hops
        #[arg(long)]
        max_hops: Option<usize>,

        /// Override retrieval.max_items
        #[arg(long)]
        max_items: Option<usize>,

        /// Print the assembled context along with the answer
        #[arg(long)]
        show_context: bool,
    },

    /// Show entity and source counts
    Stats {
        /// Directory to ingest first when running against the in-memory backend
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

impl App {
    /// Run the CLI application.
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Init => self.run_init().await,
            Command::Ingest { ref data_dir } => self.run_ingest(data_dir.as_deref()).await,
            Command::Query {
                ref question,
                ref data_dir,
                max_hops,
                max_items,
                show_context,
            } => {
                self.run_query(question, data_dir.as_deref(), max_hops, max_items, show_context)
                    .await
            }
            Command::Stats { ref data_dir } => self.run_stats(data_dir.as_deref()).await,
        }
    }
}

/// Opens the configured stores.
///
/// The in-memory backend starts empty on every run, so the data directory
/// is ingested first.
async fn open_context(config: Config, data_dir: Option<&Path>) -> Result<Context> {
    let in_memory = config.backend.kind == BackendKind::Memory;
    let dir = data_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.ingestion.data_dir.clone());
    let ctx = Context::connect(config).await?;

    if in_memory {
        let report = ingest_dir(&ctx, &dir).await?;
        tracing::info!(
            records = report.total_records(),
            malformed = report.total_malformed(),
            "Loaded {} into the in-memory stores",
            dir.display()
        );
    }
    Ok(ctx)
}

/// Ingests every conventional source file under `dir`.
async fn ingest_dir(ctx: &Context, dir: &Path) -> Result<IngestionReport> {
    if !dir.is_dir() {
        return Err(color_eyre::eyre::eyre!(
            "Data directory {} does not exist",
            dir.display()
        ));
    }

    let sources: Vec<Box<dyn SignalSource>> = FileSource::discover(dir)
        .into_iter()
        .map(|source| Box::new(source) as Box<dyn SignalSource>)
        .collect();
    if sources.is_empty() {
        tracing::warn!("No source files found in {}", dir.display());
    }

    Ok(ctx.builder().ingest_all(&sources).await)
}
