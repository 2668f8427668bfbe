//! Stats command handler.

use std::path::Path;

use color_eyre::Result;

use crate::config::Config;

use super::{open_context, App};

impl App {
    pub async fn run_stats(&self, data_dir: Option<&Path>) -> Result<()> {
        let ctx = open_context(Config::load()?, data_dir).await?;
        let stats = ctx.stats_service().snapshot().await?;
        println!("{}", serde_json::to_string_pretty(&stats)?);
        Ok(())
    }
}
