//! Query command handler.

use std::path::Path;
use std::sync::Arc;

use color_eyre::Result;

use crate::answer::ExtractiveAnswerGenerator;
use crate::config::Config;
use crate::services::{QueryOutcome, QueryRequest};

use super::{open_context, App};

impl App {
    /// Answer one question and print the response as JSON.
    pub async fn run_query(
        &self,
        question: &str,
        data_dir: Option<&Path>,
        max_hops: Option<usize>,
        max_items: Option<usize>,
        show_context: bool,
    ) -> Result<()> {
        let mut config = Config::load()?;
        if let Some(hops) = max_hops {
            config.retrieval.max_hops = hops;
        }
        if let Some(items) = max_items {
            config.retrieval.max_items = items;
        }

        let ctx = open_context(config, data_dir).await?;
        let service = ctx.query_service(Arc::new(ExtractiveAnswerGenerator::default()));

        match service.ask(QueryRequest::new(question)).await {
            QueryOutcome::Answered(mut response) => {
                if !show_context {
                    response.context.clear();
                }
                println!("{}", serde_json::to_string_pretty(&response)?);
                Ok(())
            }
            QueryOutcome::Error { error } => Err(color_eyre::eyre::eyre!("Query failed: {}", error)),
        }
    }
}
