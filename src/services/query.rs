//! The query API: question in, answer with sources out.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::answer::{estimate_tokens, AnswerGenerator, ConversationTurn};
use crate::error::{AppError, StoreKind};
use crate::models::{EmptyReason, RetrievalStatus};
use crate::services::assembler::ContextAssembler;
use crate::services::retriever::HybridRetriever;

/// Model name reported when no generator was called.
const NO_MODEL: &str = "none";

/// An investigation question.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            history: Vec::new(),
        }
    }
}

/// A successful answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    /// Labels of the entities the answer was built from.
    pub sources: Vec<String>,
    pub model: String,
    pub tokens: usize,
    pub cost: f64,
    pub status: RetrievalStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// The context handed to the generator.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub context: String,
}

/// What the query boundary returns: an answer or an error message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryOutcome {
    Answered(QueryResponse),
    Error { error: String },
}

/// Text returned when retrieval found nothing relevant.
pub fn no_data_answer(reason: EmptyReason) -> String {
    let detail = match reason {
        EmptyReason::EmptyIndex => "nothing has been ingested yet",
        EmptyReason::BelowFloor => "no entity is similar enough to the question",
        EmptyReason::FilteredOut => "no entity satisfies the question's constraints",
    };
    format!("No relevant data found ({}).", detail)
}

/// Text returned when an outage left nothing to answer from.
pub fn unavailable_answer(unavailable: &[StoreKind]) -> String {
    let stores = unavailable
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(" and ");
    format!(
        "No answer available: the {} store is unavailable, so relevant data may be missing.",
        stores
    )
}

/// Retrieves, assembles and answers.
pub struct QueryService {
    retriever: Arc<HybridRetriever>,
    assembler: ContextAssembler,
    generator: Arc<dyn AnswerGenerator>,
}

impl QueryService {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        assembler: ContextAssembler,
        generator: Arc<dyn AnswerGenerator>,
    ) -> Self {
        Self {
            retriever,
            assembler,
            generator,
        }
    }

    /// Answers a request, folding failures into [`QueryOutcome::Error`].
    pub async fn ask(&self, request: QueryRequest) -> QueryOutcome {
        match self.answer(&request).await {
            Ok(response) => QueryOutcome::Answered(response),
            Err(e) => {
                tracing::warn!(question = %request.question, error = %e, "Query failed");
                QueryOutcome::Error {
                    error: e.to_string(),
                }
            }
        }
    }

    pub async fn answer(&self, request: &QueryRequest) -> Result<QueryResponse, AppError> {
        let context = self.retriever.retrieve_default(&request.question).await?;

        // Without data the generator is never asked to guess; the answer says
        // why there is none.
        let without_data = match &context.status {
            RetrievalStatus::Empty { reason } => Some(no_data_answer(*reason)),
            RetrievalStatus::Degraded { unavailable } if context.items.is_empty() => {
                Some(unavailable_answer(unavailable))
            }
            _ => None,
        };
        if let Some(answer) = without_data {
            let assembled = self.assembler.assemble(&context);
            return Ok(QueryResponse {
                tokens: estimate_tokens(&request.question) + estimate_tokens(&answer),
                answer,
                sources: Vec::new(),
                model: NO_MODEL.to_string(),
                cost: 0.0,
                status: context.status,
                warnings: context.warnings,
                context: assembled.text,
            });
        }

        let assembled = self.assembler.assemble(&context);
        let generated = self
            .generator
            .generate(&request.question, &assembled.text, &request.history)
            .await?;

        tracing::info!(
            query_id = %context.query_id,
            sources = assembled.sources.len(),
            tokens = generated.tokens_used,
            model = %generated.model_name,
            "Query answered"
        );

        Ok(QueryResponse {
            answer: generated.text,
            sources: assembled.sources,
            model: generated.model_name,
            tokens: generated.tokens_used,
            cost: generated.cost_estimate,
            status: context.status,
            warnings: context.warnings,
            context: assembled.text,
        })
    }
}
