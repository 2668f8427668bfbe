//! Answer generation.
//!
//! The core never calls a language model itself. It hands the question,
//! the assembled context and the conversation so far to an
//! [`AnswerGenerator`]; retries and rate limits belong to the generator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// One earlier exchange in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
}

/// A generated answer with usage accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub tokens_used: usize,
    pub cost_estimate: f64,
    pub model_name: String,
}

/// Stateless answer generation from a context.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(
        &self,
        question: &str,
        context_text: &str,
        history: &[ConversationTurn],
    ) -> Result<Answer, AppError>;

    fn model_name(&self) -> &str;
}

/// Rough token count used for accounting (4 characters per token).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Answers by quoting the highest-ranked context entries.
///
/// Deterministic and offline; used by the CLI and in tests.
#[derive(Debug, Clone)]
pub struct ExtractiveAnswerGenerator {
    max_findings: usize,
}

impl Default for ExtractiveAnswerGenerator {
    fn default() -> Self {
        Self { max_findings: 5 }
    }
}

impl ExtractiveAnswerGenerator {
    pub fn new(max_findings: usize) -> Self {
        Self {
            max_findings: max_findings.max(1),
        }
    }
}

#[async_trait]
impl AnswerGenerator for ExtractiveAnswerGenerator {
    async fn generate(
        &self,
        question: &str,
        context_text: &str,
        history: &[ConversationTurn],
    ) -> Result<Answer, AppError> {
        let mut text = String::new();
        if let Some(previous) = history.last() {
            text.push_str(&format!("Following up on \"{}\".\n", previous.question));
        }

        let mut section = "";
        let mut findings = Vec::new();
        for line in context_text.lines() {
            if let Some(heading) = line.strip_prefix("## ") {
                section = heading;
            } else if let Some(entry) = line.strip_prefix("- ") {
                findings.push(format!("{}: {}", section, entry));
            }
        }

        if findings.is_empty() {
            text.push_str("No relevant data found in the security telemetry for this question.");
        } else {
            text.push_str(&format!("Findings relevant to \"{}\":\n", question.trim()));
            for finding in findings.iter().take(self.max_findings) {
                text.push_str("- ");
                text.push_str(finding);
                text.push('\n');
            }
            if findings.len() > self.max_findings {
                text.push_str(&format!(
                    "({} more entries in context)\n",
                    findings.len() - self.max_findings
                ));
            }
        }

        let tokens_used =
            estimate_tokens(question) + estimate_tokens(context_text) + estimate_tokens(&text);
        Ok(Answer {
            text: text.trim_end().to_string(),
            tokens_used,
            cost_estimate: 0.0,
            model_name: self.model_name().to_string(),
        })
    }

    fn model_name(&self) -> &str {
        "extractive"
    }
}
