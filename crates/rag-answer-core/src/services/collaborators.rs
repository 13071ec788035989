//! Downstream dependencies the orchestrator calls through circuit breakers.
//!
//! Arguments are owned so implementations can move them into spawned work.

use async_trait::async_trait;

use crate::models::{GeneratedAnswer, GenerationRequest, KnowledgeMatch};
use crate::utils::error::CoreResult;

/// Finds provisions relevant to a question.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KnowledgeRetrieval: Send + Sync {
    /// `topic_hint` carries the conversation's current topic for follow-ups
    async fn retrieve(&self, question: String, topic_hint: Option<String>) -> CoreResult<Vec<KnowledgeMatch>>;
}

/// Produces answer text from a question and its evidence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnswerGeneration: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> CoreResult<GeneratedAnswer>;
}
