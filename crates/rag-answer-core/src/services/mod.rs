pub mod circuit_breaker;
pub mod collaborators;
pub mod confidence;
pub mod conversation;
pub mod dedup;
pub mod llm_service;
pub mod orchestrator;
pub mod question_classifier;
pub mod response_cache;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitState, CircuitStats};
pub use collaborators::{AnswerGeneration, KnowledgeRetrieval};
pub use confidence::{ConfidenceEvaluator, ConfidenceFactor, ConfidenceResult};
pub use conversation::ConversationContext;
pub use dedup::{DedupStats, RequestDeduplicator};
pub use llm_service::LlmService;
pub use orchestrator::AnswerOrchestrator;
pub use question_classifier::QuestionClassifier;
pub use response_cache::{CacheStats, DurableStore, InvalidationReport, RedisStore, ResponseCache};

#[cfg(test)]
pub use collaborators::{MockAnswerGeneration, MockKnowledgeRetrieval};
