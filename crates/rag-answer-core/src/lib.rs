//! Resilient answer orchestration for regulatory question answering:
//! circuit breakers around retrieval and generation, request
//! deduplication, a two-tier answer cache, conversation context and
//! confidence scoring.

pub mod config;
pub mod logging;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;

pub use config::Settings;
pub use models::{AnswerResponse, KnowledgeMatch, Recommendation};
pub use services::AnswerOrchestrator;
pub use state::AppState;
pub use utils::error::{CoreError, CoreResult};
