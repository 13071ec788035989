use thiserror::Error;

/// Errors produced by the answer-orchestration core.
///
/// `Clone` is required because a single deduplicated result (success or
/// failure) is handed to every caller that joined the in-flight request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Circuit open: {dependency} is temporarily unavailable")]
    CircuitOpen { dependency: String },

    #[error("Timeout: {dependency} did not answer within {after_ms}ms")]
    Timeout { dependency: String, after_ms: u64 },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// True when the dependency could not be reached at all (open circuit or
    /// timeout), as opposed to answering with an error.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CoreError::CircuitOpen { .. } | CoreError::Timeout { .. })
    }

    /// Short machine-readable tag, used by the activity log.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation",
            CoreError::CircuitOpen { .. } => "circuit_open",
            CoreError::Timeout { .. } => "timeout",
            CoreError::Cache(_) => "cache",
            CoreError::Retrieval(_) => "retrieval",
            CoreError::Generation(_) => "generation",
            CoreError::Internal(_) => "internal",
        }
    }
}

impl From<redis::RedisError> for CoreError {
    fn from(e: redis::RedisError) -> Self {
        CoreError::Cache(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Cache(format!("payload serialization failed: {}", e))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
