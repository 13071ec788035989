use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Activity type categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    QuestionReceived,
    CacheHit,
    DuplicateJoined,
    RetrievalExecuted,
    RetrievalDegraded,
    RetrievalUnavailable,
    AnswerGenerated,
    GenerationUnavailable,
    GenerationError,
    AnswerRefused,
    AnswerDelivered,
    CacheInvalidated,
    CircuitsReset,
}

impl ActivityType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::QuestionReceived => "question_received",
            Self::CacheHit => "cache_hit",
            Self::DuplicateJoined => "duplicate_joined",
            Self::RetrievalExecuted => "retrieval_executed",
            Self::RetrievalDegraded => "retrieval_degraded",
            Self::RetrievalUnavailable => "retrieval_unavailable",
            Self::AnswerGenerated => "answer_generated",
            Self::GenerationUnavailable => "generation_unavailable",
            Self::GenerationError => "generation_error",
            Self::AnswerRefused => "answer_refused",
            Self::AnswerDelivered => "answer_delivered",
            Self::CacheInvalidated => "cache_invalidated",
            Self::CircuitsReset => "circuits_reset",
        }
    }
}

/// Activity status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Success,
    Error,
    Warning,
    Info,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

/// One request lifecycle event
#[derive(Debug, Clone, Serialize)]
pub struct ActivityLog {
    pub request_id: Uuid,
    /// Empty for admin events
    pub session_id: String,

    pub activity_type: ActivityType,
    pub activity_status: ActivityStatus,

    pub question: Option<String>,
    pub recommendation: Option<String>,
    pub confidence_score: Option<f64>,
    pub match_count: Option<usize>,
    pub cached: Option<bool>,

    pub processing_time_ms: Option<u64>,

    pub error_message: Option<String>,
    pub error_type: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_fields: Option<HashMap<String, Value>>,
}

impl ActivityLog {
    /// Create builder for fluent API
    pub fn builder(request_id: Uuid, session_id: impl Into<String>, activity_type: ActivityType) -> ActivityLogBuilder {
        ActivityLogBuilder::new(request_id, session_id, activity_type)
    }
}

/// Builder pattern for ActivityLog
pub struct ActivityLogBuilder {
    log: ActivityLog,
}

impl ActivityLogBuilder {
    pub fn new(request_id: Uuid, session_id: impl Into<String>, activity_type: ActivityType) -> Self {
        Self {
            log: ActivityLog {
                request_id,
                session_id: session_id.into(),
                activity_type,
                activity_status: ActivityStatus::Success,
                question: None,
                recommendation: None,
                confidence_score: None,
                match_count: None,
                cached: None,
                processing_time_ms: None,
                error_message: None,
                error_type: None,
                created_at: Utc::now(),
                custom_fields: None,
            },
        }
    }

    pub fn status(mut self, status: ActivityStatus) -> Self {
        self.log.activity_status = status;
        self
    }

    pub fn question(mut self, question: impl Into<String>) -> Self {
        self.log.question = Some(question.into());
        self
    }

    pub fn recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.log.recommendation = Some(recommendation.into());
        self
    }

    pub fn confidence(mut self, score: f64) -> Self {
        self.log.confidence_score = Some(score);
        self
    }

    pub fn match_count(mut self, count: usize) -> Self {
        self.log.match_count = Some(count);
        self
    }

    pub fn cached(mut self, cached: bool) -> Self {
        self.log.cached = Some(cached);
        self
    }

    pub fn processing_time(mut self, ms: u64) -> Self {
        self.log.processing_time_ms = Some(ms);
        self
    }

    pub fn error(mut self, message: impl Into<String>, error_type: impl Into<String>) -> Self {
        self.log.error_message = Some(message.into());
        self.log.error_type = Some(error_type.into());
        self.log.activity_status = ActivityStatus::Error;
        self
    }

    /// Add custom key-value data
    pub fn custom(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.log
            .custom_fields
            .get_or_insert_with(HashMap::new)
            .insert(key.to_string(), value.into());
        self
    }

    pub fn build(self) -> ActivityLog {
        self.log
    }
}
