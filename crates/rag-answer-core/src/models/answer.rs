use serde::{Deserialize, Serialize};

pub type SessionId = String;

// ===== KNOWLEDGE MODELS =====

/// How a knowledge match was found by the retrieval collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// The question referenced the provision by its citation
    Citation,
    /// Lexical / keyword hit
    Keyword,
    /// Embedding similarity only
    Semantic,
}

impl MatchType {
    /// How much a match of this kind counts toward citation quality
    pub fn citation_weight(&self) -> f64 {
        match self {
            MatchType::Citation => 0.8,
            MatchType::Keyword => 0.6,
            MatchType::Semantic => 0.5,
        }
    }
}

/// Legal status of the provision behind a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStatus {
    Current,
    Superseded,
    Repealed,
    Unknown,
}

/// A retrieved candidate passage used as evidence for an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeMatch {
    /// Citation label, e.g. "Reg 12(3)"
    pub citation: String,
    pub excerpt: String,
    pub topic: Option<String>,
    /// 0.0 - 1.0
    pub relevance: f64,
    pub match_type: MatchType,
    pub status: ProvisionStatus,
    #[serde(default)]
    pub exact_citation: bool,
    #[serde(default)]
    pub exact_numeric: bool,
}

impl KnowledgeMatch {
    pub fn new(citation: impl Into<String>, relevance: f64, match_type: MatchType) -> Self {
        Self {
            citation: citation.into(),
            excerpt: String::new(),
            topic: None,
            relevance,
            match_type,
            status: ProvisionStatus::Current,
            exact_citation: false,
            exact_numeric: false,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.excerpt = excerpt.into();
        self
    }

    pub fn with_status(mut self, status: ProvisionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn exact_citation(mut self) -> Self {
        self.exact_citation = true;
        self
    }

    pub fn exact_numeric(mut self) -> Self {
        self.exact_numeric = true;
        self
    }

    pub fn is_current(&self) -> bool {
        self.status == ProvisionStatus::Current
    }
}

/// Classified question type; drives type-aware confidence scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    /// "What does section 4.2 say?"
    CitationLookup,
    PenaltyAmount,
    Deadline,
    Threshold,
    Definition,
    Procedure,
    General,
}

impl QuestionType {
    /// Question types whose answer hinges on a specific figure
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            QuestionType::PenaltyAmount | QuestionType::Deadline | QuestionType::Threshold
        )
    }

    pub fn is_citation_lookup(&self) -> bool {
        matches!(self, QuestionType::CitationLookup)
    }
}

// ===== GENERATION MODELS =====

/// One prior turn handed to the generator for follow-up resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub question: String,
    pub question_type: QuestionType,
    pub topic: Option<String>,
    pub matches: Vec<KnowledgeMatch>,
    pub history: Vec<HistoryTurn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedAnswer {
    pub text: String,
    /// Matches the generator actually relied on
    pub matches_used: Vec<KnowledgeMatch>,
}

// ===== RESPONSE MODELS =====

/// How much to trust a generated answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Confident,
    Qualified,
    Refuse,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Confident => "confident",
            Recommendation::Qualified => "qualified",
            Recommendation::Refuse => "refuse",
        }
    }
}

/// The cacheable part of an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerPayload {
    pub answer_text: String,
    pub confidence_score: f64,
    pub recommendation: Recommendation,
    pub citations: Vec<String>,
    #[serde(default)]
    pub refusal_reason: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
}

/// Result handed back to the transport layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerResponse {
    pub answer_text: String,
    pub confidence_score: f64,
    pub recommendation: Recommendation,
    pub citations: Vec<String>,
    pub refusal_reason: Option<String>,
    pub cached: bool,
    /// Set when a dependency was down and this is the "please retry" answer
    pub unavailable: bool,
    pub response_time_ms: u64,
}

impl AnswerResponse {
    pub fn from_payload(payload: AnswerPayload, cached: bool, unavailable: bool, response_time_ms: u64) -> Self {
        Self {
            answer_text: payload.answer_text,
            confidence_score: payload.confidence_score,
            recommendation: payload.recommendation,
            citations: payload.citations,
            refusal_reason: payload.refusal_reason,
            cached,
            unavailable,
            response_time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_type_groups() {
        assert!(QuestionType::PenaltyAmount.is_numeric());
        assert!(QuestionType::Deadline.is_numeric());
        assert!(QuestionType::Threshold.is_numeric());
        assert!(!QuestionType::Definition.is_numeric());
        assert!(QuestionType::CitationLookup.is_citation_lookup());
        assert!(!QuestionType::General.is_citation_lookup());
    }

    #[test]
    fn test_payload_json_shape() {
        let payload = AnswerPayload {
            answer_text: "30 days".into(),
            confidence_score: 0.8,
            recommendation: Recommendation::Confident,
            citations: vec!["Reg 4".into()],
            refusal_reason: None,
            topic: Some("filing".into()),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["recommendation"], "confident");
        assert_eq!(json["citations"][0], "Reg 4");
    }
}
