pub mod answer;

pub use answer::{
    AnswerPayload, AnswerResponse, GeneratedAnswer, GenerationRequest, HistoryTurn,
    KnowledgeMatch, MatchType, ProvisionStatus, QuestionType, Recommendation, SessionId,
};
