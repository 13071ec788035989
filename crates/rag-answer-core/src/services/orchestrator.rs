//! Request lifecycle: validate, deduplicate, cache, retrieve, generate,
//! evaluate, remember.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::logging::{ActivityLog, ActivityLogger, ActivityStatus, ActivityType};
use crate::models::{
    AnswerPayload, AnswerResponse, GeneratedAnswer, GenerationRequest, HistoryTurn, KnowledgeMatch,
    QuestionType, Recommendation,
};
use crate::services::circuit_breaker::{CircuitBreakerRegistry, CircuitStats};
use crate::services::collaborators::{AnswerGeneration, KnowledgeRetrieval};
use crate::services::confidence::ConfidenceEvaluator;
use crate::services::conversation::ConversationContext;
use crate::services::dedup::{DedupStats, RequestDeduplicator};
use crate::services::question_classifier::QuestionClassifier;
use crate::services::response_cache::{CacheStats, DurableStore, InvalidationReport, ResponseCache};
use crate::utils::error::{CoreError, CoreResult};
use crate::utils::normalize::scoped_question_hash;

pub const KNOWLEDGE_RETRIEVAL: &str = "knowledge_retrieval";
pub const ANSWER_GENERATION: &str = "answer_generation";

/// Prior turns handed to the generator
const HISTORY_TURNS: usize = 3;

const UNAVAILABLE_TEXT: &str =
    "The answering service is temporarily unavailable. Please try again in a moment.";
const GENERATION_UNAVAILABLE: &str = "Answer generation is temporarily unavailable.";
const RETRIEVAL_UNAVAILABLE: &str = "The provision index is temporarily unavailable.";

/// Shared result of one deduplicated execution
#[derive(Debug, Clone)]
struct Outcome {
    payload: AnswerPayload,
    cached: bool,
    unavailable: bool,
}

/// What retrieval produced for a job
enum Evidence {
    Found(Vec<KnowledgeMatch>),
    /// Retrieval failed for a reason other than an outage
    Degraded,
    /// Circuit open or call timed out
    Unavailable,
}

/// Per-request inputs to the shared execution
struct Job {
    request_id: Uuid,
    session_id: String,
    question: String,
    question_type: QuestionType,
    topic_hint: Option<String>,
    history: Vec<HistoryTurn>,
}

/// The part of the lifecycle that runs once per deduplicated question
struct Pipeline {
    retrieval: Arc<dyn KnowledgeRetrieval>,
    generation: Arc<dyn AnswerGeneration>,
    cache: Arc<ResponseCache>,
    breakers: Arc<CircuitBreakerRegistry>,
    evaluator: ConfidenceEvaluator,
    activity: Option<ActivityLogger>,
}

impl Pipeline {
    async fn produce(self: Arc<Self>, job: Job) -> CoreResult<Outcome> {
        let topic = job.topic_hint.as_deref();
        if let Some(payload) = self.cache.get_scoped(&job.question, topic).await {
            self.record(&job, ActivityType::CacheHit, |b| b.cached(true));
            return Ok(Outcome {
                payload,
                cached: true,
                unavailable: false,
            });
        }

        let matches = match self.retrieve(&job).await {
            Evidence::Found(matches) if matches.is_empty() => {
                let payload = self.no_evidence(&job);
                self.cache.set_scoped(&job.question, topic, &payload).await;
                return Ok(Outcome {
                    payload,
                    cached: false,
                    unavailable: false,
                });
            }
            Evidence::Found(matches) => matches,
            Evidence::Degraded => {
                debug!("Skipping cache write for degraded answer");
                return Ok(Outcome {
                    payload: self.no_evidence(&job),
                    cached: false,
                    unavailable: false,
                });
            }
            Evidence::Unavailable => {
                return Ok(Outcome {
                    payload: unavailable_payload(RETRIEVAL_UNAVAILABLE, job.topic_hint.clone()),
                    cached: false,
                    unavailable: true,
                })
            }
        };

        let generated = match self.generate(&job, &matches).await {
            Ok(Some(generated)) => generated,
            Ok(None) => {
                return Ok(Outcome {
                    payload: unavailable_payload(GENERATION_UNAVAILABLE, job.topic_hint.clone()),
                    cached: false,
                    unavailable: true,
                })
            }
            Err(e) => {
                self.record(&job, ActivityType::GenerationError, |b| b.error(e.to_string(), e.kind()));
                return Err(e);
            }
        };

        let result = self.evaluator.evaluate(job.question_type, &generated.matches_used);
        let payload = AnswerPayload {
            answer_text: result.render(&generated.text),
            confidence_score: result.score,
            recommendation: result.recommendation,
            citations: citations(&generated.matches_used),
            refusal_reason: result.refusal_reason.clone(),
            topic: topic_of(&generated.matches_used)
                .or_else(|| topic_of(&matches))
                .or_else(|| job.topic_hint.clone()),
        };

        let activity = if payload.recommendation == Recommendation::Refuse {
            ActivityType::AnswerRefused
        } else {
            ActivityType::AnswerGenerated
        };
        self.record(&job, activity, |b| {
            b.confidence(payload.confidence_score)
                .recommendation(payload.recommendation.as_str())
                .match_count(generated.matches_used.len())
        });

        self.cache.set_scoped(&job.question, topic, &payload).await;

        Ok(Outcome {
            payload,
            cached: false,
            unavailable: false,
        })
    }

    /// Refusal for a question with no supporting provisions
    fn no_evidence(&self, job: &Job) -> AnswerPayload {
        let result = self.evaluator.evaluate(job.question_type, &[]);
        AnswerPayload {
            answer_text: result.render(""),
            confidence_score: result.score,
            recommendation: result.recommendation,
            citations: Vec::new(),
            refusal_reason: result.refusal_reason,
            topic: job.topic_hint.clone(),
        }
    }

    /// Retrieve through the breaker
    async fn retrieve(&self, job: &Job) -> Evidence {
        let retrieval = Arc::clone(&self.retrieval);
        let question = job.question.clone();
        let hint = job.topic_hint.clone();

        let result = self
            .breakers
            .get(KNOWLEDGE_RETRIEVAL)
            .execute(move || async move { retrieval.retrieve(question, hint).await })
            .await;

        match result {
            Ok(matches) => {
                self.record(job, ActivityType::RetrievalExecuted, |b| b.match_count(matches.len()));
                Evidence::Found(matches)
            }
            Err(e) if e.is_unavailable() => {
                warn!("Knowledge retrieval unavailable, returning fallback: {}", e);
                self.record(job, ActivityType::RetrievalUnavailable, |b| {
                    b.error(e.to_string(), e.kind()).status(ActivityStatus::Warning)
                });
                Evidence::Unavailable
            }
            Err(e) => {
                warn!("Knowledge retrieval failed, answering without evidence: {}", e);
                self.record(job, ActivityType::RetrievalDegraded, |b| {
                    b.error(e.to_string(), e.kind()).status(ActivityStatus::Warning)
                });
                Evidence::Degraded
            }
        }
    }

    /// Generate through the breaker. `Ok(None)` means the generator is
    /// unavailable; other failures are returned as errors.
    async fn generate(&self, job: &Job, matches: &[KnowledgeMatch]) -> CoreResult<Option<GeneratedAnswer>> {
        let generation = Arc::clone(&self.generation);
        let request = GenerationRequest {
            question: job.question.clone(),
            question_type: job.question_type,
            topic: job.topic_hint.clone(),
            matches: matches.to_vec(),
            history: job.history.clone(),
        };

        self.breakers
            .get(ANSWER_GENERATION)
            .execute_with_fallback(
                move || async move { generation.generate(request).await.map(Some) },
                |e| {
                    if e.is_unavailable() {
                        warn!("Answer generation unavailable, returning fallback: {}", e);
                        self.record(job, ActivityType::GenerationUnavailable, |b| {
                            b.error(e.to_string(), e.kind()).status(ActivityStatus::Warning)
                        });
                        Ok(None)
                    } else {
                        Err(e)
                    }
                },
            )
            .await
    }

    fn record(
        &self,
        job: &Job,
        activity_type: ActivityType,
        build: impl FnOnce(crate::logging::ActivityLogBuilder) -> crate::logging::ActivityLogBuilder,
    ) {
        if let Some(logger) = &self.activity {
            let builder = ActivityLog::builder(job.request_id, job.session_id.clone(), activity_type);
            logger.log(build(builder).build());
        }
    }
}

fn unavailable_payload(reason: &str, topic: Option<String>) -> AnswerPayload {
    AnswerPayload {
        answer_text: UNAVAILABLE_TEXT.to_string(),
        confidence_score: 0.0,
        recommendation: Recommendation::Refuse,
        citations: Vec::new(),
        refusal_reason: Some(reason.to_string()),
        topic,
    }
}

/// Distinct citations in match order
fn citations(matches: &[KnowledgeMatch]) -> Vec<String> {
    let mut seen = Vec::with_capacity(matches.len());
    for m in matches {
        if !m.citation.is_empty() && !seen.contains(&m.citation) {
            seen.push(m.citation.clone());
        }
    }
    seen
}

fn topic_of(matches: &[KnowledgeMatch]) -> Option<String> {
    matches.iter().find_map(|m| m.topic.clone())
}

/// Entry point of the answering core. Owns every store it uses.
pub struct AnswerOrchestrator {
    pipeline: Arc<Pipeline>,
    context: Arc<ConversationContext>,
    dedup: Arc<RequestDeduplicator<Outcome>>,
}

impl AnswerOrchestrator {
    /// Build with background sweeps running. Needs a tokio runtime.
    pub fn new(
        retrieval: Arc<dyn KnowledgeRetrieval>,
        generation: Arc<dyn AnswerGeneration>,
        settings: &Settings,
        durable: Option<Arc<dyn DurableStore>>,
    ) -> Self {
        let breakers = Arc::new(CircuitBreakerRegistry::new(settings.circuit_breaker.clone()));
        breakers.get(KNOWLEDGE_RETRIEVAL);
        breakers.get(ANSWER_GENERATION);

        Self {
            pipeline: Arc::new(Pipeline {
                retrieval,
                generation,
                cache: Arc::new(ResponseCache::new(&settings.cache, durable)),
                breakers,
                evaluator: ConfidenceEvaluator::new(settings.confidence.clone()),
                activity: None,
            }),
            context: ConversationContext::spawn(&settings.conversation),
            dedup: RequestDeduplicator::spawn(&settings.dedup),
        }
    }

    /// Send lifecycle events to `logger`. Call before sharing the orchestrator.
    pub fn with_activity_logger(mut self, logger: ActivityLogger) -> Self {
        match Arc::get_mut(&mut self.pipeline) {
            Some(pipeline) => pipeline.activity = Some(logger),
            None => warn!("Orchestrator already shared, activity logger not attached"),
        }
        self
    }

    /// Answer one question for one session.
    ///
    /// Only non-availability generation failures and invalid input come back
    /// as errors; outages and refusals are well-formed responses.
    pub async fn answer(&self, session_id: &str, question: &str) -> CoreResult<AnswerResponse> {
        let start = Instant::now();
        let session_id = session_id.trim();
        let question = question.trim();
        if session_id.is_empty() {
            return Err(CoreError::Validation("session id is required".to_string()));
        }
        if question.is_empty() {
            return Err(CoreError::Validation("question must not be empty".to_string()));
        }

        let request_id = Uuid::new_v4();
        let session = self.context.get_or_create(session_id);
        let question_type = QuestionClassifier::classify(question);
        let follow_up = QuestionClassifier::is_follow_up(question, !session.history.is_empty());

        let topic_hint = if follow_up {
            let count = self.context.increment_follow_up(session_id);
            debug!("Follow-up #{} on topic {:?}", count, session.current_topic);
            session.current_topic.clone()
        } else {
            self.context.reset_follow_up(session_id);
            None
        };

        let job = Job {
            request_id,
            session_id: session_id.to_string(),
            question: question.to_string(),
            question_type,
            topic_hint,
            history: session.recent_turns(HISTORY_TURNS),
        };
        self.pipeline.record(&job, ActivityType::QuestionReceived, |b| {
            b.question(question).custom("question_type", format!("{:?}", question_type))
        });

        // Follow-ups are answered within the session topic, so they share
        // work and cache entries only with the same question on the same topic
        let key = scoped_question_hash(question, job.topic_hint.as_deref());
        let pipeline = Arc::clone(&self.pipeline);
        let (outcome, joined) = self.dedup.run_keyed(key, move || pipeline.produce(job)).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        if joined {
            if let Some(logger) = &self.pipeline.activity {
                logger.log(
                    ActivityLog::builder(request_id, session_id, ActivityType::DuplicateJoined)
                        .status(ActivityStatus::Info)
                        .question(question)
                        .build(),
                );
            }
        }

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(session_id, "Answer failed after {}ms: {}", elapsed_ms, e);
                return Err(e);
            }
        };

        self.context.add_exchange(
            session_id,
            question,
            &outcome.payload.answer_text,
            outcome.payload.topic.as_deref(),
        );

        if let Some(logger) = &self.pipeline.activity {
            logger.log(
                ActivityLog::builder(request_id, session_id, ActivityType::AnswerDelivered)
                    .recommendation(outcome.payload.recommendation.as_str())
                    .confidence(outcome.payload.confidence_score)
                    .cached(outcome.cached)
                    .processing_time(elapsed_ms)
                    .build(),
            );
        }
        info!(
            session_id,
            recommendation = outcome.payload.recommendation.as_str(),
            cached = outcome.cached,
            unavailable = outcome.unavailable,
            "Answered in {}ms",
            elapsed_ms
        );

        Ok(AnswerResponse::from_payload(
            outcome.payload,
            outcome.cached,
            outcome.unavailable,
            elapsed_ms,
        ))
    }

    // ===== ADMIN =====

    pub async fn invalidate_cache(&self) -> InvalidationReport {
        let report = self.pipeline.cache.invalidate_all().await;
        if let Some(logger) = &self.pipeline.activity {
            logger.log(
                ActivityLog::builder(Uuid::new_v4(), "", ActivityType::CacheInvalidated)
                    .status(ActivityStatus::Info)
                    .custom("version", report.version)
                    .custom("memory_cleared", report.memory_cleared)
                    .custom("durable_cleared", report.durable_cleared)
                    .build(),
            );
        }
        report
    }

    pub fn circuit_stats(&self) -> Vec<CircuitStats> {
        self.pipeline.breakers.stats()
    }

    pub fn reset_circuits(&self) {
        self.pipeline.breakers.reset_all();
        info!("All circuits reset to CLOSED");
        if let Some(logger) = &self.pipeline.activity {
            logger.log(
                ActivityLog::builder(Uuid::new_v4(), "", ActivityType::CircuitsReset)
                    .status(ActivityStatus::Info)
                    .build(),
            );
        }
    }

    pub fn context_count(&self) -> usize {
        self.context.len()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.pipeline.cache.stats()
    }

    pub fn dedup_stats(&self) -> DedupStats {
        self.dedup.stats()
    }

    pub fn context(&self) -> &Arc<ConversationContext> {
        &self.context
    }

    /// Stop background sweeps
    pub async fn shutdown(&self) {
        self.context.shutdown().await;
        self.dedup.shutdown().await;
        info!("Answer orchestrator stopped");
    }
}
