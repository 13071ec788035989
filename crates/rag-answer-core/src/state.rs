use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Settings;
use crate::logging::ActivityLogger;
use crate::services::{
    AnswerGeneration, AnswerOrchestrator, DurableStore, KnowledgeRetrieval, LlmService, RedisStore,
};

/// Application state shared by whatever transport fronts the core
#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub orchestrator: Arc<AnswerOrchestrator>,
    pub activity_logger: ActivityLogger,
}

impl AppState {
    /// Wire the core with the LLM-backed generator
    pub async fn build(settings: Settings, retrieval: Arc<dyn KnowledgeRetrieval>) -> Result<Self> {
        let llm_service = Arc::new(LlmService::new(settings.llm.clone())?);
        info!("✅ LLM generator configured at {}", settings.llm.base_url);
        Self::build_with(settings, retrieval, llm_service).await
    }

    pub async fn build_with(
        settings: Settings,
        retrieval: Arc<dyn KnowledgeRetrieval>,
        generation: Arc<dyn AnswerGeneration>,
    ) -> Result<Self> {
        let durable = connect_durable(&settings).await;
        let activity_logger = ActivityLogger::tracing(&settings.activity_log);

        let orchestrator = AnswerOrchestrator::new(retrieval, generation, &settings, durable)
            .with_activity_logger(activity_logger.clone());
        info!("✅ Answer orchestrator ready");

        Ok(Self {
            settings,
            orchestrator: Arc::new(orchestrator),
            activity_logger,
        })
    }

    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
    }
}

/// The durable tier is optional: an unreachable store leaves the cache
/// running on its in-process tier.
async fn connect_durable(settings: &Settings) -> Option<Arc<dyn DurableStore>> {
    let url = settings.durable.url.as_deref()?;
    match RedisStore::connect(url).await {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            warn!("Durable cache tier unavailable, using in-process tier only: {}", e);
            None
        }
    }
}
