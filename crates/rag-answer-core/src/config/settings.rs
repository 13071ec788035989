use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub circuit_breaker: CircuitBreakerConfig,
    pub conversation: ConversationConfig,
    pub dedup: DedupConfig,
    pub cache: CacheConfig,
    pub durable: DurableConfig,
    pub llm: LlmConfig,
    pub confidence: ConfidenceConfig,
    pub activity_log: ActivityLogConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub half_open_max_attempts: u32,
    pub call_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            half_open_max_attempts: 3,
            call_timeout_ms: 30_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ConversationConfig {
    pub ttl_secs: u64,
    pub max_sessions: usize,
    pub max_history: usize,
    pub sweep_interval_secs: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 30 * 60,
            max_sessions: 10_000,
            max_history: 10,
            sweep_interval_secs: 60,
        }
    }
}

impl ConversationConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct DedupConfig {
    pub stale_after_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 60,
            sweep_interval_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub max_memory_entries: usize,
    pub namespace: String,
    pub durable_timeout_ms: u64,
    /// Bound on the durable purge in `invalidate_all`
    pub purge_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60 * 60,
            max_memory_entries: 1_000,
            namespace: "regqa:answers".to_string(),
            durable_timeout_ms: 250,
            purge_timeout_ms: 5_000,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Durable cache tier. `url = None` runs the cache in-process only.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct DurableConfig {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: Option<String>,
    pub timeout_seconds: u64,
    pub max_tokens: usize,
    pub temperature: f32,
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            model: None,
            timeout_seconds: 60,
            max_tokens: 1024,
            temperature: 0.2,
            system_prompt: "Answer the regulatory question using only the provisions provided. \
                            Cite provisions by their label."
                .to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ConfidenceConfig {
    pub confident_threshold: f64,
    pub qualified_threshold: f64,
    pub citation_lookup_min_score: f64,
    pub min_supporting_relevance: f64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            confident_threshold: 0.6,
            qualified_threshold: 0.4,
            citation_lookup_min_score: 0.5,
            min_supporting_relevance: 0.3,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ActivityLogConfig {
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    pub worker_count: usize,
}

impl Default for ActivityLogConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            batch_size: 100,
            batch_timeout_ms: 1000,
            worker_count: 1,
        }
    }
}

impl Settings {
    /// Load `config/settings.toml` (optional) then `APP__*` environment overrides.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }
}
