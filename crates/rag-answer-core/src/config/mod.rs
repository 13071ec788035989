pub mod settings;

pub use settings::{
    ActivityLogConfig, CacheConfig, CircuitBreakerConfig, ConfidenceConfig, ConversationConfig,
    DedupConfig, DurableConfig, LlmConfig, Settings,
};
