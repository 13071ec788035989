//! Conversation memory module
//!
//! Per-session short-term memory used for follow-up questions:
//! - Thread-safe session store (DashMap)
//! - Bounded history per session
//! - TTL expiry with a background sweep
//! - LRU eviction when the session cap is reached

mod store;
pub mod types;

pub use store::ConversationContext;
pub use types::{ContextStats, Exchange, Session};
