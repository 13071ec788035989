use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::types::{ContextStats, Exchange, Session};
use crate::config::ConversationConfig;
use crate::utils::periodic::PeriodicTask;

/// Thread-safe per-session conversation memory.
///
/// Sessions expire `ttl` after their last activity and the store holds at most
/// `max_sessions`; on overflow the least-recently-touched session is evicted.
/// Every read and write touches the session.
pub struct ConversationContext {
    sessions: DashMap<String, Session>,
    ttl: Duration,
    max_sessions: usize,
    max_history: usize,

    /// Source of LRU stamps
    clock: AtomicU64,

    /// Serializes overflow eviction
    admission: Mutex<()>,

    evictions: AtomicU64,
    expirations: AtomicU64,
    sweeper: Mutex<Option<PeriodicTask>>,
}

impl ConversationContext {
    pub fn new(config: &ConversationConfig) -> Self {
        info!(
            "Initializing conversation context (ttl={}s, max_sessions={}, max_history={})",
            config.ttl_secs, config.max_sessions, config.max_history
        );
        Self {
            sessions: DashMap::new(),
            ttl: config.ttl(),
            max_sessions: config.max_sessions.max(1),
            max_history: config.max_history.max(1),
            clock: AtomicU64::new(0),
            admission: Mutex::new(()),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            sweeper: Mutex::new(None),
        }
    }

    /// Build the store and start its TTL sweep. Needs a tokio runtime.
    pub fn spawn(config: &ConversationConfig) -> Arc<Self> {
        let ctx = Arc::new(Self::new(config));
        ctx.start_sweeper(Duration::from_secs(config.sweep_interval_secs.max(1)));
        ctx
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Periodically drop expired sessions. Replaces any running sweep.
    pub fn start_sweeper(self: &Arc<Self>, every: Duration) {
        let weak = Arc::downgrade(self);
        let task = PeriodicTask::spawn("conversation-ttl-sweep", every, move || match weak.upgrade() {
            Some(ctx) => {
                ctx.cleanup_expired();
                true
            }
            None => false,
        });
        *self.sweeper.lock() = Some(task);
    }

    /// Stop the background sweep
    pub async fn shutdown(&self) {
        let task = self.sweeper.lock().take();
        if let Some(task) = task {
            task.stop().await;
        }
    }

    /// Existing non-expired session, or a fresh one
    pub fn get_or_create(&self, session_id: &str) -> Session {
        self.with_session(session_id, |s| s.clone())
    }

    /// Append an exchange and update the topic when one is given
    pub fn add_exchange(&self, session_id: &str, question: &str, answer: &str, topic: Option<&str>) {
        let exchange = Exchange::new(question, answer, topic.map(str::to_string));
        let max_history = self.max_history;
        self.with_session(session_id, |s| s.push_exchange(exchange, max_history));
        debug!("Recorded exchange for session {}", session_id);
    }

    pub fn last_exchange(&self, session_id: &str) -> Option<Exchange> {
        self.with_existing(session_id, |s| s.last_exchange().cloned())
            .flatten()
    }

    pub fn current_topic(&self, session_id: &str) -> Option<String> {
        self.with_existing(session_id, |s| s.current_topic.clone())
            .flatten()
    }

    /// Returns the new follow-up count
    pub fn increment_follow_up(&self, session_id: &str) -> u32 {
        self.with_session(session_id, |s| {
            s.follow_up_count += 1;
            s.follow_up_count
        })
    }

    pub fn reset_follow_up(&self, session_id: &str) {
        self.with_session(session_id, |s| s.follow_up_count = 0);
    }

    /// Remove a session immediately
    pub fn clear(&self, session_id: &str) -> bool {
        let removed = self.sessions.remove(session_id).is_some();
        if removed {
            debug!("Session {} cleared", session_id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Drop every session past its TTL. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let ttl = self.ttl;
        let mut removed = 0usize;
        self.sessions.retain(|id, session| {
            let keep = !session.is_expired(ttl);
            if !keep {
                debug!("Session {} expired (idle {:?})", id, session.last_activity.elapsed());
                removed += 1;
            }
            keep
        });

        if removed > 0 {
            self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
            info!("Cleaned up {} expired sessions", removed);
        }
        removed
    }

    pub fn stats(&self) -> ContextStats {
        ContextStats {
            active_sessions: self.len(),
            max_sessions: self.max_sessions,
            evictions_total: self.evictions.load(Ordering::Relaxed),
            expirations_total: self.expirations.load(Ordering::Relaxed),
        }
    }

    fn next_seq(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Touch (creating or replacing an expired session) and run `f` under the
    /// entry lock, then enforce the session cap if a session was created.
    fn with_session<R>(&self, session_id: &str, f: impl FnOnce(&mut Session) -> R) -> R {
        let seq = self.next_seq();
        let mut created = false;

        let result = {
            let mut entry = self
                .sessions
                .entry(session_id.to_string())
                .or_insert_with(|| {
                    created = true;
                    Session::new(session_id.to_string(), seq)
                });

            if !created && entry.is_expired(self.ttl) {
                debug!("Session {} expired, starting a fresh context", session_id);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                *entry = Session::new(session_id.to_string(), seq);
            }

            entry.touch(seq);
            f(entry.value_mut())
        };

        if created {
            debug!("Created session {}", session_id);
            self.enforce_capacity(session_id);
        }
        result
    }

    /// Touch and read an existing session. Expired sessions are removed and
    /// reported as absent.
    fn with_existing<R>(&self, session_id: &str, f: impl FnOnce(&Session) -> R) -> Option<R> {
        let seq = self.next_seq();
        {
            let mut entry = self.sessions.get_mut(session_id)?;
            if !entry.is_expired(self.ttl) {
                entry.touch(seq);
                return Some(f(entry.value()));
            }
        }

        let ttl = self.ttl;
        if self
            .sessions
            .remove_if(session_id, |_, s| s.is_expired(ttl))
            .is_some()
        {
            self.expirations.fetch_add(1, Ordering::Relaxed);
            debug!("Session {} expired, removed from context", session_id);
        }
        None
    }

    /// Evict least-recently-touched sessions until within `max_sessions`.
    /// `keep` (the session just created) is never chosen.
    fn enforce_capacity(&self, keep: &str) {
        let _guard = self.admission.lock();

        while self.sessions.len() > self.max_sessions {
            let victim = self
                .sessions
                .iter()
                .filter(|e| e.key() != keep)
                .min_by_key(|e| e.value().touch_seq)
                .map(|e| e.key().clone());

            let Some(victim) = victim else { break };
            if self.sessions.remove(&victim).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                info!(
                    "Session {} evicted (capacity {} reached)",
                    victim, self.max_sessions
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_sessions: usize, max_history: usize) -> ConversationConfig {
        ConversationConfig {
            ttl_secs: 1800,
            max_sessions,
            max_history,
            sweep_interval_secs: 60,
        }
    }

    #[test]
    fn test_get_or_create_returns_same_session() {
        let ctx = ConversationContext::new(&config(10, 10));
        let a = ctx.get_or_create("s1");
        ctx.add_exchange("s1", "q", "a", Some("filing"));
        let b = ctx.get_or_create("s1");

        assert_eq!(a.session_id, "s1");
        assert_eq!(b.history.len(), 1);
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_add_exchange_trims_history() {
        let ctx = ConversationContext::new(&config(10, 3));
        for i in 0..6 {
            ctx.add_exchange("s1", &format!("q{}", i), &format!("a{}", i), None);
        }
        let session = ctx.get_or_create("s1");
        assert_eq!(session.history.len(), 3);
        assert_eq!(session.history.front().unwrap().question, "q3");
        assert_eq!(ctx.last_exchange("s1").unwrap().question, "q5");
    }

    #[test]
    fn test_topic_and_follow_up_counters() {
        let ctx = ConversationContext::new(&config(10, 10));
        assert_eq!(ctx.current_topic("s1"), None);

        ctx.add_exchange("s1", "q", "a", Some("penalties"));
        assert_eq!(ctx.current_topic("s1").as_deref(), Some("penalties"));

        assert_eq!(ctx.increment_follow_up("s1"), 1);
        assert_eq!(ctx.increment_follow_up("s1"), 2);
        ctx.reset_follow_up("s1");
        assert_eq!(ctx.get_or_create("s1").follow_up_count, 0);
    }

    #[test]
    fn test_readers_do_not_create_sessions() {
        let ctx = ConversationContext::new(&config(10, 10));
        assert!(ctx.last_exchange("ghost").is_none());
        assert!(ctx.current_topic("ghost").is_none());
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_expired_session_is_replaced() {
        let ctx = ConversationContext::new(&config(10, 10)).with_ttl(Duration::from_millis(40));
        ctx.add_exchange("s1", "q", "a", Some("filing"));

        std::thread::sleep(Duration::from_millis(70));

        assert!(ctx.last_exchange("s1").is_none());
        let fresh = ctx.get_or_create("s1");
        assert!(fresh.history.is_empty());
        assert!(fresh.current_topic.is_none());
        assert!(ctx.stats().expirations_total >= 1);
    }

    #[test]
    fn test_cleanup_expired() {
        let ctx = ConversationContext::new(&config(10, 10)).with_ttl(Duration::from_millis(40));
        ctx.get_or_create("old1");
        ctx.get_or_create("old2");
        std::thread::sleep(Duration::from_millis(70));
        ctx.get_or_create("fresh");

        assert_eq!(ctx.cleanup_expired(), 2);
        assert_eq!(ctx.len(), 1);
        assert!(ctx.contains("fresh"));
    }

    #[test]
    fn test_capacity_bound_evicts_least_recently_touched() {
        for k in 1..=5usize {
            let max = 4;
            let ctx = ConversationContext::new(&config(max, 10));
            for i in 0..(max + k) {
                ctx.get_or_create(&format!("s{}", i));
            }

            assert_eq!(ctx.len(), max, "k={}", k);
            for i in 0..k {
                assert!(!ctx.contains(&format!("s{}", i)), "s{} should be evicted (k={})", i, k);
            }
            for i in k..(max + k) {
                assert!(ctx.contains(&format!("s{}", i)), "s{} should remain (k={})", i, k);
            }
            assert_eq!(ctx.stats().evictions_total, k as u64);
        }
    }

    #[test]
    fn test_reads_refresh_lru_position() {
        let ctx = ConversationContext::new(&config(3, 10));
        ctx.add_exchange("s0", "q", "a", Some("t"));
        ctx.get_or_create("s1");
        ctx.get_or_create("s2");

        // Read-only touch makes s0 the most recent
        assert!(ctx.current_topic("s0").is_some());
        ctx.get_or_create("s3");

        assert!(ctx.contains("s0"));
        assert!(!ctx.contains("s1"));
        assert!(ctx.contains("s2"));
        assert!(ctx.contains("s3"));
    }

    #[test]
    fn test_clear() {
        let ctx = ConversationContext::new(&config(10, 10));
        ctx.get_or_create("s1");
        assert!(ctx.clear("s1"));
        assert!(!ctx.clear("s1"));
        assert!(ctx.is_empty());
    }

    #[tokio::test]
    async fn test_background_sweep_removes_expired() {
        let ctx = Arc::new(
            ConversationContext::new(&config(10, 10)).with_ttl(Duration::from_millis(30)),
        );
        ctx.start_sweeper(Duration::from_millis(20));
        ctx.get_or_create("s1");

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(ctx.is_empty());

        ctx.shutdown().await;
    }
}
