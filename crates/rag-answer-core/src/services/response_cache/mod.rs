//! Question → answer cache with a durable tier and an in-process fallback.
//!
//! Keys are `{namespace}:v{version}:{sha256(normalized question)}`, with the
//! conversation topic folded into the hash for follow-up questions. Bumping
//! the version invalidates every entry in O(1); the physical deletes that
//! follow are best-effort.

mod durable;
mod memory;

pub use durable::{DurableStore, RedisStore};
pub use memory::MemoryTier;

use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::models::AnswerPayload;
use crate::utils::error::{CoreError, CoreResult};
use crate::utils::normalize::scoped_question_hash;
use durable::HITS_SUFFIX;

/// Result of `invalidate_all`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvalidationReport {
    pub version: u64,
    pub memory_cleared: usize,
    pub durable_cleared: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub version: u64,
    pub durable_configured: bool,
    pub durable_reachable: bool,
    pub hits_total: u64,
    pub misses_total: u64,
}

pub struct ResponseCache {
    durable: Option<Arc<dyn DurableStore>>,
    memory: MemoryTier,
    namespace: String,
    ttl: Duration,
    durable_timeout: Duration,
    purge_timeout: Duration,
    version: AtomicU64,
    durable_reachable: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig, durable: Option<Arc<dyn DurableStore>>) -> Self {
        info!(
            "Initializing response cache (namespace={}, ttl={}s, memory_cap={}, durable={})",
            config.namespace,
            config.ttl_secs,
            config.max_memory_entries,
            durable.is_some()
        );
        let durable_reachable = AtomicBool::new(durable.is_some());
        Self {
            durable,
            memory: MemoryTier::new(config.max_memory_entries),
            namespace: config.namespace.clone(),
            ttl: config.ttl(),
            durable_timeout: Duration::from_millis(config.durable_timeout_ms.max(1)),
            purge_timeout: Duration::from_millis(config.purge_timeout_ms.max(1)),
            version: AtomicU64::new(1),
            durable_reachable,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Look up a previously answered question. Never fails; any durable-tier
    /// problem degrades to the in-process tier.
    pub async fn get(&self, question: &str) -> Option<AnswerPayload> {
        self.get_scoped(question, None).await
    }

    /// Store an answer in both tiers. Never fails.
    pub async fn set(&self, question: &str, payload: &AnswerPayload) {
        self.set_scoped(question, None, payload).await
    }

    /// `get` for a question asked within a conversation topic.
    ///
    /// The durable tier is skipped while it is marked unreachable. A write or
    /// `check_durable` that succeeds brings it back.
    pub async fn get_scoped(&self, question: &str, topic: Option<&str>) -> Option<AnswerPayload> {
        let key = self.key_for(question, topic);

        if let Some(store) = self.durable.as_ref().filter(|_| self.durable_reachable()) {
            match self.durable_call(store.get(&key)).await {
                Ok(Some(raw)) => match serde_json::from_str::<AnswerPayload>(&raw) {
                    Ok(payload) => {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        self.bump_durable_hits(store, &key);
                        debug!("Durable cache hit {}", short(&key));
                        return Some(payload);
                    }
                    Err(e) => warn!("Discarding unreadable durable entry {}: {}", short(&key), e),
                },
                Ok(None) => {}
                Err(e) => warn!("Durable cache read failed, using in-process tier: {}", e),
            }
        }

        match self.memory.get(&key) {
            Some(payload) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("In-process cache hit {}", short(&key));
                Some(payload)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn set_scoped(&self, question: &str, topic: Option<&str>, payload: &AnswerPayload) {
        let key = self.key_for(question, topic);
        self.memory.insert(key.clone(), payload.clone(), self.ttl);

        let Some(store) = &self.durable else { return };
        let raw = match serde_json::to_string(payload) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Could not serialize payload for durable tier: {}", e);
                return;
            }
        };

        if let Err(e) = self.durable_call(store.set_with_ttl(&key, &raw, self.ttl)).await {
            warn!("Durable cache write failed for {}: {}", short(&key), e);
        }
    }

    /// Invalidate every cached answer. Safe to call repeatedly.
    pub async fn invalidate_all(&self) -> InvalidationReport {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let memory_cleared = self.memory.clear();

        let mut durable_cleared = 0;
        if let Some(store) = &self.durable {
            let prefix = format!("{}:", self.namespace);
            let purge = store.delete_prefix(&prefix);
            match self.durable_call_within(self.purge_timeout, purge).await {
                Ok(n) => durable_cleared = n,
                Err(e) => {
                    warn!("Durable cache purge failed (entries unreachable after version bump): {}", e)
                }
            }
        }

        info!(
            "Response cache invalidated: version={}, memory_cleared={}, durable_cleared={}",
            version, memory_cleared, durable_cleared
        );
        InvalidationReport {
            version,
            memory_cleared,
            durable_cleared,
        }
    }

    /// Ping the durable tier and refresh the reachability flag
    pub async fn check_durable(&self) -> bool {
        match &self.durable {
            Some(store) => self.durable_call(store.ping()).await.is_ok(),
            None => false,
        }
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_entries: self.memory.len(),
            version: self.version(),
            durable_configured: self.durable.is_some(),
            durable_reachable: self.durable.is_some() && self.durable_reachable(),
            hits_total: self.hits.load(Ordering::Relaxed),
            misses_total: self.misses.load(Ordering::Relaxed),
        }
    }

    fn durable_reachable(&self) -> bool {
        self.durable_reachable.load(Ordering::Relaxed)
    }

    fn key_for(&self, question: &str, topic: Option<&str>) -> String {
        format!(
            "{}:v{}:{}",
            self.namespace,
            self.version(),
            scoped_question_hash(question, topic)
        )
    }

    /// Run a durable-tier call under the tier timeout, tracking reachability
    async fn durable_call<T, Fut>(&self, fut: Fut) -> CoreResult<T>
    where
        Fut: Future<Output = CoreResult<T>>,
    {
        self.durable_call_within(self.durable_timeout, fut).await
    }

    async fn durable_call_within<T, Fut>(&self, limit: Duration, fut: Fut) -> CoreResult<T>
    where
        Fut: Future<Output = CoreResult<T>>,
    {
        let result = match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::Cache(format!(
                "durable tier did not answer within {}ms",
                limit.as_millis()
            ))),
        };
        self.mark_reachable(result.is_ok());
        result
    }

    fn mark_reachable(&self, reachable: bool) {
        let was = self.durable_reachable.swap(reachable, Ordering::Relaxed);
        if was != reachable {
            if reachable {
                info!("Durable cache tier reachable again");
            } else {
                warn!("Durable cache tier unreachable, serving from in-process tier");
            }
        }
    }

    /// Best-effort hit counter; never delays the caller
    fn bump_durable_hits(&self, store: &Arc<dyn DurableStore>, key: &str) {
        let store = Arc::clone(store);
        let hit_key = format!("{}{}", key, HITS_SUFFIX);
        let ttl = self.ttl;
        tokio::spawn(async move {
            if let Err(e) = store.incr_hits(&hit_key, ttl).await {
                debug!("Hit counter update failed: {}", e);
            }
        });
    }
}

/// Key with the hash cut to 8 chars, for logs
fn short(key: &str) -> &str {
    let end = key.rfind(':').map_or(key.len(), |i| (i + 9).min(key.len()));
    &key[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Recommendation;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// HashMap-backed stand-in for redis
    #[derive(Default)]
    struct FakeStore {
        data: Mutex<HashMap<String, String>>,
        fail_deletes: bool,
    }

    #[async_trait]
    impl DurableStore for FakeStore {
        async fn get(&self, key: &str) -> CoreResult<Option<String>> {
            Ok(self.data.lock().get(key).cloned())
        }

        async fn set_with_ttl(&self, key: &str, value: &str, _ttl: Duration) -> CoreResult<()> {
            self.data.lock().insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn incr_hits(&self, key: &str, _ttl: Duration) -> CoreResult<u64> {
            let mut data = self.data.lock();
            let count = data.get(key).and_then(|v| v.parse::<u64>().ok()).unwrap_or(0) + 1;
            data.insert(key.to_string(), count.to_string());
            Ok(count)
        }

        async fn delete_prefix(&self, prefix: &str) -> CoreResult<usize> {
            if self.fail_deletes {
                return Err(CoreError::Cache("NOPERM".into()));
            }
            let mut data = self.data.lock();
            let mut removed = 0;
            data.retain(|k, _| {
                let hit = k.starts_with(prefix);
                if hit && !k.ends_with(HITS_SUFFIX) {
                    removed += 1;
                }
                !hit
            });
            Ok(removed)
        }

        async fn ping(&self) -> CoreResult<()> {
            Ok(())
        }
    }

    /// Durable tier that is always down
    #[derive(Default)]
    struct FailingStore {
        reads: AtomicU64,
    }

    #[async_trait]
    impl DurableStore for FailingStore {
        async fn get(&self, _key: &str) -> CoreResult<Option<String>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::Cache("connection refused".into()))
        }

        async fn set_with_ttl(&self, _key: &str, _value: &str, _ttl: Duration) -> CoreResult<()> {
            Err(CoreError::Cache("connection refused".into()))
        }

        async fn incr_hits(&self, _key: &str, _ttl: Duration) -> CoreResult<u64> {
            Err(CoreError::Cache("connection refused".into()))
        }

        async fn delete_prefix(&self, _prefix: &str) -> CoreResult<usize> {
            Err(CoreError::Cache("connection refused".into()))
        }

        async fn ping(&self) -> CoreResult<()> {
            Err(CoreError::Cache("connection refused".into()))
        }
    }

    /// Durable tier that never answers
    struct HangingStore;

    #[async_trait]
    impl DurableStore for HangingStore {
        async fn get(&self, _key: &str) -> CoreResult<Option<String>> {
            futures::future::pending().await
        }

        async fn set_with_ttl(&self, _key: &str, _value: &str, _ttl: Duration) -> CoreResult<()> {
            futures::future::pending().await
        }

        async fn incr_hits(&self, _key: &str, _ttl: Duration) -> CoreResult<u64> {
            futures::future::pending().await
        }

        async fn delete_prefix(&self, _prefix: &str) -> CoreResult<usize> {
            futures::future::pending().await
        }

        async fn ping(&self) -> CoreResult<()> {
            futures::future::pending().await
        }
    }

    fn config() -> CacheConfig {
        CacheConfig {
            ttl_secs: 3600,
            max_memory_entries: 100,
            namespace: "test:answers".into(),
            durable_timeout_ms: 50,
            purge_timeout_ms: 100,
        }
    }

    fn payload(text: &str) -> AnswerPayload {
        AnswerPayload {
            answer_text: text.to_string(),
            confidence_score: 0.82,
            recommendation: Recommendation::Confident,
            citations: vec!["Reg 12(3)".into()],
            refusal_reason: None,
            topic: Some("filing".into()),
        }
    }

    #[tokio::test]
    async fn test_round_trip_ignores_case_punctuation_whitespace() {
        let cache = ResponseCache::new(&config(), None);
        let p = payload("Returns are due within 30 days.");
        cache.set("When is the return due?", &p).await;

        for q in [
            "When is the return due?",
            "when is the return due",
            "WHEN IS THE RETURN DUE!",
            "  when  is the   return due ",
        ] {
            assert_eq!(cache.get(q).await, Some(p.clone()), "question: {:?}", q);
        }
        assert_eq!(cache.get("What is the penalty?").await, None);

        let stats = cache.stats();
        assert_eq!(stats.hits_total, 4);
        assert_eq!(stats.misses_total, 1);
        assert!(!stats.durable_configured);
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let cache = ResponseCache::new(&config(), None).with_ttl(Duration::from_millis(20));
        cache.set("q", &payload("a")).await;
        assert!(cache.get("q").await.is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("q").await.is_none());
    }

    #[tokio::test]
    async fn test_failing_durable_tier_never_raises() {
        let cache = ResponseCache::new(&config(), Some(Arc::new(FailingStore::default())));
        let p = payload("a");

        cache.set("q", &p).await;
        assert_eq!(cache.get("q").await, Some(p));
        assert!(cache.get("other").await.is_none());

        let report = cache.invalidate_all().await;
        assert_eq!(report.memory_cleared, 1);
        assert_eq!(report.durable_cleared, 0);

        let stats = cache.stats();
        assert!(stats.durable_configured);
        assert!(!stats.durable_reachable);
    }

    #[tokio::test]
    async fn test_hanging_durable_tier_times_out_to_memory() {
        let cache = ResponseCache::new(&config(), Some(Arc::new(HangingStore)));
        let p = payload("a");

        cache.set("q", &p).await;
        assert_eq!(cache.get("q").await, Some(p));
        assert!(!cache.check_durable().await);
    }

    #[tokio::test]
    async fn test_invalidate_all_returns_when_purge_hangs() {
        let cache = ResponseCache::new(&config(), Some(Arc::new(HangingStore)));
        cache.set("q", &payload("a")).await;

        let report = tokio::time::timeout(Duration::from_secs(2), cache.invalidate_all())
            .await
            .expect("invalidate_all must not wait on a stalled durable tier");
        assert_eq!(report.memory_cleared, 1);
        assert_eq!(report.durable_cleared, 0);
        assert_eq!(report.version, 2);
        assert!(!cache.stats().durable_reachable);
    }

    #[tokio::test]
    async fn test_unreachable_durable_tier_is_not_read() {
        let store = Arc::new(FailingStore::default());
        let cache = ResponseCache::new(&config(), Some(store.clone() as Arc<dyn DurableStore>));

        assert!(cache.get("q").await.is_none());
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
        assert!(!cache.stats().durable_reachable);

        cache.set("q", &payload("a")).await;
        assert!(cache.get("q").await.is_some());
        assert!(cache.get("other").await.is_none());
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
    }

    /// Durable tier that can be taken down and brought back
    #[derive(Default)]
    struct FlakyStore {
        inner: FakeStore,
        down: AtomicBool,
        reads: AtomicU64,
    }

    impl FlakyStore {
        fn check(&self) -> CoreResult<()> {
            if self.down.load(Ordering::SeqCst) {
                return Err(CoreError::Cache("connection reset".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl DurableStore for FlakyStore {
        async fn get(&self, key: &str) -> CoreResult<Option<String>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            self.inner.get(key).await
        }

        async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> CoreResult<()> {
            self.check()?;
            self.inner.set_with_ttl(key, value, ttl).await
        }

        async fn incr_hits(&self, key: &str, ttl: Duration) -> CoreResult<u64> {
            self.check()?;
            self.inner.incr_hits(key, ttl).await
        }

        async fn delete_prefix(&self, prefix: &str) -> CoreResult<usize> {
            self.check()?;
            self.inner.delete_prefix(prefix).await
        }

        async fn ping(&self) -> CoreResult<()> {
            self.check()
        }
    }

    #[tokio::test]
    async fn test_durable_reads_resume_after_successful_ping() {
        let store = Arc::new(FlakyStore::default());
        store.down.store(true, Ordering::SeqCst);
        let cache = ResponseCache::new(&config(), Some(store.clone() as Arc<dyn DurableStore>));

        assert!(cache.get("q").await.is_none());
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);

        // Back up, and another process has written the entry
        store.down.store(false, Ordering::SeqCst);
        let other = ResponseCache::new(&config(), Some(store.clone() as Arc<dyn DurableStore>));
        other.set("q", &payload("a")).await;

        assert!(cache.get("q").await.is_none());
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);

        assert!(cache.check_durable().await);
        assert_eq!(cache.get("q").await, Some(payload("a")));
        assert_eq!(store.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_topic_scoped_entries_are_separate() {
        let cache = ResponseCache::new(&config(), None);
        cache
            .set_scoped("And for partnerships?", Some("annual returns"), &payload("returns"))
            .await;

        assert!(cache.get("And for partnerships?").await.is_none());
        assert!(cache
            .get_scoped("and for partnerships", Some("pollution permits"))
            .await
            .is_none());
        assert_eq!(
            cache.get_scoped("AND FOR PARTNERSHIPS", Some("Annual Returns")).await,
            Some(payload("returns"))
        );
    }

    #[tokio::test]
    async fn test_durable_hit_survives_process_restart() {
        let store = Arc::new(FakeStore::default());
        let first = ResponseCache::new(&config(), Some(store.clone() as Arc<dyn DurableStore>));
        let p = payload("a");
        first.set("q", &p).await;

        // Fresh in-process tier, same durable store
        let second = ResponseCache::new(&config(), Some(store.clone() as Arc<dyn DurableStore>));
        assert_eq!(second.get("q").await, Some(p));
        assert!(second.stats().durable_reachable);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let data = store.data.lock();
        let hits = data
            .iter()
            .find(|(k, _)| k.ends_with(":hits"))
            .map(|(_, v)| v.clone());
        assert_eq!(hits.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_invalidate_all_is_idempotent() {
        let store = Arc::new(FakeStore::default());
        let cache = ResponseCache::new(&config(), Some(store.clone() as Arc<dyn DurableStore>));
        cache.set("q1", &payload("a")).await;
        cache.set("q2", &payload("b")).await;

        let first = cache.invalidate_all().await;
        assert_eq!(first.memory_cleared, 2);
        assert_eq!(first.durable_cleared, 2);
        assert!(cache.get("q1").await.is_none());

        let second = cache.invalidate_all().await;
        assert_eq!(second.memory_cleared, 0);
        assert_eq!(second.durable_cleared, 0);
        assert_eq!(second.version, first.version + 1);
    }

    #[tokio::test]
    async fn test_invalidate_counts_entries_not_hit_counters() {
        let store = Arc::new(FakeStore::default());
        let cache = ResponseCache::new(&config(), Some(store.clone() as Arc<dyn DurableStore>));
        cache.set("q1", &payload("a")).await;
        cache.set("q2", &payload("b")).await;
        assert!(cache.get("q1").await.is_some());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.data.lock().len(), 3);

        let report = cache.invalidate_all().await;
        assert_eq!(report.durable_cleared, 2);
        assert!(store.data.lock().is_empty());
    }

    #[tokio::test]
    async fn test_version_bump_hides_entries_when_purge_fails() {
        let store = Arc::new(FakeStore {
            fail_deletes: true,
            ..Default::default()
        });
        let cache = ResponseCache::new(&config(), Some(store.clone() as Arc<dyn DurableStore>));
        cache.set("q", &payload("a")).await;

        let report = cache.invalidate_all().await;
        assert_eq!(report.durable_cleared, 0);
        assert_eq!(store.data.lock().len(), 1);

        assert!(cache.get("q").await.is_none());
    }
}
