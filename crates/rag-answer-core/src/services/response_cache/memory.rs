use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::models::AnswerPayload;

struct MemoryEntry {
    payload: AnswerPayload,
    expires_at: Instant,
    hits: AtomicU64,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process cache tier, bounded by entry count.
///
/// Over capacity, expired entries go first, then the entries closest to
/// expiry.
pub struct MemoryTier {
    entries: DashMap<String, MemoryEntry>,
    max_entries: usize,
    evict_lock: Mutex<()>,
}

impl MemoryTier {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            evict_lock: Mutex::new(()),
        }
    }

    pub fn get(&self, key: &str) -> Option<AnswerPayload> {
        let now = Instant::now();
        {
            let entry = self.entries.get(key)?;
            if !entry.is_expired(now) {
                entry.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.payload.clone());
            }
        }
        self.entries.remove_if(key, |_, e| e.is_expired(now));
        None
    }

    pub fn insert(&self, key: String, payload: AnswerPayload, ttl: Duration) {
        self.entries.insert(
            key,
            MemoryEntry {
                payload,
                expires_at: Instant::now() + ttl,
                hits: AtomicU64::new(0),
            },
        );

        if self.entries.len() > self.max_entries {
            self.evict();
        }
    }

    /// Remove everything. Returns how many entries were dropped.
    pub fn clear(&self) -> usize {
        let mut removed = 0usize;
        self.entries.retain(|_, _| {
            removed += 1;
            false
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self, key: &str) -> Option<u64> {
        self.entries.get(key).map(|e| e.hits.load(Ordering::Relaxed))
    }

    fn evict(&self) {
        let _guard = self.evict_lock.lock();
        let now = Instant::now();

        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        let purged = before.saturating_sub(self.entries.len());

        let overflow = self.entries.len().saturating_sub(self.max_entries);
        if overflow > 0 {
            let mut by_expiry: Vec<(String, Instant)> = self
                .entries
                .iter()
                .map(|e| (e.key().clone(), e.value().expires_at))
                .collect();
            by_expiry.sort_by_key(|(_, expires_at)| *expires_at);

            for (key, _) in by_expiry.into_iter().take(overflow) {
                self.entries.remove(&key);
            }
        }

        debug!(
            "Memory tier eviction: purged {} expired, evicted {} soonest-expiring",
            purged, overflow
        );
    }
}
