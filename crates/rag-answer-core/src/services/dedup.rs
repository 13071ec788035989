//! Collapses concurrent identical requests into one shared execution.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::DedupConfig;
use crate::utils::error::{CoreError, CoreResult};
use crate::utils::normalize::question_hash;
use crate::utils::periodic::PeriodicTask;

type SharedResult<T> = Shared<BoxFuture<'static, CoreResult<T>>>;

/// An outstanding deduplicated request
struct PendingRequest<T> {
    id: u64,
    future: SharedResult<T>,
    started_at: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct DedupStats {
    pub in_flight: usize,
    pub executions_total: u64,
    pub joins_total: u64,
}

pub struct RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pending: Arc<DashMap<String, PendingRequest<T>>>,
    next_id: AtomicU64,
    stale_after: Duration,
    executions: AtomicU64,
    joins: AtomicU64,
    sweeper: Mutex<Option<PeriodicTask>>,
}

impl<T> RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(stale_after: Duration) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
            stale_after,
            executions: AtomicU64::new(0),
            joins: AtomicU64::new(0),
            sweeper: Mutex::new(None),
        }
    }

    /// Build the deduplicator and start its stale-entry sweep. Needs a tokio runtime.
    pub fn spawn(config: &DedupConfig) -> Arc<Self> {
        let dedup = Arc::new(Self::new(Duration::from_secs(config.stale_after_secs)));
        dedup.start_sweeper(Duration::from_secs(config.sweep_interval_secs.max(1)));
        dedup
    }

    pub fn start_sweeper(self: &Arc<Self>, every: Duration) {
        let weak = Arc::downgrade(self);
        let task = PeriodicTask::spawn("dedup-stale-sweep", every, move || match weak.upgrade() {
            Some(dedup) => {
                dedup.sweep_stale();
                true
            }
            None => false,
        });
        *self.sweeper.lock() = Some(task);
    }

    pub async fn shutdown(&self) {
        let task = self.sweeper.lock().take();
        if let Some(task) = task {
            task.stop().await;
        }
    }

    /// Run `operation` unless an identical request (after normalization of
    /// `key_text`) is already in flight, in which case join that one.
    pub async fn run<F, Fut>(&self, key_text: &str, operation: F) -> CoreResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CoreResult<T>> + Send + 'static,
    {
        self.run_keyed(question_hash(key_text), operation).await.0
    }

    /// Like `run`, for a caller-built key. The flag is `true` when this
    /// caller joined an execution started by someone else.
    ///
    /// Lookup and registration happen under one map entry lock. `operation`
    /// is only called from the spawned task, after that lock is released, so
    /// it may use the deduplicator itself. The work removes its registration
    /// before its result becomes visible, so a caller arriving after
    /// completion always starts fresh.
    pub async fn run_keyed<F, Fut>(&self, key: String, operation: F) -> (CoreResult<T>, bool)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CoreResult<T>> + Send + 'static,
    {
        let (shared, joined) = match self.pending.entry(key.clone()) {
            Entry::Occupied(entry) => {
                self.joins.fetch_add(1, Ordering::Relaxed);
                debug!("Joining in-flight request {}", short(&key));
                (entry.get().future.clone(), true)
            }
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let pending = Arc::clone(&self.pending);

                let task_key = key.clone();
                let handle = tokio::spawn(async move {
                    let result = operation().await;
                    pending.remove_if(&task_key, |_, p| p.id == id);
                    result
                });

                let future = async move {
                    handle.await.unwrap_or_else(|e| {
                        Err(CoreError::Internal(format!("deduplicated request failed: {}", e)))
                    })
                }
                .boxed()
                .shared();

                slot.insert(PendingRequest {
                    id,
                    future: future.clone(),
                    started_at: Instant::now(),
                });
                self.executions.fetch_add(1, Ordering::Relaxed);
                (future, false)
            }
        };

        (shared.await, joined)
    }

    /// Drop registrations older than the staleness window. Callers already
    /// waiting on them are unaffected; new callers start fresh work.
    pub fn sweep_stale(&self) -> usize {
        let stale_after = self.stale_after;
        let mut removed = 0usize;
        self.pending.retain(|_, p| {
            let keep = p.started_at.elapsed() < stale_after;
            if !keep {
                removed += 1;
            }
            keep
        });

        if removed > 0 {
            warn!("Removed {} stale in-flight registrations", removed);
        }
        removed
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> DedupStats {
        DedupStats {
            in_flight: self.in_flight(),
            executions_total: self.executions.load(Ordering::Relaxed),
            joins_total: self.joins.load(Ordering::Relaxed),
        }
    }
}

fn short(key: &str) -> &str {
    &key[..key.len().min(12)]
}

impl<T> Drop for RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        let outstanding = self.pending.len();
        if outstanding > 0 {
            info!("Deduplicator dropped with {} requests in flight", outstanding);
        }
    }
}
