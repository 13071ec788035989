use anyhow::Result;
use async_trait::async_trait;
use flume::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::types::{ActivityLog, ActivityStatus};
use crate::config::ActivityLogConfig;

/// Destination for batches of activity records
#[async_trait]
pub trait ActivitySink: Send + Sync + 'static {
    /// Persist a batch, returning how many records were written
    async fn write_batch(&self, batch: &[ActivityLog]) -> Result<usize>;
}

/// Emits each record as a structured `tracing` event
pub struct TracingSink;

#[async_trait]
impl ActivitySink for TracingSink {
    async fn write_batch(&self, batch: &[ActivityLog]) -> Result<usize> {
        for log in batch {
            let fields = serde_json::to_string(log)?;
            match log.activity_status {
                ActivityStatus::Error => warn!(
                    target: "activity",
                    activity = log.activity_type.as_str(),
                    status = log.activity_status.as_str(),
                    session_id = %log.session_id,
                    request_id = %log.request_id,
                    "{}",
                    fields
                ),
                _ => info!(
                    target: "activity",
                    activity = log.activity_type.as_str(),
                    status = log.activity_status.as_str(),
                    session_id = %log.session_id,
                    request_id = %log.request_id,
                    "{}",
                    fields
                ),
            }
        }
        Ok(batch.len())
    }
}

/// Async activity logger with queue mechanism
#[derive(Clone)]
pub struct ActivityLogger {
    sender: Sender<ActivityLog>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl ActivityLogger {
    /// Initialize logger with background workers. Needs a tokio runtime.
    pub fn new(sink: Arc<dyn ActivitySink>, config: &ActivityLogConfig) -> Self {
        let (sender, receiver) = bounded(config.queue_capacity.max(1));

        info!(
            "Initializing ActivityLogger: queue={}, batch={}, timeout={}ms, workers={}",
            config.queue_capacity, config.batch_size, config.batch_timeout_ms, config.worker_count
        );

        let batch_size = config.batch_size.max(1);
        let batch_timeout = Duration::from_millis(config.batch_timeout_ms.max(1));
        let workers = (0..config.worker_count.max(1))
            .map(|worker_id| {
                let sink = Arc::clone(&sink);
                let receiver = receiver.clone();
                tokio::spawn(async move {
                    Self::worker_loop(worker_id, sink, receiver, batch_size, batch_timeout).await;
                })
            })
            .collect();

        Self {
            sender,
            workers: Arc::new(Mutex::new(workers)),
        }
    }

    /// Logger that writes through `tracing`
    pub fn tracing(config: &ActivityLogConfig) -> Self {
        Self::new(Arc::new(TracingSink), config)
    }

    /// Log activity (non-blocking, fire-and-forget)
    pub fn log(&self, activity: ActivityLog) {
        if let Err(e) = self.sender.try_send(activity) {
            warn!("Failed to enqueue activity log (queue full?): {}", e);
        }
    }

    /// Close this handle's side of the queue and wait for the workers to
    /// drain it. Workers only exit once every clone has been dropped.
    pub async fn shutdown(self) {
        let workers = std::mem::take(&mut *self.workers.lock());
        drop(self);
        for handle in workers {
            if let Err(e) = handle.await {
                error!("Activity logger worker ended abnormally: {}", e);
            }
        }
    }

    /// Worker loop - processes logs in batches
    async fn worker_loop(
        worker_id: usize,
        sink: Arc<dyn ActivitySink>,
        receiver: Receiver<ActivityLog>,
        batch_size: usize,
        batch_timeout: Duration,
    ) {
        debug!("Activity logger worker {} started", worker_id);
        let mut batch: Vec<ActivityLog> = Vec::with_capacity(batch_size);

        loop {
            // Block for the first record, then collect until full or timed out
            match receiver.recv_async().await {
                Ok(log) => batch.push(log),
                Err(_) => break,
            }

            let deadline = tokio::time::Instant::now() + batch_timeout;
            let mut closed = false;
            while batch.len() < batch_size {
                match tokio::time::timeout_at(deadline, receiver.recv_async()).await {
                    Ok(Ok(log)) => batch.push(log),
                    Ok(Err(_)) => {
                        closed = true;
                        break;
                    }
                    Err(_) => break,
                }
            }

            Self::flush_batch(sink.as_ref(), &batch, worker_id).await;
            batch.clear();

            if closed {
                break;
            }
        }

        debug!("Activity logger worker {} shutting down (channel closed)", worker_id);
    }

    async fn flush_batch(sink: &dyn ActivitySink, batch: &[ActivityLog], worker_id: usize) {
        let start = std::time::Instant::now();
        match sink.write_batch(batch).await {
            Ok(written) => debug!(
                "Worker {} wrote {} activity logs in {:?}",
                worker_id,
                written,
                start.elapsed()
            ),
            Err(e) => error!("Worker {} failed to write activity batch: {}", worker_id, e),
        }
    }

    /// Get queue statistics (for monitoring)
    pub fn queue_len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_queue_full(&self) -> bool {
        self.sender.is_full()
    }
}
