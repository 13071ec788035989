use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Cancellable background loop owned by a store (TTL sweeps, stale dedup cleanup).
///
/// The loop ends when `stop()` is called, when the task is dropped, or when the
/// tick closure returns `false` (its owner is gone).
pub struct PeriodicTask {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (shutdown, mut rx) = watch::channel(false);
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !tick() {
                            debug!("Periodic task {} owner dropped, exiting", name);
                            break;
                        }
                    }
                    _ = rx.changed() => break,
                }
            }
        });

        info!("Started periodic task {} (every {:?})", name, period);

        Self {
            name,
            shutdown,
            handle: Some(handle),
        }
    }

    /// Signal the loop to exit and wait for it.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("Stopped periodic task {}", self.name);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_ticks_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let task = PeriodicTask::spawn("test", Duration::from_millis(10), move || {
            c.fetch_add(1, Ordering::SeqCst);
            true
        });

        tokio::time::sleep(Duration::from_millis(80)).await;
        task.stop().await;

        let seen = count.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected several ticks, got {}", seen);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_exits_when_tick_returns_false() {
        let task = PeriodicTask::spawn("owner-gone", Duration::from_millis(5), || false);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(task.is_finished());
    }
}
