//! Circuit breaker guarding calls to remote dependencies (retrieval, model).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::utils::error::{CoreError, CoreResult};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Requests are rejected without touching the dependency
    Open,
    /// A limited number of trial requests are let through
    HalfOpen,
}

/// Read-only snapshot for operators.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u64,
    pub half_open_attempts: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u64,
    half_open_attempts: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    half_open_since: Option<Instant>,
}

impl BreakerInner {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            half_open_attempts: 0,
            last_failure: None,
            last_failure_at: None,
            half_open_since: None,
        }
    }
}

/// Failure-isolation state machine for one named dependency.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::closed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `operation` through the breaker.
    ///
    /// The closure is not invoked at all while the circuit rejects calls. The
    /// returned future runs as its own task under `call_timeout`; on timeout the
    /// caller stops waiting but the task is left to finish on its own.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> CoreResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.try_acquire()?;

        let result = self.call_with_timeout(operation()).await;
        match &result {
            Ok(_) => self.record_success(),
            Err(e) => self.record_failure(e),
        }
        result
    }

    /// Like `execute`, but hands any failure (including a rejection) to
    /// `fallback`, which may recover with a value or re-raise.
    pub async fn execute_with_fallback<F, Fut, T, FB>(&self, operation: F, fallback: FB) -> CoreResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<T>> + Send + 'static,
        T: Send + 'static,
        FB: FnOnce(CoreError) -> CoreResult<T>,
    {
        match self.execute(operation).await {
            Ok(value) => Ok(value),
            Err(e) => {
                debug!("Circuit {} invoking fallback after: {}", self.name, e);
                fallback(e)
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn stats(&self) -> CircuitStats {
        let inner = self.inner.lock();
        CircuitStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            half_open_attempts: inner.half_open_attempts,
            last_failure_at: inner.last_failure_at,
        }
    }

    /// Force CLOSED with zero counters (operator recovery).
    pub fn reset(&self) {
        *self.inner.lock() = BreakerInner::closed();
        info!("Circuit {} manually reset to CLOSED", self.name);
    }

    /// Admission check. Performs the OPEN -> HALF_OPEN transition when the
    /// reset timeout has elapsed.
    fn try_acquire(&self) -> CoreResult<()> {
        let reset_timeout = self.config.reset_timeout();
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure
                    .map(|t| t.elapsed() >= reset_timeout)
                    .unwrap_or(true);
                if !cooled_down {
                    return Err(self.rejected());
                }
                inner.state = CircuitState::HalfOpen;
                inner.half_open_attempts = 1;
                inner.half_open_since = Some(Instant::now());
                info!("Circuit {} HALF_OPEN, admitting trial call", self.name);
                Ok(())
            }
            CircuitState::HalfOpen => {
                if inner.half_open_attempts < self.config.half_open_max_attempts {
                    inner.half_open_attempts += 1;
                    return Ok(());
                }
                // Budget spent with no verdict yet; a fresh window opens once
                // the reset timeout has passed again.
                let window_expired = inner
                    .half_open_since
                    .map(|t| t.elapsed() >= reset_timeout)
                    .unwrap_or(true);
                if window_expired {
                    inner.half_open_attempts = 1;
                    inner.half_open_since = Some(Instant::now());
                    debug!("Circuit {} starting new half-open window", self.name);
                    Ok(())
                } else {
                    Err(self.rejected())
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.success_count += 1;
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.half_open_attempts = 0;
                inner.half_open_since = None;
                info!("Circuit {} CLOSED after successful trial call", self.name);
            }
            // Late result of a call admitted before the circuit opened
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self, error: &CoreError) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());

        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    warn!(
                        circuit = %self.name,
                        failures = inner.failure_count,
                        reset_timeout_ms = self.config.reset_timeout_ms,
                        "Circuit OPEN after {} consecutive failures (last: {})",
                        inner.failure_count,
                        error
                    );
                } else {
                    debug!(
                        "Circuit {} failure {}/{}: {}",
                        self.name, inner.failure_count, self.config.failure_threshold, error
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.half_open_attempts = 0;
                inner.half_open_since = None;
                warn!(circuit = %self.name, "Circuit re-OPENED, trial call failed: {}", error);
            }
            CircuitState::Open => {}
        }
    }

    async fn call_with_timeout<Fut, T>(&self, fut: Fut) -> CoreResult<T>
    where
        Fut: Future<Output = CoreResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let timeout: Duration = self.config.call_timeout();
        let handle = tokio::spawn(fut);

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(CoreError::Internal(format!(
                "{} call aborted: {}",
                self.name, join_err
            ))),
            Err(_) => {
                warn!(
                    circuit = %self.name,
                    "Call timed out after {}ms, no longer waiting",
                    timeout.as_millis()
                );
                Err(CoreError::Timeout {
                    dependency: self.name.clone(),
                    after_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    fn rejected(&self) -> CoreError {
        CoreError::CircuitOpen {
            dependency: self.name.clone(),
        }
    }
}

/// One breaker per dependency name, created on first use.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.config.clone())))
            .clone()
    }

    /// Stats for every known dependency, ordered by name
    pub fn stats(&self) -> Vec<CircuitStats> {
        let mut stats: Vec<CircuitStats> = self.breakers.iter().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.iter() {
            breaker.reset();
        }
    }
}
