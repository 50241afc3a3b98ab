use crate::metrics::StoreMetrics;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    opened_at: Option<Instant>,
}

/// Stops hammering a durable store that keeps failing.
///
/// After `failure_threshold` consecutive failures the circuit opens and calls
/// fail fast for `cooldown`; the next call after that is let through as a probe.
/// The lock is never held across an await.
pub struct CircuitBreaker {
    inner: Mutex<BreakerState>,
    failure_count: AtomicU32,
    failure_threshold: u32,
    cooldown: Duration,
    metrics: Option<Arc<StoreMetrics>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                opened_at: None,
            }),
            failure_count: AtomicU32::new(0),
            failure_threshold: failure_threshold.max(1),
            cooldown,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<StoreMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.cooldown)
                    .unwrap_or(true);
                if cooled {
                    inner.state = CircuitState::HalfOpen;
                    debug!("Circuit breaker half-open, probing store");
                }
                cooled
            }
        }
    }

    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
            if let Some(metrics) = &self.metrics {
                metrics.record_circuit_breaker_close();
            }
        }
    }

    pub fn record_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut inner = self.lock();
        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => count >= self.failure_threshold,
            CircuitState::Open => false,
        };
        if should_open {
            warn!(consecutive_failures = count, "Circuit breaker opened");
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            if let Some(metrics) = &self.metrics {
                metrics.record_circuit_breaker_open();
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }
}
