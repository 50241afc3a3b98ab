use crate::sharded_counter::ShardedCounter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Metrics for the view-recording hot path
#[derive(Debug, Default)]
pub struct ViewMetrics {
    /// Views that passed dedup and were buffered
    pub counted: ShardedCounter,
    /// Repeat views inside the dedup window
    pub duplicates: AtomicU64,
    /// Views lost to cache faults or timeouts
    pub dropped: AtomicU64,
    /// Events rejected for invalid input
    pub rejected: AtomicU64,
}

impl ViewMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_counted(&self) {
        self.counted.increment();
        trace!(view_op = "counted");
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
        trace!(view_op = "duplicate");
    }

    pub fn record_dropped(&self, reason: &str) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        debug!(view_op = "dropped", reason = reason);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        trace!(view_op = "rejected");
    }

    pub fn counted(&self) -> u64 {
        self.counted.sum()
    }

    /// Share of incoming events that were new views
    pub fn acceptance_rate(&self) -> f64 {
        let counted = self.counted();
        let total = counted
            + self.duplicates.load(Ordering::Relaxed)
            + self.dropped.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        (counted as f64 / total as f64) * 100.0
    }

    pub fn log_summary(&self) {
        info!(
            operation = "view_metrics_summary",
            counted = self.counted(),
            duplicates = self.duplicates.load(Ordering::Relaxed),
            dropped = self.dropped.load(Ordering::Relaxed),
            rejected = self.rejected.load(Ordering::Relaxed),
            acceptance_rate_pct = self.acceptance_rate(),
        );
    }
}

/// Metrics for flush cycles
#[derive(Debug, Default)]
pub struct FlushMetrics {
    /// Cycles that wrote at least one id
    pub cycles: AtomicU64,
    /// Cycles with nothing dirty
    pub empty_cycles: AtomicU64,
    /// Ticks skipped because a cycle was still running
    pub skipped_ticks: AtomicU64,
    /// Cycles whose durable write failed
    pub failures: AtomicU64,
    /// Failed cycles since the last success
    pub consecutive_failures: AtomicU64,
    /// Ids committed across all cycles
    pub ids_flushed: AtomicU64,
    /// Sum of committed deltas across all cycles
    pub delta_applied: AtomicU64,
    /// Total time spent in non-empty cycles (nanoseconds)
    pub total_latency_ns: AtomicU64,
}

impl FlushMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle(&self, ids: usize, delta: u64, latency: Duration) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.ids_flushed.fetch_add(ids as u64, Ordering::Relaxed);
        self.delta_applied.fetch_add(delta, Ordering::Relaxed);
        self.total_latency_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_empty(&self) {
        self.empty_cycles.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped_ticks.fetch_add(1, Ordering::Relaxed);
        debug!(flush_op = "tick_skipped");
    }

    /// Record a failed cycle, returning how many have failed in a row
    pub fn record_failure(&self) -> u64 {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Average duration of non-empty cycles in milliseconds
    pub fn avg_latency_ms(&self) -> f64 {
        let count = self.cycles.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total_ns = self.total_latency_ns.load(Ordering::Relaxed);
        (total_ns as f64 / count as f64) / 1_000_000.0
    }

    pub fn log_summary(&self) {
        info!(
            operation = "flush_metrics_summary",
            cycles = self.cycles.load(Ordering::Relaxed),
            empty_cycles = self.empty_cycles.load(Ordering::Relaxed),
            skipped_ticks = self.skipped_ticks.load(Ordering::Relaxed),
            failures = self.failures.load(Ordering::Relaxed),
            consecutive_failures = self.consecutive_failures(),
            ids_flushed = self.ids_flushed.load(Ordering::Relaxed),
            delta_applied = self.delta_applied.load(Ordering::Relaxed),
            avg_cycle_ms = self.avg_latency_ms(),
        );
    }
}

/// Metrics for durable store requests
#[derive(Debug, Default)]
pub struct StoreMetrics {
    pub request_count: AtomicU64,
    pub success_count: AtomicU64,
    pub failure_count: AtomicU64,
    pub retry_count: AtomicU64,
    /// Total time spent in store calls (nanoseconds)
    pub total_latency_ns: AtomicU64,
    pub circuit_breaker_opens: AtomicU64,
    pub circuit_breaker_closes: AtomicU64,
}

impl StoreMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, endpoint: &str) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        trace!(store_op = "request", endpoint = endpoint);
    }

    pub fn record_success(&self, endpoint: &str, latency: Duration) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
        trace!(
            store_op = "success",
            endpoint = endpoint,
            latency_ms = latency.as_millis() as u64
        );
    }

    pub fn record_failure(&self, endpoint: &str, error: &str) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        trace!(store_op = "failure", endpoint = endpoint, error = error);
    }

    pub fn record_retry(&self, endpoint: &str, attempt: u32) {
        self.retry_count.fetch_add(1, Ordering::Relaxed);
        debug!(store_op = "retry", endpoint = endpoint, attempt = attempt);
    }

    pub fn record_circuit_breaker_open(&self) {
        self.circuit_breaker_opens.fetch_add(1, Ordering::Relaxed);
        warn!(store_op = "circuit_breaker", state = "opened");
    }

    pub fn record_circuit_breaker_close(&self) {
        self.circuit_breaker_closes.fetch_add(1, Ordering::Relaxed);
        info!(store_op = "circuit_breaker", state = "closed");
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let count = self.success_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total_ns = self.total_latency_ns.load(Ordering::Relaxed);
        (total_ns as f64 / count as f64) / 1_000_000.0
    }

    /// Get success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        let total = self.request_count.load(Ordering::Relaxed);
        if total == 0 {
            return 100.0;
        }
        let success = self.success_count.load(Ordering::Relaxed);
        (success as f64 / total as f64) * 100.0
    }

    pub fn log_summary(&self) {
        info!(
            operation = "store_metrics_summary",
            total_requests = self.request_count.load(Ordering::Relaxed),
            successful = self.success_count.load(Ordering::Relaxed),
            failed = self.failure_count.load(Ordering::Relaxed),
            retries = self.retry_count.load(Ordering::Relaxed),
            success_rate_pct = self.success_rate(),
            avg_latency_ms = self.avg_latency_ms(),
        );
    }
}

/// Metrics for the read-path merger
#[derive(Debug, Default)]
pub struct MergeMetrics {
    pub merges: AtomicU64,
    pub ids_merged: AtomicU64,
    /// Ids that had a non-zero pending delta
    pub ids_with_pending: AtomicU64,
    /// Merges answered from persisted counts only because the cache failed
    pub fallbacks: AtomicU64,
}

impl MergeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_merge(&self, ids: usize, with_pending: usize) {
        self.merges.fetch_add(1, Ordering::Relaxed);
        self.ids_merged.fetch_add(ids as u64, Ordering::Relaxed);
        self.ids_with_pending
            .fetch_add(with_pending as u64, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn log_summary(&self) {
        info!(
            operation = "merge_metrics_summary",
            merges = self.merges.load(Ordering::Relaxed),
            ids_merged = self.ids_merged.load(Ordering::Relaxed),
            ids_with_pending = self.ids_with_pending.load(Ordering::Relaxed),
            fallbacks = self.fallbacks.load(Ordering::Relaxed),
        );
    }
}

/// Combined metrics for the entire engine
#[derive(Debug)]
pub struct Metrics {
    pub views: Arc<ViewMetrics>,
    pub flush: Arc<FlushMetrics>,
    pub store: Arc<StoreMetrics>,
    pub merge: Arc<MergeMetrics>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            views: Arc::new(ViewMetrics::new()),
            flush: Arc::new(FlushMetrics::new()),
            store: Arc::new(StoreMetrics::new()),
            merge: Arc::new(MergeMetrics::new()),
            start_time: Instant::now(),
        }
    }

    /// Log a complete metrics summary
    pub fn log_full_summary(&self) {
        info!("=== viewcount Metrics Summary ===");
        self.log_sections();
        info!("=================================");
    }

    /// Log periodic metrics summary (for background task)
    pub fn log_periodic(&self) {
        info!(
            uptime_secs = self.elapsed().as_secs(),
            "--- viewcount Metrics (periodic) ---"
        );
        self.log_sections();
    }

    fn log_sections(&self) {
        self.views.log_summary();
        self.flush.log_summary();
        self.store.log_summary();
        self.merge.log_summary();
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Create a periodic logging background task
    pub fn spawn_periodic_logging(
        self: &Arc<Self>,
        interval_secs: u64,
        stop: Arc<std::sync::atomic::AtomicBool>,
    ) -> tokio::task::JoinHandle<()> {
        let metrics = Arc::clone(self);
        tokio::spawn(async move {
            use tokio::time::{interval, Duration};

            let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;

                if stop.load(std::sync::atomic::Ordering::Relaxed) {
                    break;
                }

                metrics.log_periodic();
            }
        })
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
