//! Periodic reconciliation of pending deltas into the durable store.

use crate::error::{ViewCountError, ViewCountResult};
use crate::metrics::FlushMetrics;
use crate::pending::PendingCounterStore;
use crate::store::ViewCountStore;
use crate::types::{ContentId, FlushReport};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Default time between flush cycles
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Resets the in-flight flag when a cycle ends, however it ends.
struct FlushingGuard<'a>(&'a AtomicBool);

impl<'a> FlushingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlushingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drains the dirty set into the durable store, one bulk write per cycle.
///
/// At most one cycle runs at a time. A tick that finds a cycle in flight is
/// dropped rather than queued; the next tick picks up whatever is still dirty.
pub struct FlushScheduler {
    pending: Arc<PendingCounterStore>,
    store: Arc<dyn ViewCountStore>,
    interval: Duration,
    timeout: Duration,
    alert_after_failures: u64,
    metrics: Arc<FlushMetrics>,
    flushing: AtomicBool,
}

impl FlushScheduler {
    pub fn new(
        pending: Arc<PendingCounterStore>,
        store: Arc<dyn ViewCountStore>,
        interval: Duration,
        timeout: Duration,
        alert_after_failures: u64,
        metrics: Arc<FlushMetrics>,
    ) -> Self {
        Self {
            pending,
            store,
            interval,
            timeout,
            alert_after_failures: alert_after_failures.max(1),
            metrics,
            flushing: AtomicBool::new(false),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    /// Run one flush cycle now.
    ///
    /// Returns a skipped report if another cycle holds the flag. On `Err`
    /// nothing was cleared and every snapshotted id is still dirty.
    pub async fn flush_once(&self) -> ViewCountResult<FlushReport> {
        let Some(_guard) = FlushingGuard::acquire(&self.flushing) else {
            self.metrics.record_skipped();
            return Ok(FlushReport::skipped());
        };

        let start = Instant::now();
        match self.run_cycle().await {
            Ok(report) => {
                if report.is_noop() {
                    self.metrics.record_empty();
                } else {
                    self.metrics
                        .record_cycle(report.flushed.len(), report.total_delta, start.elapsed());
                }
                Ok(report)
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    async fn run_cycle(&self) -> ViewCountResult<FlushReport> {
        let snapshot = self.pending.snapshot_dirty().await?;
        if snapshot.is_empty() {
            debug!(operation = "flush", "nothing dirty");
            return Ok(FlushReport::default());
        }

        let mut batch: Vec<(ContentId, u64)> = snapshot.iter().map(|(id, d)| (*id, *d)).collect();
        batch.sort_unstable_by_key(|(id, _)| *id);

        let committed = tokio::time::timeout(self.timeout, self.store.add_view_counts(&batch))
            .await
            .map_err(|_| {
                ViewCountError::TimedOut(format!("durable write of {} ids", batch.len()))
            })??;

        let committed: HashSet<ContentId> = committed.into_iter().collect();
        let flushed: HashMap<ContentId, u64> = snapshot
            .iter()
            .filter(|(id, _)| committed.contains(id))
            .map(|(id, d)| (*id, *d))
            .collect();

        if let Err(e) = self.pending.clear_flushed(&flushed).await {
            // Store already holds these deltas; leaving them dirty writes them twice.
            error!(
                operation = "flush",
                ids = flushed.len(),
                error = %e,
                "durable write committed but pending deltas could not be cleared"
            );
            return Err(e);
        }

        let report = FlushReport {
            skipped: false,
            flushed: batch
                .iter()
                .filter(|(id, _)| committed.contains(id))
                .map(|(id, _)| *id)
                .collect(),
            total_delta: flushed.values().sum(),
            retained: batch
                .iter()
                .filter(|(id, _)| !committed.contains(id))
                .map(|(id, _)| *id)
                .collect(),
        };

        info!(
            operation = "flush",
            ids_flushed = report.flushed.len(),
            total_delta = report.total_delta,
            ids_retained = report.retained.len(),
            "flush cycle complete"
        );
        if !report.retained.is_empty() {
            warn!(
                operation = "flush",
                ids_retained = report.retained.len(),
                "store committed a partial batch, remaining ids stay dirty"
            );
        }
        Ok(report)
    }

    fn record_failure(&self, e: &ViewCountError) {
        let consecutive = self.metrics.record_failure();
        if consecutive >= self.alert_after_failures {
            error!(
                operation = "flush",
                consecutive_failures = consecutive,
                error = %e,
                "flush keeps failing, pending deltas are accumulating"
            );
        } else {
            warn!(
                operation = "flush",
                consecutive_failures = consecutive,
                error = %e,
                "flush cycle failed, deltas stay dirty"
            );
        }
    }

    /// Start the recurring job. Each tick spawns its own cycle so a slow store
    /// shows up as skipped ticks instead of a stalled timer.
    pub fn spawn(self: &Arc<Self>) -> FlushHandle {
        let scheduler = Arc::clone(self);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let join = tokio::spawn(async move {
            info!(
                operation = "flush_scheduler",
                interval_secs = scheduler.interval.as_secs(),
                "flush scheduler started"
            );
            let mut ticker = tokio::time::interval(scheduler.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;

                    _ = &mut shutdown_rx => {
                        info!(operation = "flush_scheduler", "flush scheduler received shutdown signal");
                        break;
                    }

                    _ = ticker.tick() => {
                        let scheduler = Arc::clone(&scheduler);
                        tokio::spawn(async move {
                            // Errors are logged and counted inside flush_once
                            let _ = scheduler.flush_once().await;
                        });
                    }
                }
            }
        });

        FlushHandle {
            join: Some(join),
            shutdown_tx: Some(shutdown_tx),
        }
    }
}

/// Handle to a running flush loop.
pub struct FlushHandle {
    join: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl FlushHandle {
    /// Stop the timer and wait for the loop to exit. A cycle already in
    /// flight keeps running on its own task.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                warn!(operation = "flush_scheduler", error = %e, "flush loop ended abnormally");
            }
        }
    }
}

impl Drop for FlushHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
