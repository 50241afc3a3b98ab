//! Wiring of the recorder, flush scheduler and merger over one shared cache.

use crate::cache::{CacheKeys, CounterCache, MemoryCounterCache, RedisCounterCache};
use crate::config::{CacheBackend, Config};
use crate::dedup::DedupGate;
use crate::error::{ViewCountError, ViewCountResult};
use crate::flush::{FlushHandle, FlushScheduler};
use crate::identity::{self, VisitorDescriptor};
use crate::merge::ReadPathMerger;
use crate::metrics::Metrics;
use crate::pending::PendingCounterStore;
use crate::recorder::ViewRecorder;
use crate::store::http::HttpStoreOptions;
use crate::store::{HttpViewCountStore, ViewCountStore};
use crate::types::{ContentId, FlushReport, RecordOutcome};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Minimum time allowed for the first cache connection
const MIN_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
/// Pause between attempts to run the final flush while a tick's cycle finishes
const FINAL_FLUSH_POLL: Duration = Duration::from_millis(50);

struct BackgroundTasks {
    flush: FlushHandle,
    metrics_stop: Arc<AtomicBool>,
    metrics_task: Option<JoinHandle<()>>,
}

/// Entry point for callers: record views, read displayed counts, and run the
/// background flush.
///
/// Recording and merging never fail because of cache faults; those surface as
/// [`RecordOutcome::Dropped`] and as persisted-only counts. Only
/// [`displayed_counts`](Self::displayed_counts) can fail, when the durable
/// store itself cannot be read.
pub struct ViewCountEngine {
    recorder: ViewRecorder,
    merger: ReadPathMerger,
    scheduler: Arc<FlushScheduler>,
    store: Arc<dyn ViewCountStore>,
    metrics: Arc<Metrics>,
    config: Config,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl ViewCountEngine {
    /// Validate `config`, connect the configured cache backend and build the
    /// HTTP store adapter.
    pub async fn from_config(config: Config) -> ViewCountResult<Self> {
        config.validate()?;
        let metrics = Arc::new(Metrics::new());

        let cache: Arc<dyn CounterCache> = match config.cache.backend {
            CacheBackend::Redis => Arc::new(
                RedisCounterCache::connect(
                    &config.cache.url,
                    CacheKeys::new(config.cache.key_prefix.clone()),
                    config.cache.pool_max_size,
                    config.cache.op_timeout().max(MIN_CONNECT_TIMEOUT),
                )
                .await?,
            ),
            CacheBackend::Memory => {
                info!(
                    operation = "cache_connect",
                    max_markers = config.cache.max_markers,
                    "Using in-process cache; counts are not shared between instances"
                );
                Arc::new(MemoryCounterCache::new(config.cache.max_markers))
            }
        };

        let options = HttpStoreOptions {
            request_timeout: config.store.request_timeout(),
            max_retries: config.store.max_retries,
            auth_credentials: config.store.credentials(),
            breaker_threshold: config.store.circuit_breaker_threshold,
            breaker_cooldown: Duration::from_secs(config.store.circuit_breaker_cooldown_secs),
            ..HttpStoreOptions::default()
        };
        let store: Arc<dyn ViewCountStore> = Arc::new(HttpViewCountStore::new(
            config.store.url.clone(),
            options,
            Arc::clone(&metrics.store),
        )?);

        Ok(Self::with_components(config, cache, store, metrics))
    }

    /// Build an engine over caller-supplied backends.
    pub fn with_components(
        config: Config,
        cache: Arc<dyn CounterCache>,
        store: Arc<dyn ViewCountStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let op_timeout = config.cache.op_timeout();
        let pending = Arc::new(PendingCounterStore::new(Arc::clone(&cache), op_timeout));
        let gate = DedupGate::new(
            cache,
            CacheKeys::new(config.cache.key_prefix.clone()),
            op_timeout,
        );

        let recorder = ViewRecorder::new(
            gate,
            Arc::clone(&pending),
            config.dedup.ttl(),
            Arc::clone(&metrics.views),
        );
        let merger = ReadPathMerger::new(Arc::clone(&pending), Arc::clone(&metrics.merge));
        let scheduler = Arc::new(FlushScheduler::new(
            pending,
            Arc::clone(&store),
            config.flush.interval(),
            config.flush.timeout(),
            config.flush.alert_after_failures,
            Arc::clone(&metrics.flush),
        ));

        Self {
            recorder,
            merger,
            scheduler,
            store,
            metrics,
            config,
            tasks: Mutex::new(None),
        }
    }

    /// Record one view. Only a zero content id is an error; cache faults
    /// come back as `Ok(Dropped)`.
    pub async fn record_view(
        &self,
        content_id: u64,
        visitor: &VisitorDescriptor,
    ) -> ViewCountResult<RecordOutcome> {
        let content_id = ContentId::new(content_id).map_err(|e| {
            self.metrics.views.record_rejected();
            e
        })?;
        let visitor_id = identity::resolve(visitor);
        self.recorder
            .record_view_best_effort(content_id, &visitor_id)
            .await
    }

    /// Persisted counts for `ids` plus their pending deltas, in input order.
    /// Ids the store does not know read as zero persisted views. A failed
    /// store read is returned as is; pending deltas alone are not a count.
    pub async fn displayed_counts(
        &self,
        ids: &[ContentId],
    ) -> ViewCountResult<Vec<(ContentId, u64)>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let persisted = self.store.view_counts(ids).await?;
        let items: Vec<(ContentId, u64)> = ids
            .iter()
            .map(|id| (*id, persisted.get(id).copied().unwrap_or(0)))
            .collect();
        Ok(self.merger.merge_or_persisted(&items).await)
    }

    /// Merge pending deltas into counts the caller already loaded.
    pub async fn merge(&self, items: &[(ContentId, u64)]) -> ViewCountResult<Vec<(ContentId, u64)>> {
        self.merger.merge(items).await
    }

    /// Like [`merge`](Self::merge), falling back to `items` on cache faults.
    pub async fn merge_or_persisted(&self, items: &[(ContentId, u64)]) -> Vec<(ContentId, u64)> {
        self.merger.merge_or_persisted(items).await
    }

    /// Run a flush cycle immediately, outside the timer.
    pub async fn flush_now(&self) -> ViewCountResult<FlushReport> {
        self.scheduler.flush_once().await
    }

    /// Start the flush loop and, if enabled, periodic metrics logging.
    /// Calling it again while running does nothing.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_some() {
            debug!(operation = "engine_start", "background tasks already running");
            return;
        }

        let flush = self.scheduler.spawn();
        let metrics_stop = Arc::new(AtomicBool::new(false));
        let metrics_task = self.config.logging.metrics_enabled.then(|| {
            self.metrics.spawn_periodic_logging(
                self.config.logging.metrics_interval_secs,
                Arc::clone(&metrics_stop),
            )
        });

        info!(
            operation = "engine_start",
            flush_interval_secs = self.config.flush.interval_secs,
            dedup_ttl_secs = self.config.dedup.ttl_secs,
            "view-count engine started"
        );
        *tasks = Some(BackgroundTasks {
            flush,
            metrics_stop,
            metrics_task,
        });
    }

    /// Stop background tasks, run one last flush, and log a metrics summary.
    ///
    /// Returns the final cycle's report. Waits up to one flush timeout for a
    /// cycle already in flight before giving up with `TimedOut`.
    pub async fn shutdown(&self) -> ViewCountResult<FlushReport> {
        let tasks = self.tasks.lock().await.take();
        if let Some(tasks) = tasks {
            tasks.flush.stop().await;
            tasks.metrics_stop.store(true, Ordering::Relaxed);
            if let Some(task) = tasks.metrics_task {
                task.abort();
            }
        }

        let result = tokio::time::timeout(self.config.flush.timeout(), async {
            loop {
                let report = self.scheduler.flush_once().await?;
                if !report.skipped {
                    return Ok::<_, ViewCountError>(report);
                }
                tokio::time::sleep(FINAL_FLUSH_POLL).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            Err(ViewCountError::TimedOut(
                "final flush waiting for in-flight cycle".to_string(),
            ))
        });

        match &result {
            Ok(report) => info!(
                operation = "engine_shutdown",
                ids_flushed = report.flushed.len(),
                total_delta = report.total_delta,
                "final flush complete"
            ),
            Err(e) => warn!(
                operation = "engine_shutdown",
                error = %e,
                "final flush failed, deltas remain in the cache"
            ),
        }
        self.metrics.log_full_summary();
        result
    }

    pub fn recorder(&self) -> &ViewRecorder {
        &self.recorder
    }

    pub fn merger(&self) -> &ReadPathMerger {
        &self.merger
    }

    pub fn scheduler(&self) -> &Arc<FlushScheduler> {
        &self.scheduler
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
