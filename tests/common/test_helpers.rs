//! Shared builders for engine-level tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use viewcount::cache::{Clock, CounterCache, ManualClock};
use viewcount::config::CacheBackend;
use viewcount::{
    Config, ContentId, MemoryCounterCache, MemoryViewCountStore, Metrics, ViewCountEngine,
    ViewCountError, ViewCountResult, ViewCountStore, VisitorDescriptor,
};

pub fn id(raw: u64) -> ContentId {
    ContentId::new(raw).unwrap()
}

pub fn visitor(name: &str) -> VisitorDescriptor {
    VisitorDescriptor::authenticated(name)
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.cache.backend = CacheBackend::Memory;
    config.cache.key_prefix = "test".to_string();
    config.flush.interval_secs = 1;
    config.flush.timeout_secs = 2;
    config.store.request_timeout_secs = 2;
    config.logging.metrics_enabled = false;
    config
}

/// Engine over in-memory backends with a hand-driven dedup clock.
pub struct TestEngine {
    pub engine: ViewCountEngine,
    pub cache: Arc<MemoryCounterCache>,
    pub clock: Arc<ManualClock>,
    pub metrics: Arc<Metrics>,
}

impl TestEngine {
    pub fn new(store: Arc<dyn ViewCountStore>) -> Self {
        Self::with_config(test_config(), store)
    }

    pub fn with_config(config: Config, store: Arc<dyn ViewCountStore>) -> Self {
        let clock = Arc::new(ManualClock::new());
        let cache = Arc::new(MemoryCounterCache::with_clock(
            config.cache.max_markers,
            Arc::clone(&clock) as Arc<dyn Clock>,
        ));
        let metrics = Arc::new(Metrics::new());
        let engine = ViewCountEngine::with_components(
            config,
            Arc::clone(&cache) as Arc<dyn CounterCache>,
            store,
            Arc::clone(&metrics),
        );
        Self {
            engine,
            cache,
            clock,
            metrics,
        }
    }

    pub async fn pending(&self, raw: u64) -> u64 {
        self.engine
            .merge(&[(id(raw), 0)])
            .await
            .unwrap()
            .first()
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }
}

/// In-memory store whose writes and reads can be switched to fail, and which can commit
/// only a chosen subset of a batch.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryViewCountStore,
    pub failing: AtomicBool,
    pub reject: std::sync::Mutex<Vec<ContentId>>,
    pub attempts: AtomicU64,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Leave these ids out of the committed set on the next writes.
    pub fn reject_ids(&self, ids: &[ContentId]) {
        *self.reject.lock().unwrap() = ids.to_vec();
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ViewCountStore for FlakyStore {
    async fn add_view_counts(
        &self,
        deltas: &[(ContentId, u64)],
    ) -> ViewCountResult<Vec<ContentId>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ViewCountError::NetworkError("connection reset".to_string()));
        }
        let reject = self.reject.lock().unwrap().clone();
        let accepted: Vec<(ContentId, u64)> = deltas
            .iter()
            .filter(|(id, _)| !reject.contains(id))
            .copied()
            .collect();
        self.inner.add_view_counts(&accepted).await
    }

    async fn view_counts(&self, ids: &[ContentId]) -> ViewCountResult<HashMap<ContentId, u64>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ViewCountError::NetworkError("connection reset".to_string()));
        }
        self.inner.view_counts(ids).await
    }
}

/// Store whose writes never finish within any sane timeout.
pub struct StalledStore;

#[async_trait]
impl ViewCountStore for StalledStore {
    async fn add_view_counts(
        &self,
        _deltas: &[(ContentId, u64)],
    ) -> ViewCountResult<Vec<ContentId>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }

    async fn view_counts(&self, _ids: &[ContentId]) -> ViewCountResult<HashMap<ContentId, u64>> {
        Ok(HashMap::new())
    }
}
