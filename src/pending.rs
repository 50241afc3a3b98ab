//! Buffered, not-yet-persisted view increments.

use crate::cache::CounterCache;
use crate::error::{ViewCountError, ViewCountResult};
use crate::types::ContentId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Pending-delta map plus dirty set, both resident in the shared cache.
///
/// `snapshot_dirty` followed by `clear_flushed` is not atomic as a pair, so
/// clearing subtracts exactly what was flushed instead of deleting the key.
/// An increment that lands in between survives into the next cycle.
pub struct PendingCounterStore {
    cache: Arc<dyn CounterCache>,
    op_timeout: Duration,
}

impl PendingCounterStore {
    pub fn new(cache: Arc<dyn CounterCache>, op_timeout: Duration) -> Self {
        Self { cache, op_timeout }
    }

    async fn bounded<T>(
        &self,
        what: &str,
        op: impl Future<Output = ViewCountResult<T>>,
    ) -> ViewCountResult<T> {
        tokio::time::timeout(self.op_timeout, op)
            .await
            .map_err(|_| ViewCountError::TimedOut(what.to_string()))?
    }

    /// Add one to `content_id`'s delta and mark it dirty. Returns the new delta.
    pub async fn increment(&self, content_id: ContentId) -> ViewCountResult<u64> {
        self.bounded("pending increment", self.cache.increment_pending(content_id))
            .await
    }

    /// Current dirty ids with their deltas. Leaves state untouched.
    pub async fn snapshot_dirty(&self) -> ViewCountResult<HashMap<ContentId, u64>> {
        self.bounded("dirty snapshot", self.cache.dirty_snapshot())
            .await
    }

    /// Subtract the exact flushed deltas; ids that reach zero leave the dirty set.
    pub async fn clear_flushed(&self, flushed: &HashMap<ContentId, u64>) -> ViewCountResult<()> {
        if flushed.is_empty() {
            return Ok(());
        }
        self.bounded("clear flushed", self.cache.subtract_pending(flushed))
            .await?;
        debug!(ids = flushed.len(), "cleared flushed deltas");
        Ok(())
    }

    /// Pending deltas for exactly `ids`, in one batched read.
    pub async fn pending_for(&self, ids: &[ContentId]) -> ViewCountResult<HashMap<ContentId, u64>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.bounded("pending lookup", self.cache.pending_for(ids))
            .await
    }
}
