//! Shared cache backing the dedup markers and the pending-delta buffer.
//!
//! Every operation here is atomic per key on the backend itself; callers never
//! hold an in-process lock across one of these awaits.

pub mod clock;
pub mod memory;
pub mod redis;

pub use clock::{Clock, ManualClock, SystemClock};
pub use memory::MemoryCounterCache;
pub use redis::RedisCounterCache;

use crate::error::ViewCountResult;
use crate::types::{ContentId, VisitorId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Atomic primitives the engine needs from its cache.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CounterCache: Send + Sync {
    /// Set `key` with expiry `ttl` only if it is absent. Returns true for the
    /// single caller that created the key.
    async fn set_marker_if_absent(&self, key: &str, ttl: Duration) -> ViewCountResult<bool>;

    /// Add one to the pending delta of `id` and mark it dirty, as one atomic step.
    /// Returns the new pending delta.
    async fn increment_pending(&self, id: ContentId) -> ViewCountResult<u64>;

    /// Dirty ids with their current deltas. Read only.
    async fn dirty_snapshot(&self) -> ViewCountResult<HashMap<ContentId, u64>>;

    /// Subtract each flushed delta from the live counter; ids reaching zero leave
    /// both the delta map and the dirty set.
    async fn subtract_pending(&self, flushed: &HashMap<ContentId, u64>) -> ViewCountResult<()>;

    /// Pending deltas for exactly `ids`, one round trip. Absent ids are omitted.
    async fn pending_for(&self, ids: &[ContentId]) -> ViewCountResult<HashMap<ContentId, u64>>;
}

/// Key layout shared by all backends.
#[derive(Debug, Clone)]
pub struct CacheKeys {
    prefix: String,
}

impl CacheKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn marker(&self, content_id: ContentId, visitor_id: &VisitorId) -> String {
        format!("{}:views:seen:{}:{}", self.prefix, content_id, visitor_id)
    }

    pub fn pending(&self) -> String {
        format!("{}:views:pending", self.prefix)
    }

    pub fn dirty(&self) -> String {
        format!("{}:views:dirty", self.prefix)
    }
}

impl Default for CacheKeys {
    fn default() -> Self {
        Self::new("viewcount")
    }
}
