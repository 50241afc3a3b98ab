//! Durable content store: the authoritative view counters.

pub mod circuit_breaker;
pub mod http;
pub mod memory;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use http::HttpViewCountStore;
pub use memory::MemoryViewCountStore;

use crate::error::ViewCountResult;
use crate::types::ContentId;
use async_trait::async_trait;
use std::collections::HashMap;

/// The only two operations the engine needs from the durable store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ViewCountStore: Send + Sync {
    /// Add each delta to the persisted counter in one bulk, additive write.
    ///
    /// Returns the ids that committed. A store without partial-batch support
    /// returns every id on success and `Err` otherwise.
    async fn add_view_counts(&self, deltas: &[(ContentId, u64)]) -> ViewCountResult<Vec<ContentId>>;

    /// Persisted counters for `ids`. Unknown ids are omitted.
    async fn view_counts(&self, ids: &[ContentId]) -> ViewCountResult<HashMap<ContentId, u64>>;
}
