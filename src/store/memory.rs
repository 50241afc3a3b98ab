use super::ViewCountStore;
use crate::error::ViewCountResult;
use crate::types::ContentId;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Durable store stand-in for single-process deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryViewCountStore {
    counts: DashMap<ContentId, u64>,
    write_calls: AtomicU64,
    read_calls: AtomicU64,
}

impl MemoryViewCountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a persisted counter directly, bypassing the additive path.
    pub fn seed(&self, id: ContentId, count: u64) {
        self.counts.insert(id, count);
    }

    pub fn count(&self, id: ContentId) -> u64 {
        self.counts.get(&id).map(|c| *c).unwrap_or(0)
    }

    /// Number of bulk writes received
    pub fn write_calls(&self) -> u64 {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> u64 {
        self.read_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ViewCountStore for MemoryViewCountStore {
    async fn add_view_counts(&self, deltas: &[(ContentId, u64)]) -> ViewCountResult<Vec<ContentId>> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        for (id, delta) in deltas {
            *self.counts.entry(*id).or_insert(0) += delta;
        }
        Ok(deltas.iter().map(|(id, _)| *id).collect())
    }

    async fn view_counts(&self, ids: &[ContentId]) -> ViewCountResult<HashMap<ContentId, u64>> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ids
            .iter()
            .filter_map(|id| self.counts.get(id).map(|c| (*id, *c)))
            .collect())
    }
}
