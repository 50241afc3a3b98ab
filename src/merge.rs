//! Read-path merge of persisted and pending counts.

use crate::error::ViewCountResult;
use crate::metrics::MergeMetrics;
use crate::pending::PendingCounterStore;
use crate::types::ContentId;
use std::sync::Arc;
use tracing::{trace, warn};

/// Adds each id's pending delta to the persisted count the caller supplies.
///
/// A delta that is in transit (written to the store but not yet cleared) is
/// counted twice for at most one flush interval.
pub struct ReadPathMerger {
    pending: Arc<PendingCounterStore>,
    metrics: Arc<MergeMetrics>,
}

impl ReadPathMerger {
    pub fn new(pending: Arc<PendingCounterStore>, metrics: Arc<MergeMetrics>) -> Self {
        Self { pending, metrics }
    }

    /// `persisted + pending` for each item, in input order, with one batched
    /// cache read covering exactly the requested ids.
    pub async fn merge(
        &self,
        items: &[(ContentId, u64)],
    ) -> ViewCountResult<Vec<(ContentId, u64)>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<ContentId> = items.iter().map(|(id, _)| *id).collect();
        let deltas = self.pending.pending_for(&ids).await?;

        let merged: Vec<(ContentId, u64)> = items
            .iter()
            .map(|(id, persisted)| {
                let delta = deltas.get(id).copied().unwrap_or(0);
                (*id, persisted.saturating_add(delta))
            })
            .collect();

        let with_pending = deltas.values().filter(|d| **d > 0).count();
        self.metrics.record_merge(items.len(), with_pending);
        trace!(ids = items.len(), with_pending, "merged pending deltas");
        Ok(merged)
    }

    /// Like [`merge`](Self::merge), but a cache fault returns the persisted
    /// counts unchanged.
    pub async fn merge_or_persisted(&self, items: &[(ContentId, u64)]) -> Vec<(ContentId, u64)> {
        match self.merge(items).await {
            Ok(merged) => merged,
            Err(e) => {
                self.metrics.record_fallback();
                warn!(ids = items.len(), error = %e, "pending lookup failed, showing persisted counts");
                items.to_vec()
            }
        }
    }
}
