use crate::dedup::DedupGate;
use crate::error::{ViewCountError, ViewCountResult};
use crate::metrics::ViewMetrics;
use crate::pending::PendingCounterStore;
use crate::types::{ClaimOutcome, ContentId, RecordOutcome, VisitorId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

/// Handles one incoming view event: dedup claim, then buffered increment.
///
/// Never touches the durable store.
pub struct ViewRecorder {
    gate: DedupGate,
    pending: Arc<PendingCounterStore>,
    dedup_ttl: Duration,
    metrics: Arc<ViewMetrics>,
}

impl ViewRecorder {
    pub fn new(
        gate: DedupGate,
        pending: Arc<PendingCounterStore>,
        dedup_ttl: Duration,
        metrics: Arc<ViewMetrics>,
    ) -> Self {
        Self {
            gate,
            pending,
            dedup_ttl,
            metrics,
        }
    }

    /// Record a view from already-validated ids.
    ///
    /// Returns `Counted` or `Duplicate`; cache faults come back as `Err` and
    /// leave the view uncredited.
    pub async fn record_view(
        &self,
        content_id: ContentId,
        visitor_id: &VisitorId,
    ) -> ViewCountResult<RecordOutcome> {
        match self
            .gate
            .try_claim(content_id, visitor_id, self.dedup_ttl)
            .await?
        {
            ClaimOutcome::Duplicate => {
                self.metrics.record_duplicate();
                Ok(RecordOutcome::Duplicate)
            }
            ClaimOutcome::Claimed => {
                // Marker is set but the increment failed: this view is lost
                // for the rest of the window. Undercount over overcount.
                let delta = self.pending.increment(content_id).await.map_err(|e| {
                    warn!(
                        content_id = %content_id,
                        error = %e,
                        "claimed view could not be buffered"
                    );
                    e
                })?;
                self.metrics.record_counted();
                trace!(content_id = %content_id, pending = delta, "view counted");
                Ok(RecordOutcome::Counted)
            }
        }
    }

    /// Record a view from raw caller input, validating it first.
    pub async fn record_raw(
        &self,
        content_id: u64,
        visitor_id: &str,
    ) -> ViewCountResult<RecordOutcome> {
        let validated = ContentId::new(content_id)
            .and_then(|content| VisitorId::new(visitor_id).map(|visitor| (content, visitor)));
        let (content, visitor) = match validated {
            Ok(pair) => pair,
            Err(e) => {
                self.metrics.record_rejected();
                return Err(e);
            }
        };
        self.record_view(content, &visitor).await
    }

    /// Like [`record_view`](Self::record_view) but infrastructure faults become
    /// [`RecordOutcome::Dropped`]. Only invalid input is still an error.
    pub async fn record_view_best_effort(
        &self,
        content_id: ContentId,
        visitor_id: &VisitorId,
    ) -> ViewCountResult<RecordOutcome> {
        match self.record_view(content_id, visitor_id).await {
            Err(e) if e.is_infrastructure() => {
                let reason = match e {
                    ViewCountError::TimedOut(_) => "timeout",
                    ViewCountError::CacheUnavailable(_) => "cache_unavailable",
                    _ => "other",
                };
                self.metrics.record_dropped(reason);
                warn!(content_id = %content_id, error = %e, "view dropped");
                Ok(RecordOutcome::Dropped)
            }
            other => other,
        }
    }
}
