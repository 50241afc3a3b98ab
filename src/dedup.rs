//! Per-visitor dedup window.

use crate::cache::{CacheKeys, CounterCache};
use crate::error::{ViewCountError, ViewCountResult};
use crate::types::{ClaimOutcome, ContentId, VisitorId};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Default dedup window
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Claims a (content, visitor) pair for one dedup window.
///
/// A cache fault comes back as `Err`, never as [`ClaimOutcome::Duplicate`], so
/// callers can tell "already counted" from "don't know".
pub struct DedupGate {
    cache: Arc<dyn CounterCache>,
    keys: CacheKeys,
    op_timeout: Duration,
}

impl DedupGate {
    pub fn new(cache: Arc<dyn CounterCache>, keys: CacheKeys, op_timeout: Duration) -> Self {
        Self {
            cache,
            keys,
            op_timeout,
        }
    }

    pub async fn try_claim(
        &self,
        content_id: ContentId,
        visitor_id: &VisitorId,
        ttl: Duration,
    ) -> ViewCountResult<ClaimOutcome> {
        if ttl.is_zero() {
            return Err(ViewCountError::InvalidArgument(
                "dedup ttl must be positive".to_string(),
            ));
        }

        let key = self.keys.marker(content_id, visitor_id);
        let claimed = tokio::time::timeout(
            self.op_timeout,
            self.cache.set_marker_if_absent(&key, ttl),
        )
        .await
        .map_err(|_| ViewCountError::TimedOut(format!("dedup claim for content {}", content_id)))??;

        trace!(content_id = %content_id, visitor_id = %visitor_id, claimed, "dedup claim");
        Ok(if claimed {
            ClaimOutcome::Claimed
        } else {
            ClaimOutcome::Duplicate
        })
    }
}
