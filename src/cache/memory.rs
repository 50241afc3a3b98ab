use super::clock::{Clock, SystemClock};
use super::CounterCache;
use crate::error::ViewCountResult;
use crate::types::ContentId;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use moka::future::Cache as MokaCache;
use moka::ops::compute::{CompResult, Op};
use moka::Expiry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Presence of a marker means the pair was already counted in this window.
#[derive(Debug, Clone, Copy)]
struct DedupMarker {
    /// Expiry instant on the cache clock
    expires_at: Duration,
    ttl: Duration,
}

/// Per-entry expiry so each marker lives exactly its own TTL.
struct MarkerExpiry;

impl Expiry<String, DedupMarker> for MarkerExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &DedupMarker,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &DedupMarker,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Single-process counter cache.
///
/// Dedup markers live in a `moka` cache with per-entry expiry, bounded by
/// `max_markers` (TinyLFU eviction beyond that). Claims go through moka's
/// per-key `and_compute_with`, which serializes concurrent callers on the same
/// key, so exactly one caller observes "absent".
///
/// Pending deltas live in a `DashMap`. The key set of that map is the dirty
/// set: an id is present iff its delta is non-zero, and both are updated under
/// the same shard lock.
///
/// Expiry is checked against an injectable [`Clock`] so dedup windows can be
/// tested without waiting a day.
pub struct MemoryCounterCache {
    markers: MokaCache<String, DedupMarker>,
    pending: DashMap<ContentId, i64>,
    clock: Arc<dyn Clock>,
}

impl MemoryCounterCache {
    /// Create a cache holding at most `max_markers` dedup markers.
    pub fn new(max_markers: u64) -> Self {
        Self::with_clock(max_markers, Arc::new(SystemClock))
    }

    pub fn with_clock(max_markers: u64, clock: Arc<dyn Clock>) -> Self {
        let markers = MokaCache::builder()
            .max_capacity(max_markers)
            .expire_after(MarkerExpiry)
            .build();

        Self {
            markers,
            pending: DashMap::new(),
            clock,
        }
    }

    /// Number of live dedup markers.
    pub async fn marker_count(&self) -> u64 {
        self.markers.run_pending_tasks().await;
        self.markers.entry_count()
    }

    /// Number of dirty ids.
    pub fn dirty_len(&self) -> usize {
        self.pending.len()
    }
}

impl Default for MemoryCounterCache {
    fn default() -> Self {
        Self::new(1_000_000)
    }
}

#[async_trait]
impl CounterCache for MemoryCounterCache {
    async fn set_marker_if_absent(&self, key: &str, ttl: Duration) -> ViewCountResult<bool> {
        let now = self.clock.now();
        let marker = DedupMarker {
            expires_at: now + ttl,
            ttl,
        };

        let result = self
            .markers
            .entry(key.to_string())
            .and_compute_with(|existing| {
                let op = match existing {
                    Some(entry) if entry.value().expires_at > now => Op::Nop,
                    _ => Op::Put(marker),
                };
                std::future::ready(op)
            })
            .await;

        let claimed = matches!(result, CompResult::Inserted(_) | CompResult::ReplacedWith(_));
        trace!(key, claimed, "marker claim");
        Ok(claimed)
    }

    async fn increment_pending(&self, id: ContentId) -> ViewCountResult<u64> {
        let mut delta = self.pending.entry(id).or_insert(0);
        *delta += 1;
        Ok((*delta).max(0) as u64)
    }

    async fn dirty_snapshot(&self) -> ViewCountResult<HashMap<ContentId, u64>> {
        Ok(self
            .pending
            .iter()
            .filter(|entry| *entry.value() > 0)
            .map(|entry| (*entry.key(), *entry.value() as u64))
            .collect())
    }

    async fn subtract_pending(&self, flushed: &HashMap<ContentId, u64>) -> ViewCountResult<()> {
        for (id, delta) in flushed {
            if let Entry::Occupied(mut entry) = self.pending.entry(*id) {
                let remaining = *entry.get() - *delta as i64;
                if remaining <= 0 {
                    entry.remove();
                } else {
                    entry.insert(remaining);
                }
            }
        }
        Ok(())
    }

    async fn pending_for(&self, ids: &[ContentId]) -> ViewCountResult<HashMap<ContentId, u64>> {
        Ok(ids
            .iter()
            .filter_map(|id| {
                self.pending
                    .get(id)
                    .filter(|delta| **delta > 0)
                    .map(|delta| (*id, *delta as u64))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;

    fn id(raw: u64) -> ContentId {
        ContentId::new(raw).unwrap()
    }

    #[tokio::test]
    async fn test_marker_claimed_once() {
        let cache = MemoryCounterCache::new(100);
        let ttl = Duration::from_secs(60);

        assert!(cache.set_marker_if_absent("k", ttl).await.unwrap());
        assert!(!cache.set_marker_if_absent("k", ttl).await.unwrap());
        assert!(cache.set_marker_if_absent("other", ttl).await.unwrap());
        assert_eq!(cache.marker_count().await, 2);
    }

    #[tokio::test]
    async fn test_marker_reclaimable_after_clock_passes_ttl() {
        let clock = Arc::new(ManualClock::new());
        let cache = MemoryCounterCache::with_clock(100, clock.clone());
        let ttl = Duration::from_secs(3600);

        assert!(cache.set_marker_if_absent("k", ttl).await.unwrap());
        clock.advance(Duration::from_secs(3599));
        assert!(!cache.set_marker_if_absent("k", ttl).await.unwrap());
        clock.advance(Duration::from_secs(2));
        assert!(cache.set_marker_if_absent("k", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_marker_expires_in_real_time() {
        let cache = MemoryCounterCache::new(100);
        let ttl = Duration::from_millis(50);

        assert!(cache.set_marker_if_absent("k", ttl).await.unwrap());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.set_marker_if_absent("k", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_claims_single_winner() {
        let cache = Arc::new(MemoryCounterCache::new(100));
        let mut handles = vec![];

        for _ in 0..64 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache
                    .set_marker_if_absent("contended", Duration::from_secs(60))
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_increment_and_snapshot() {
        let cache = MemoryCounterCache::default();

        assert_eq!(cache.increment_pending(id(1)).await.unwrap(), 1);
        assert_eq!(cache.increment_pending(id(1)).await.unwrap(), 2);
        assert_eq!(cache.increment_pending(id(2)).await.unwrap(), 1);

        let snapshot = cache.dirty_snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[&id(1)], 2);
        assert_eq!(snapshot[&id(2)], 1);

        // Snapshot is a read, not a drain
        assert_eq!(cache.dirty_snapshot().await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_subtract_keeps_late_increment() {
        let cache = MemoryCounterCache::default();
        cache.increment_pending(id(5)).await.unwrap();
        cache.increment_pending(id(5)).await.unwrap();

        let snapshot = cache.dirty_snapshot().await.unwrap();
        cache.increment_pending(id(5)).await.unwrap();
        cache.subtract_pending(&snapshot).await.unwrap();

        let pending = cache.pending_for(&[id(5)]).await.unwrap();
        assert_eq!(pending.get(&id(5)), Some(&1));
        assert_eq!(cache.dirty_len(), 1);
    }

    #[tokio::test]
    async fn test_subtract_to_zero_removes_dirty() {
        let cache = MemoryCounterCache::default();
        cache.increment_pending(id(9)).await.unwrap();

        let snapshot = cache.dirty_snapshot().await.unwrap();
        cache.subtract_pending(&snapshot).await.unwrap();

        assert_eq!(cache.dirty_len(), 0);
        assert!(cache.dirty_snapshot().await.unwrap().is_empty());
        assert!(cache.pending_for(&[id(9)]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subtract_unknown_id_is_noop() {
        let cache = MemoryCounterCache::default();
        let flushed = HashMap::from([(id(3), 4)]);
        cache.subtract_pending(&flushed).await.unwrap();
        assert_eq!(cache.dirty_len(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_increments_sum() {
        let cache = Arc::new(MemoryCounterCache::default());
        let mut handles = vec![];

        for i in 0..10u64 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    cache.increment_pending(id(1 + i % 2)).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = cache.dirty_snapshot().await.unwrap();
        assert_eq!(snapshot[&id(1)] + snapshot[&id(2)], 1000);
    }
}
