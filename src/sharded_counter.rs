//! Contention-free counter for hot-path view statistics.
//!
//! Every accepted view bumps a counter from whichever request task handled it.
//! Spreading the bumps across shards keeps those tasks from fighting over a
//! single cache line.

use std::sync::atomic::{AtomicU64, Ordering};

const SHARDS: usize = 32;

#[derive(Debug)]
pub struct ShardedCounter {
    shards: Box<[AtomicU64]>,
}

impl ShardedCounter {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    #[inline]
    pub fn increment(&self) {
        self.add(1);
    }

    /// Add `n` to the shard picked by a per-thread round-robin cursor.
    /// Tasks migrate between threads, so only the spread matters, not affinity.
    #[inline]
    pub fn add(&self, n: u64) {
        thread_local! {
            static CURSOR: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
        }

        let idx = CURSOR.with(|cursor| {
            let next = cursor.get().wrapping_add(1);
            cursor.set(next);
            next % SHARDS
        });

        self.shards[idx].fetch_add(n, Ordering::Relaxed);
    }

    pub fn sum(&self) -> u64 {
        self.shards
            .iter()
            .map(|shard| shard.load(Ordering::Relaxed))
            .sum()
    }
}

impl Default for ShardedCounter {
    fn default() -> Self {
        Self::new()
    }
}
