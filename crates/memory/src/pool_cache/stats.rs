//! Pool cache statistics

/// Lifetime counters kept by the cache.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Counters {
    pub(crate) allocs: u64,
    pub(crate) frees: u64,
    pub(crate) extents_acquired: u64,
    pub(crate) extents_released: u64,
    pub(crate) extents_abandoned: u64,
}

/// Snapshot returned by [`PoolCache::stats`](super::PoolCache::stats).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCacheStats {
    /// Registered pools
    pub pools: usize,
    /// Pools with at least one live and one free slot
    pub available: usize,
    /// Pools with no free slot
    pub full: usize,
    /// Pools with no live slot
    pub empty: usize,
    pub live_objects: usize,
    pub capacity_per_pool: usize,
    pub total_allocs: u64,
    pub total_frees: u64,
    /// Extents obtained from the allocator
    pub extents_acquired: u64,
    /// Extents handed back through `release`
    pub extents_released: u64,
    /// Extents dropped from bookkeeping because the allocator cannot release
    pub extents_abandoned: u64,
}

impl PoolCacheStats {
    /// Fraction of registered capacity in use, 0.0 to 1.0.
    pub fn utilization(&self) -> f64 {
        let capacity = self.pools * self.capacity_per_pool;
        if capacity == 0 {
            0.0
        } else {
            self.live_objects as f64 / capacity as f64
        }
    }
}
