//! Integration tests for PoolCache classification and eviction

use std::ptr::NonNull;

use basalt_memory::allocator::{Allocator, SystemAllocator, TrackedAllocator};
use basalt_memory::config::PoolCacheConfig;
use basalt_memory::pool_cache::{PoolCache, PoolState};
use basalt_memory::MemoryError;
use pretty_assertions::assert_eq;
use rstest::rstest;

fn config(object_size: usize, page_size: usize, max_pools: usize, high_water: usize) -> PoolCacheConfig {
    PoolCacheConfig {
        object_size,
        page_size,
        max_pools,
        high_water,
        ..PoolCacheConfig::production()
    }
}

fn fill_pool<A: Allocator>(cache: &mut PoolCache<A>) -> Vec<NonNull<u8>> {
    (0..cache.capacity_per_pool())
        .map(|_| cache.alloc().expect("room for one more pool"))
        .collect()
}

#[test]
fn test_two_pools_high_water_one() {
    let tracked = TrackedAllocator::new(SystemAllocator::new());
    let mut cache = PoolCache::new(config(32, 4096, 2, 1), &tracked).unwrap();

    let first = fill_pool(&mut cache);
    let second = fill_pool(&mut cache);
    assert_eq!(cache.pool_count(), 2);
    assert_eq!(cache.full_len(), 2);

    // Both pools full and the cap reached.
    assert_eq!(
        cache.alloc().unwrap_err(),
        MemoryError::CacheExhausted {
            max_pools: 2,
            per_pool: cache.capacity_per_pool(),
        }
    );

    for ptr in first {
        unsafe { cache.free(ptr) };
    }
    // One empty pool is within the high-water mark.
    assert_eq!(cache.empty_len(), 1);
    assert_eq!(cache.pool_count(), 2);
    assert_eq!(tracked.stats().releases, 0);

    for ptr in second {
        unsafe { cache.free(ptr) };
    }
    // A second empty pool exceeds it; one is released right away.
    assert_eq!(cache.pool_count(), 1);
    assert_eq!(cache.empty_len(), 1);
    assert_eq!(tracked.stats().releases, 1);
    cache.validate().unwrap();
}

#[test]
fn test_available_before_empty_before_new() {
    let mut cache = PoolCache::new(config(64, 1024, 0, 4), SystemAllocator::new()).unwrap();
    let per_pool = cache.capacity_per_pool();

    let a = fill_pool(&mut cache);
    let b = fill_pool(&mut cache);
    assert_eq!(cache.pool_count(), 2);

    // Empty pool a completely, leave one gap in b.
    for ptr in &a {
        unsafe { cache.free(*ptr) };
    }
    unsafe { cache.free(b[0]) };
    assert_eq!(cache.available_len(), 1);
    assert_eq!(cache.empty_len(), 1);

    // The partially used pool is preferred over the empty one.
    let refill = cache.alloc().unwrap();
    assert_eq!(cache.state_of(refill), Some(PoolState::Full));
    assert_eq!(cache.empty_len(), 1);

    // Then the empty pool is reused before any new pool is built.
    let reused = cache.alloc().unwrap();
    assert_eq!(cache.state_of(reused), Some(PoolState::Available));
    assert_eq!(cache.pool_count(), 2);
    assert_eq!(cache.stats().extents_acquired, 2);
    assert_eq!(cache.live_objects(), per_pool + 1);
}

#[test]
fn test_most_recently_emptied_reused_first() {
    let mut cache = PoolCache::new(config(64, 512, 0, 8), SystemAllocator::new()).unwrap();

    let a = fill_pool(&mut cache);
    let b = fill_pool(&mut cache);
    let a_last = a[a.len() - 1];
    let b_last = b[b.len() - 1];

    for ptr in a {
        unsafe { cache.free(ptr) };
    }
    for ptr in b {
        unsafe { cache.free(ptr) };
    }
    assert_eq!(cache.empty_len(), 2);

    // b emptied last, so its most recently freed slot comes back.
    let next = cache.alloc().unwrap();
    assert_eq!(next, b_last);
    assert_ne!(next, a_last);
}

#[test]
fn test_oldest_empty_pool_is_evicted() {
    let tracked = TrackedAllocator::new(SystemAllocator::new());
    let mut cache = PoolCache::new(config(64, 512, 0, 1), &tracked).unwrap();

    let a = fill_pool(&mut cache);
    let b = fill_pool(&mut cache);
    let b_last = b[b.len() - 1];

    for ptr in a {
        unsafe { cache.free(ptr) };
    }
    for ptr in b {
        unsafe { cache.free(ptr) };
    }
    // a emptied first and is the one released.
    assert_eq!(cache.pool_count(), 1);
    assert_eq!(cache.alloc().unwrap(), b_last);
}

/// Allocator that hands out memory but cannot take it back.
struct Arena {
    inner: SystemAllocator,
}

unsafe impl Allocator for Arena {
    unsafe fn acquire(&self, layout: std::alloc::Layout) -> basalt_memory::MemoryResult<NonNull<[u8]>> {
        unsafe { self.inner.acquire(layout) }
    }
}

#[test]
fn test_eviction_without_release_drops_bookkeeping() {
    let mut cache = PoolCache::new(
        config(128, 1024, 0, 0),
        Arena {
            inner: SystemAllocator::new(),
        },
    )
    .unwrap();

    let obj = cache.alloc().unwrap();
    unsafe { cache.free(obj) };

    assert_eq!(cache.pool_count(), 0);
    let stats = cache.stats();
    assert_eq!(stats.extents_released, 0);
    assert_eq!(stats.extents_abandoned, 1);
}

#[rstest]
#[case(8, 256)]
#[case(32, 4096)]
#[case(100, 4096)]
#[case(500, 1024)]
fn test_objects_are_writable_and_distinct(#[case] object_size: usize, #[case] page_size: usize) {
    let mut cache = PoolCache::new(config(object_size, page_size, 0, 1), SystemAllocator::new()).unwrap();
    let count = cache.capacity_per_pool() * 3 + 1;

    let objs: Vec<_> = (0..count)
        .map(|i| {
            let ptr = cache.alloc().unwrap();
            unsafe { ptr.as_ptr().write_bytes(i as u8, object_size) };
            ptr
        })
        .collect();

    for (i, ptr) in objs.iter().enumerate() {
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), object_size) };
        assert!(bytes.iter().all(|&b| b == i as u8), "object {i} clobbered");
    }
    cache.validate().unwrap();

    for ptr in objs {
        cache.try_free(ptr).unwrap();
    }
    assert_eq!(cache.live_objects(), 0);
    assert!(cache.empty_len() <= 1);
}

#[cfg(unix)]
#[test]
fn test_cache_over_pages() {
    use basalt_memory::allocator::PageAllocator;

    let pages = PageAllocator::new();
    let page_size = pages.page_size();
    let mut cache = PoolCache::new(config(48, page_size, 0, 0), pages).unwrap();

    let objs: Vec<_> = (0..cache.capacity_per_pool() + 1)
        .map(|_| cache.alloc().unwrap())
        .collect();
    assert_eq!(cache.pool_count(), 2);

    for ptr in objs {
        unsafe { cache.free(ptr) };
    }
    assert_eq!(cache.pool_count(), 0);
    assert_eq!(cache.stats().extents_released, 2);
}
