//! Integration tests for stacking layers through the Allocator seam

use std::alloc::Layout;

use basalt_memory::allocator::{
    recover_exhaustion, Allocator, Locked, SignalOnExhaustion, SystemAllocator, TrackedAllocator,
};
use basalt_memory::config::{DynMemConfig, PoolCacheConfig};
use basalt_memory::dynmem::DynMem;
use basalt_memory::extent::Extent;
use basalt_memory::pool_cache::PoolCache;
use pretty_assertions::assert_eq;

#[repr(align(4096))]
struct Arena<const N: usize>([u8; N]);

fn cache_config(max_pools: usize) -> PoolCacheConfig {
    PoolCacheConfig {
        object_size: 64,
        page_size: 1024,
        max_pools,
        high_water: 0,
        ..PoolCacheConfig::production()
    }
}

fn locked_heap<const N: usize>(arena: &mut Arena<N>) -> Locked<DynMem> {
    let mut heap = DynMem::with_config(DynMemConfig::debug());
    unsafe { heap.add_pool(Extent::from_slice(&mut arena.0)) }.unwrap();
    Locked::new(heap)
}

#[test]
fn test_cache_on_top_of_heap() {
    let mut arena = Arena([0u8; 16384]);
    let heap = locked_heap(&mut arena);
    {
        let mut cache = PoolCache::new(cache_config(0), &heap).unwrap();
        let objs: Vec<_> = (0..cache.capacity_per_pool() * 2 + 1)
            .map(|_| cache.alloc().unwrap())
            .collect();
        assert_eq!(cache.pool_count(), 3);

        // Each pool's extent is one heap block.
        let stats = heap.lock().validate().unwrap();
        assert_eq!(stats.allocated_blocks, 3);

        for ptr in objs.into_iter().take(5) {
            unsafe { cache.free(ptr) };
        }
        cache.validate().unwrap();
    }
    // Dropping the cache hands every extent back.
    let stats = heap.lock().validate().unwrap();
    assert_eq!(stats.allocated_blocks, 0);
    assert_eq!(stats.free_blocks, 1);
}

#[test]
fn test_heap_exhaustion_surfaces_through_cache() {
    let mut arena = Arena([0u8; 2048]);
    let backing = SignalOnExhaustion::new(locked_heap(&mut arena));
    let mut cache = PoolCache::new(cache_config(0), &backing).unwrap();

    let per_pool = cache.capacity_per_pool();
    for _ in 0..per_pool {
        cache.alloc().unwrap();
    }
    // A second 1 KiB extent no longer fits the 2 KiB heap.
    let err = cache.alloc().unwrap_err();
    assert!(err.is_exhaustion());
    assert_eq!(backing.signal_count(), 1);
    assert_eq!(cache.pool_count(), 1);
}

#[test]
fn test_dyn_and_boxed_allocators() {
    let system = SystemAllocator::new();
    let dynamic: &dyn Allocator = &system;
    let mut cache = PoolCache::new(cache_config(0), dynamic).unwrap();
    let obj = cache.alloc().unwrap();
    unsafe { cache.free(obj) };
    assert_eq!(cache.stats().extents_released, 1);

    let boxed: Box<dyn Allocator> = Box::new(TrackedAllocator::new(SystemAllocator::new()));
    let mut cache = PoolCache::new(cache_config(0), boxed).unwrap();
    let obj = cache.alloc().unwrap();
    unsafe { cache.free(obj) };
    assert_eq!(cache.pool_count(), 0);
}

#[test]
fn test_recover_from_full_cache_with_heap() {
    let mut arena = Arena([0u8; 4096]);
    let mut heap = DynMem::new();
    unsafe { heap.add_pool(Extent::from_slice(&mut arena.0)) }.unwrap();
    let mut cache = PoolCache::new(cache_config(1), SystemAllocator::new()).unwrap();

    for _ in 0..cache.capacity_per_pool() {
        cache.alloc().unwrap();
    }
    let ptr = recover_exhaustion(|| cache.alloc(), |_| heap.malloc(64)).unwrap();
    assert!(heap.owns(ptr));

    // Non-exhaustion errors are not swallowed.
    let err = recover_exhaustion(|| heap.malloc(0), |_| Ok(ptr)).unwrap_err();
    assert_eq!(err.code(), "MEM:ARG:INVALID");
}

#[test]
fn test_tracked_locked_heap_resize() {
    let mut arena = Arena([0u8; 4096]);
    let tracked = TrackedAllocator::new(locked_heap(&mut arena));
    assert!(tracked.supports_resize());

    let layout = Layout::from_size_align(100, 8).unwrap();
    let bigger = Layout::from_size_align(300, 8).unwrap();
    unsafe {
        let ptr = tracked.acquire(layout).unwrap().cast::<u8>();
        ptr.as_ptr().write_bytes(0x5A, 100);

        let grown = tracked.resize(ptr, layout, bigger).unwrap();
        assert_eq!(grown.len(), 300);
        let grown = grown.cast::<u8>();
        assert_eq!(grown.as_ptr().add(99).read(), 0x5A);
        assert_eq!(tracked.live_bytes(), 300);

        tracked.release(grown, bigger);
    }
    let stats = tracked.stats();
    assert_eq!(stats.resizes, 1);
    assert_eq!(stats.outstanding(), 0);

    // Over-aligned requests are refused without touching the heap.
    let wide = Layout::from_size_align(64, 64).unwrap();
    assert!(unsafe { tracked.acquire(wide) }.is_err());
    assert_eq!(
        tracked.inner().lock().validate().unwrap().allocated_blocks,
        0
    );
}
