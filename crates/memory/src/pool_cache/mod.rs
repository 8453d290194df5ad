//! Object cache over a growing set of same-size pools
//!
//! A [`PoolCache`] serves fixed-size objects from [`Pool`]s it builds on
//! demand over `page_size` extents obtained through an [`Allocator`]. Pools
//! are kept on one of three lists by occupancy:
//!
//! - *available*: some slots free, always tried first
//! - *full*: no slot free, never searched
//! - *empty*: no slot live, reused most recently emptied first
//!
//! When more than `high_water` pools sit on the empty list after a free,
//! the least recently emptied ones are released back to the allocator.
//!
//! Each slot starts with a one-word header holding the id of its pool, so
//! `free` finds the owner in O(1). The payload handed to the caller starts
//! right after that header and is word-aligned.
//!
//! # Examples
//! ```
//! use basalt_memory::allocator::SystemAllocator;
//! use basalt_memory::config::PoolCacheConfig;
//! use basalt_memory::pool_cache::PoolCache;
//!
//! let mut cache = PoolCache::new(PoolCacheConfig::for_objects(48), SystemAllocator::new())?;
//! let obj = cache.alloc()?;
//! assert_eq!(cache.pool_count(), 1);
//! unsafe { cache.free(obj) };
//! assert_eq!(cache.live_objects(), 0);
//! # Ok::<(), basalt_memory::MemoryError>(())
//! ```

mod lists;
mod stats;

use core::alloc::Layout;
use core::ptr::NonNull;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

use crate::allocator::Allocator;
use crate::config::PoolCacheConfig;
use crate::error::{MemoryError, MemoryResult};
use crate::extent::Extent;
use crate::pool::Pool;
use crate::utils::{is_aligned, WORD};

use lists::PoolLists;
pub use lists::PoolState;
pub use stats::PoolCacheStats;

/// Size of the owner header in front of every payload.
const HEADER: usize = WORD;

struct PoolEntry {
    pool: Pool<'static>,
    block: NonNull<u8>,
}

/// Fixed-size object cache with high-water-mark eviction.
///
/// Single-owner; wrap in [`Locked`](crate::allocator::Locked) to share.
/// The backing allocator must not call back into the same cache.
pub struct PoolCache<A: Allocator> {
    config: PoolCacheConfig,
    allocator: A,
    extent_layout: Layout,
    stride: usize,
    per_pool: usize,

    /// Pool slab indexed by pool id; `None` marks a reusable id.
    pools: Vec<Option<PoolEntry>>,
    vacant: Vec<usize>,
    lists: PoolLists,

    live: usize,
    counters: stats::Counters,
}

// SAFETY: The cache exclusively owns its pools and their extents.
unsafe impl<A: Allocator + Send> Send for PoolCache<A> {}

impl<A: Allocator> PoolCache<A> {
    /// Creates an empty cache. No memory is acquired until the first
    /// `alloc`.
    ///
    /// # Errors
    /// `InvalidArgument` if `object_size` is zero or `page_size` cannot hold
    /// one slot plus its header.
    pub fn new(config: PoolCacheConfig, allocator: A) -> MemoryResult<Self> {
        config.validate()?;
        let extent_layout = Layout::from_size_align(config.page_size, WORD)
            .map_err(|_| MemoryError::invalid_argument("page_size overflows a layout"))?;

        Ok(Self {
            stride: config.slot_stride(),
            per_pool: config.objects_per_pool(),
            extent_layout,
            config,
            allocator,
            pools: Vec::new(),
            vacant: Vec::new(),
            lists: PoolLists::new(),
            live: 0,
            counters: stats::Counters::default(),
        })
    }

    /// Allocates one object of `object_size` bytes.
    ///
    /// Tries the first available pool, then the most recently emptied pool,
    /// then a new pool if the `max_pools` cap allows one.
    ///
    /// # Errors
    /// - `CacheExhausted` when `max_pools` pools exist and all are full
    /// - `OutOfMemory` when the allocator cannot supply a new extent
    pub fn alloc(&mut self) -> MemoryResult<NonNull<u8>> {
        let id = match self
            .lists
            .front(PoolState::Available)
            .or_else(|| self.lists.back(PoolState::Empty))
        {
            Some(id) => id,
            None => self.grow()?,
        };

        let entry = self.entry_mut(id)?;
        let slot = entry.pool.alloc()?;
        let state = PoolState::classify(entry.pool.allocated(), entry.pool.capacity());

        // SAFETY: slot is a fresh word-aligned slot of at least HEADER +
        // object_size bytes.
        let payload = unsafe {
            slot.cast::<usize>().as_ptr().write(id);
            slot.add(HEADER)
        };
        if let Some(pattern) = self.config.alloc_pattern {
            // SAFETY: the payload spans object_size bytes of the slot.
            unsafe { payload.as_ptr().write_bytes(pattern, self.config.object_size) };
        }

        self.lists.relink(id, state);
        self.live += 1;
        self.counters.allocs += 1;
        Ok(payload)
    }

    /// Returns an object to its pool.
    ///
    /// Debug builds verify the pointer is a live slot of the resolved pool
    /// and panic otherwise.
    ///
    /// # Safety
    /// - `ptr` was returned by [`PoolCache::alloc`] on this cache
    /// - `ptr` has not been freed since
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        // SAFETY: caller contract; the header precedes the payload.
        let (slot, id) = unsafe {
            let slot = ptr.sub(HEADER);
            (slot, slot.cast::<usize>().as_ptr().read())
        };

        let Some(Some(entry)) = self.pools.get_mut(id) else {
            panic!(
                "PoolCache::free: {:#x} has no owning pool (header {id})",
                ptr.as_ptr() as usize
            );
        };

        if let Some(pattern) = self.config.dealloc_pattern {
            // SAFETY: the payload is still live until the slot is freed.
            unsafe { ptr.as_ptr().write_bytes(pattern, self.config.object_size) };
        }
        // SAFETY: slot is the start of a live slot of this pool.
        unsafe { entry.pool.free(slot) };
        let state = PoolState::classify(entry.pool.allocated(), entry.pool.capacity());

        self.lists.relink(id, state);
        self.live -= 1;
        self.counters.frees += 1;

        if state == PoolState::Empty {
            self.evict_above(self.config.high_water);
        }
    }

    /// Frees `ptr` after verifying it is a live object of this cache.
    ///
    /// # Errors
    /// `InvalidFree` for pointers outside every pool, not at a payload
    /// boundary, or not currently allocated. Nothing is modified then.
    pub fn try_free(&mut self, ptr: NonNull<u8>) -> MemoryResult<()> {
        let addr = ptr.as_ptr() as usize;
        if !is_aligned(addr, WORD) || addr < HEADER {
            return Err(MemoryError::invalid_free(addr, "misaligned object pointer"));
        }
        let slot_addr = addr - HEADER;

        let found = self.pools.iter().enumerate().find_map(|(id, entry)| {
            let entry = entry.as_ref()?;
            entry
                .pool
                .extent()
                .contains(slot_addr)
                .then_some((id, entry))
        });
        let Some((id, entry)) = found else {
            return Err(MemoryError::invalid_free(addr, "not owned by this cache"));
        };

        // SAFETY: slot_addr lies inside this pool's extent.
        let slot = unsafe { ptr.sub(HEADER) };
        if !entry.pool.owns(slot) {
            return Err(MemoryError::invalid_free(addr, "not an object boundary"));
        }
        if entry.pool.is_free(slot) {
            return Err(MemoryError::invalid_free(addr, "object is not allocated"));
        }
        // SAFETY: the slot is live, so its header was written by alloc.
        let header = unsafe { slot.cast::<usize>().as_ptr().read() };
        if header != id {
            return Err(MemoryError::invalid_free(addr, "owner header overwritten"));
        }

        // SAFETY: verified above.
        unsafe { self.free(ptr) };
        Ok(())
    }

    /// Releases every empty pool regardless of `high_water`.
    pub fn shrink(&mut self) {
        self.evict_above(0);
    }

    fn evict_above(&mut self, keep: usize) {
        while self.lists.len(PoolState::Empty) > keep {
            let Some(id) = self.lists.front(PoolState::Empty) else {
                break;
            };
            self.release_pool(id);
        }
    }

    fn grow(&mut self) -> MemoryResult<usize> {
        let max = self.config.max_pools;
        if max != 0 && self.pool_count() >= max {
            return Err(MemoryError::cache_exhausted(max, self.per_pool));
        }

        // SAFETY: extent_layout has non-zero size.
        let block = unsafe { self.allocator.acquire(self.extent_layout) }
            .map_err(|_| MemoryError::out_of_memory_with_layout(self.extent_layout))?;
        let extent = Extent::from_raw_slice(block);
        let start = extent.start();

        // SAFETY: the allocator hands over at least page_size bytes
        // exclusively until release; the cache keeps the pool no longer.
        let pool = match unsafe { Pool::init(extent, self.stride, self.per_pool) } {
            Ok(pool) => pool,
            Err(err) => {
                if self.allocator.supports_release() {
                    // SAFETY: the block was never handed out.
                    unsafe { self.allocator.release(start, self.extent_layout) };
                }
                return Err(err);
            }
        };

        let entry = PoolEntry { pool, block: start };
        let id = match self.vacant.pop() {
            Some(id) => {
                self.pools[id] = Some(entry);
                id
            }
            None => {
                self.pools.push(Some(entry));
                self.pools.len() - 1
            }
        };
        self.lists.push_back(id, PoolState::Empty);
        self.counters.extents_acquired += 1;

        #[cfg(feature = "logging")]
        debug!(
            pool = id,
            addr = start.as_ptr() as usize,
            objects = self.per_pool,
            "pool cache grew"
        );

        Ok(id)
    }

    fn release_pool(&mut self, id: usize) {
        self.lists.remove(id);
        let Some(entry) = self.pools.get_mut(id).and_then(Option::take) else {
            return;
        };
        self.vacant.push(id);
        // SAFETY: no slot of an empty pool is live.
        unsafe { self.release_block(entry.block) };

        #[cfg(feature = "logging")]
        trace!(pool = id, "released empty pool");
    }

    /// # Safety
    /// `block` was acquired with `extent_layout` and is no longer used.
    unsafe fn release_block(&mut self, block: NonNull<u8>) {
        if self.allocator.supports_release() {
            unsafe { self.allocator.release(block, self.extent_layout) };
            self.counters.extents_released += 1;
        } else {
            self.counters.extents_abandoned += 1;
        }
    }

    fn entry_mut(&mut self, id: usize) -> MemoryResult<&mut PoolEntry> {
        self.pools
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or_else(|| MemoryError::corrupt_heap("pool_cache", id, "listed pool id is vacant"))
    }

    /// Checks list membership, lengths and every pool's free list.
    ///
    /// # Errors
    /// `CorruptHeap` on the first inconsistency found.
    pub fn validate(&self) -> MemoryResult<()> {
        self.lists.validate()?;

        let listed = self.available_len() + self.full_len() + self.empty_len();
        if listed != self.pool_count() {
            return Err(MemoryError::corrupt_heap(
                "pool_cache",
                0,
                format!("{listed} pools listed, {} registered", self.pool_count()),
            ));
        }

        let mut live = 0;
        for (id, entry) in self.pools.iter().enumerate() {
            let Some(entry) = entry else {
                if self.lists.state_of(id).is_some() {
                    return Err(MemoryError::corrupt_heap(
                        "pool_cache",
                        id,
                        "vacant pool id is listed",
                    ));
                }
                continue;
            };
            entry.pool.validate()?;
            let expected = PoolState::classify(entry.pool.allocated(), entry.pool.capacity());
            if self.lists.state_of(id) != Some(expected) {
                return Err(MemoryError::corrupt_heap(
                    "pool_cache",
                    entry.block.as_ptr() as usize,
                    format!(
                        "pool {id} is on {:?} but should be on {expected:?}",
                        self.lists.state_of(id)
                    ),
                ));
            }
            live += entry.pool.allocated();
        }

        if live != self.live {
            return Err(MemoryError::corrupt_heap(
                "pool_cache",
                0,
                format!("{live} live slots, {} counted", self.live),
            ));
        }
        Ok(())
    }

    #[inline]
    pub fn object_size(&self) -> usize {
        self.config.object_size
    }

    /// Objects each pool holds.
    #[inline]
    pub fn capacity_per_pool(&self) -> usize {
        self.per_pool
    }

    /// Registered pools across all three lists.
    pub fn pool_count(&self) -> usize {
        self.pools.len() - self.vacant.len()
    }

    pub fn available_len(&self) -> usize {
        self.lists.len(PoolState::Available)
    }

    pub fn full_len(&self) -> usize {
        self.lists.len(PoolState::Full)
    }

    pub fn empty_len(&self) -> usize {
        self.lists.len(PoolState::Empty)
    }

    /// Objects currently allocated.
    pub fn live_objects(&self) -> usize {
        self.live
    }

    /// State of the pool owning `ptr`, if any.
    pub fn state_of(&self, ptr: NonNull<u8>) -> Option<PoolState> {
        let slot_addr = (ptr.as_ptr() as usize).checked_sub(HEADER)?;
        self.pools.iter().enumerate().find_map(|(id, entry)| {
            let entry = entry.as_ref()?;
            if entry.pool.extent().contains(slot_addr) {
                self.lists.state_of(id)
            } else {
                None
            }
        })
    }

    pub fn config(&self) -> &PoolCacheConfig {
        &self.config
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Snapshot of occupancy and lifetime counters.
    pub fn stats(&self) -> PoolCacheStats {
        PoolCacheStats {
            pools: self.pool_count(),
            available: self.available_len(),
            full: self.full_len(),
            empty: self.empty_len(),
            live_objects: self.live,
            capacity_per_pool: self.per_pool,
            total_allocs: self.counters.allocs,
            total_frees: self.counters.frees,
            extents_acquired: self.counters.extents_acquired,
            extents_released: self.counters.extents_released,
            extents_abandoned: self.counters.extents_abandoned,
        }
    }
}

impl<A: Allocator> Drop for PoolCache<A> {
    fn drop(&mut self) {
        if !self.allocator.supports_release() {
            return;
        }
        for entry in self.pools.iter_mut().filter_map(Option::take) {
            // SAFETY: the cache is going away; no object may outlive it.
            unsafe { self.allocator.release(entry.block, self.extent_layout) };
        }
    }
}

impl<A: Allocator> core::fmt::Debug for PoolCache<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PoolCache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
