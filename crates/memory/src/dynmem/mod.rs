//! General-purpose heap with boundary tags
//!
//! [`DynMem`] serves variable-size requests from one or more registered
//! extents ("pools"). Blocks form an implicit list per pool: each block
//! starts with a one-word header holding its size and two flags, free blocks
//! also end with a footer repeating the size. That makes both neighbours of
//! any block reachable in O(1), so `free` coalesces immediately in both
//! directions and no two free blocks are ever adjacent.
//!
//! Allocation uses next-fit: the scan starts at a roving cursor, walks to
//! the end of that pool, continues through the other pools and wraps back
//! to the cursor. `free` moves the cursor to the block it just coalesced, so
//! a recently freed block is the first candidate for the next request.
//!
//! When nothing fits, the heap asks its [`GrowthSource`] for another extent
//! and retries once.
//!
//! # Examples
//! ```
//! use basalt_memory::dynmem::DynMem;
//! use basalt_memory::extent::Extent;
//!
//! let mut buf = vec![0u8; 4096];
//! let mut heap = DynMem::new();
//! unsafe { heap.add_pool(Extent::from_slice(&mut buf))? };
//!
//! let ptr = heap.malloc(100)?;
//! assert!(unsafe { heap.usable_size(ptr) } >= 100);
//! unsafe { heap.free(ptr) };
//! assert_eq!(heap.validate()?.allocated_blocks, 0);
//! # Ok::<(), basalt_memory::MemoryError>(())
//! ```

mod block;
mod growth;
mod walk;

use core::ptr::NonNull;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

use crate::config::DynMemConfig;
use crate::error::{MemoryError, MemoryResult};
use crate::extent::Extent;
use crate::utils::{align_down, checked_align_up, WORD};

use block::{block_size_for, Block};
pub use block::{GRANULE, MIN_BLOCK};
pub use growth::{AllocatorGrowth, GrowFn, GrowthSource, NoGrowth};
pub use walk::{BlockInfo, HeapStats};

/// A registered extent.
#[derive(Debug, Clone, Copy)]
struct HeapPool {
    extent: Extent,
    first: Block,
    usable_len: usize,
}

impl HeapPool {
    /// Address of the epilogue header.
    fn end(&self) -> usize {
        self.first.addr() + self.usable_len
    }

    /// True if `addr` is a block header position of this pool, epilogue
    /// included.
    fn spans(&self, addr: usize) -> bool {
        addr >= self.first.addr() && addr <= self.end()
    }
}

/// Read-only description of a registered pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolInfo {
    /// Start of the extent as registered
    pub start: usize,
    /// Length of the extent as registered
    pub total_len: usize,
    /// Bytes available for blocks after alignment and the epilogue
    pub usable_len: usize,
}

/// Boundary-tag heap over registered extents.
///
/// Single-owner; wrap in [`Locked`](crate::allocator::Locked) to share.
pub struct DynMem<G: GrowthSource = NoGrowth> {
    config: DynMemConfig,
    pools: Vec<HeapPool>,
    cursor: Option<Block>,
    growth: G,
    growths: usize,
}

// SAFETY: The heap exclusively owns its registered extents.
unsafe impl<G: GrowthSource + Send> Send for DynMem<G> {}

impl DynMem<NoGrowth> {
    /// Empty heap without growth. Register memory with [`DynMem::add_pool`].
    pub fn new() -> Self {
        Self::with_config(DynMemConfig::default())
    }

    pub fn with_config(config: DynMemConfig) -> Self {
        Self::with_growth(config, NoGrowth)
    }
}

impl Default for DynMem<NoGrowth> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: GrowthSource> DynMem<G> {
    /// Empty heap that grows through `growth` when no block fits.
    pub fn with_growth(config: DynMemConfig, growth: G) -> Self {
        Self {
            config,
            pools: Vec::new(),
            cursor: None,
            growth,
            growths: 0,
        }
    }

    /// Registers `extent` as a new pool holding one free block.
    ///
    /// # Errors
    /// `InvalidArgument` if the extent cannot hold one minimum block plus
    /// the epilogue, or overlaps a registered pool.
    ///
    /// # Safety
    /// The extent is valid for reads and writes, and nothing else uses it
    /// for as long as this heap is alive.
    pub unsafe fn add_pool(&mut self, extent: Extent) -> MemoryResult<()> {
        if self.pools.iter().any(|p| {
            extent.addr() < p.extent.end() && p.extent.addr() < extent.end()
        }) {
            return Err(MemoryError::invalid_argument(
                "extent overlaps a registered pool",
            ));
        }

        let too_small = || {
            MemoryError::invalid_argument(format!(
                "extent of {} bytes cannot hold a {MIN_BLOCK}-byte block",
                extent.len()
            ))
        };

        // Headers sit one word below a granule boundary so payloads are
        // granule-aligned.
        let base = extent.addr();
        let first_addr = base
            .checked_add(WORD)
            .and_then(|a| checked_align_up(a, GRANULE))
            .ok_or_else(too_small)?
            - WORD;
        let offset = first_addr - base;
        let room = extent
            .len()
            .checked_sub(offset + WORD)
            .ok_or_else(too_small)?;
        let usable_len = align_down(room, GRANULE);
        if usable_len < MIN_BLOCK {
            return Err(too_small());
        }

        // SAFETY: offset + usable_len + WORD <= extent.len().
        let first = Block::at(unsafe { extent.start().add(offset) });
        unsafe {
            first.write(usable_len, false, true);
            first.write_footer();
            first.next().write(0, true, false);
        }

        self.pools.push(HeapPool {
            extent,
            first,
            usable_len,
        });
        if self.cursor.is_none() {
            self.cursor = Some(first);
        }

        #[cfg(feature = "logging")]
        debug!(
            pool = self.pools.len() - 1,
            addr = base,
            usable_len,
            "registered heap pool"
        );

        Ok(())
    }

    /// Allocates at least `n` bytes, granule-aligned.
    ///
    /// # Errors
    /// - `InvalidArgument` for `n == 0`
    /// - `OutOfMemory` if no block fits and growth fails
    pub fn malloc(&mut self, n: usize) -> MemoryResult<NonNull<u8>> {
        if n == 0 {
            return Err(MemoryError::zero_size());
        }
        let asize = block_size_for(n).ok_or_else(|| MemoryError::out_of_memory(n, GRANULE))?;

        if let Some(block) = self.find_fit(asize) {
            // SAFETY: find_fit returns a free block of at least asize bytes.
            return Ok(unsafe { self.place(block, asize) });
        }

        self.grow(n, asize)?;
        match self.find_fit(asize) {
            // SAFETY: as above.
            Some(block) => Ok(unsafe { self.place(block, asize) }),
            None => Err(MemoryError::out_of_memory(n, GRANULE)),
        }
    }

    /// Like [`DynMem::malloc`], with the first `n` bytes zeroed.
    pub fn malloc_zeroed(&mut self, n: usize) -> MemoryResult<NonNull<u8>> {
        let ptr = self.malloc(n)?;
        // SAFETY: the payload holds at least n bytes.
        unsafe { ptr.as_ptr().write_bytes(0, n) };
        Ok(ptr)
    }

    /// Asks the growth source for room for an `asize` block.
    fn grow(&mut self, n: usize, asize: usize) -> MemoryResult<()> {
        let oom = || MemoryError::out_of_memory(n, GRANULE);

        // Worst-case alignment offset plus the epilogue.
        let min_len = asize.checked_add(GRANULE + WORD).ok_or_else(oom)?;
        let extent = self.growth.grow(min_len).ok_or_else(oom)?;

        // SAFETY: GrowthSource guarantees the extent for our lifetime.
        if let Err(err) = unsafe { self.add_pool(extent) } {
            #[cfg(feature = "logging")]
            debug!(requested = n, len = extent.len(), %err, "growth extent rejected");
            #[cfg(not(feature = "logging"))]
            let _ = err;
            return Err(oom());
        }
        self.cursor = self.pools.last().map(|p| p.first);
        self.growths += 1;

        #[cfg(feature = "logging")]
        debug!(requested = n, len = extent.len(), "heap grew");

        Ok(())
    }

    /// Pool index whose block positions include `addr`.
    fn pool_index(&self, addr: usize) -> Option<usize> {
        self.pools.iter().position(|p| p.spans(addr))
    }

    /// Next-fit search from the cursor, wrapping over every pool.
    fn find_fit(&self, asize: usize) -> Option<Block> {
        let first_pool = self.pools.first()?;
        let count = self.pools.len();
        let (start_pool, start) = self
            .cursor
            .and_then(|c| self.pool_index(c.addr()).map(|i| (i, c)))
            .unwrap_or((0, first_pool.first));

        for step in 0..=count {
            let pool = &self.pools[(start_pool + step) % count];
            let (mut block, stop) = match step {
                0 => (start, None),
                s if s == count => (pool.first, Some(start)),
                _ => (pool.first, None),
            };

            // SAFETY: block walks header positions of a consistent pool and
            // stops at its epilogue.
            unsafe {
                while Some(block) != stop && !block.is_epilogue() {
                    if !block.is_allocated() && block.size() >= asize {
                        return Some(block);
                    }
                    block = block.next();
                }
            }
        }
        None
    }

    /// Marks `block` allocated, splitting off a free remainder when it is at
    /// least a minimum block.
    ///
    /// # Safety
    /// `block` is free and at least `asize` bytes.
    unsafe fn place(&mut self, block: Block, asize: usize) -> NonNull<u8> {
        unsafe {
            let size = block.size();
            let prev_allocated = block.prev_allocated();
            let remainder = size - asize;

            if remainder >= MIN_BLOCK {
                block.write(asize, true, prev_allocated);
                let rest = block.next();
                rest.write(remainder, false, true);
                rest.write_footer();
                self.cursor = Some(rest);

                #[cfg(feature = "logging")]
                trace!(addr = block.addr(), asize, remainder, "split block");
            } else {
                block.write(size, true, prev_allocated);
                let next = block.next();
                next.set_prev_allocated(true);
                self.cursor = Some(next);
            }

            let payload = block.payload();
            if let Some(pattern) = self.config.alloc_pattern {
                payload.as_ptr().write_bytes(pattern, block.size() - WORD);
            }
            payload
        }
    }

    /// Returns a block to the heap, coalescing with free neighbours.
    ///
    /// When `verify_frees` is set, the heap is walked first and a pointer
    /// that is not a live block panics.
    ///
    /// # Safety
    /// - `ptr` was returned by `malloc`/`realloc` on this heap
    /// - `ptr` has not been freed since
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        if self.config.verify_frees {
            if let Err(err) = self.check_live(ptr) {
                panic!("DynMem::free: {err}");
            }
        }
        unsafe { self.release(ptr) }
    }

    /// Frees `ptr` after walking the heap to verify it is a live block.
    ///
    /// # Errors
    /// `InvalidFree` for anything but the payload of a live block;
    /// `CorruptHeap` if the walk itself finds damage. Nothing is modified
    /// on error.
    pub fn try_free(&mut self, ptr: NonNull<u8>) -> MemoryResult<()> {
        self.check_live(ptr)?;
        // SAFETY: verified to be a live block of this heap.
        unsafe { self.release(ptr) };
        Ok(())
    }

    /// # Safety
    /// `ptr` is a live block payload of this heap.
    unsafe fn release(&mut self, ptr: NonNull<u8>) {
        unsafe {
            let block = Block::from_payload(ptr);
            if let Some(pattern) = self.config.dealloc_pattern {
                ptr.as_ptr().write_bytes(pattern, block.size() - WORD);
            }
            self.coalesce(block);
        }
    }

    /// Marks `block` free and merges it with free neighbours. The cursor
    /// moves to the merged block.
    ///
    /// # Safety
    /// `block` is an allocated block of this heap.
    unsafe fn coalesce(&mut self, block: Block) -> Block {
        unsafe {
            let original = block.size();
            let mut start = block;
            let mut size = original;

            let next = block.next();
            if !next.is_allocated() {
                size += next.size();
            }
            if !block.prev_allocated() {
                start = block.prev();
                size += start.size();
            }

            let prev_allocated = start.prev_allocated();
            start.write(size, false, prev_allocated);
            start.write_footer();
            start.next().set_prev_allocated(false);
            self.cursor = Some(start);

            #[cfg(feature = "logging")]
            trace!(
                addr = start.addr(),
                size,
                merged = size != original,
                "freed block"
            );

            start
        }
    }

    /// Resizes the block at `ptr` to hold at least `n` bytes.
    ///
    /// Shrinks in place, grows in place into a free successor when it is
    /// large enough, and otherwise moves: allocate, copy, free. On error the
    /// original block is untouched.
    ///
    /// # Errors
    /// - `InvalidArgument` for `n == 0`
    /// - `OutOfMemory` if the block cannot grow and no new block fits
    ///
    /// # Safety
    /// - `ptr` was returned by `malloc`/`realloc` on this heap and is live
    /// - On success only the returned pointer may be used
    pub unsafe fn realloc(&mut self, ptr: NonNull<u8>, n: usize) -> MemoryResult<NonNull<u8>> {
        if n == 0 {
            return Err(MemoryError::zero_size());
        }
        if self.config.verify_frees {
            if let Err(err) = self.check_live(ptr) {
                panic!("DynMem::realloc: {err}");
            }
        }
        let asize = block_size_for(n).ok_or_else(|| MemoryError::out_of_memory(n, GRANULE))?;

        unsafe {
            let block = Block::from_payload(ptr);
            let size = block.size();
            let prev_allocated = block.prev_allocated();

            if asize <= size {
                if size - asize >= MIN_BLOCK {
                    block.write(asize, true, prev_allocated);
                    let rest = block.next();
                    rest.write(size - asize, true, true);
                    self.coalesce(rest);
                }
                return Ok(ptr);
            }

            let next = block.next();
            if !next.is_allocated() && size + next.size() >= asize {
                let total = size + next.size();
                let absorbed_cursor = self.cursor == Some(next);

                let after = if total - asize >= MIN_BLOCK {
                    block.write(asize, true, prev_allocated);
                    let rest = block.next();
                    rest.write(total - asize, false, true);
                    rest.write_footer();
                    rest
                } else {
                    block.write(total, true, prev_allocated);
                    let after = block.next();
                    after.set_prev_allocated(true);
                    after
                };
                if absorbed_cursor {
                    self.cursor = Some(after);
                }
                return Ok(ptr);
            }

            let moved = self.malloc(n)?;
            let keep = (size - WORD).min(n);
            core::ptr::copy_nonoverlapping(ptr.as_ptr(), moved.as_ptr(), keep);
            self.release(ptr);
            Ok(moved)
        }
    }

    /// Payload bytes of the live block at `ptr`; at least what was
    /// requested.
    ///
    /// # Safety
    /// `ptr` is a live block payload of this heap.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        unsafe { Block::from_payload(ptr).size() - WORD }
    }

    /// True if `ptr` lies inside one of the registered pools.
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        let addr = ptr.as_ptr() as usize;
        self.pools
            .iter()
            .any(|p| addr >= p.first.addr() && addr < p.end())
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Registered pools in registration order.
    pub fn pools(&self) -> impl Iterator<Item = PoolInfo> + '_ {
        self.pools.iter().map(|p| PoolInfo {
            start: p.extent.addr(),
            total_len: p.extent.len(),
            usable_len: p.usable_len,
        })
    }

    /// How many times the growth source supplied an extent.
    pub fn growth_count(&self) -> usize {
        self.growths
    }

    pub fn growth(&self) -> &G {
        &self.growth
    }

    pub fn config(&self) -> &DynMemConfig {
        &self.config
    }
}

impl<G: GrowthSource> core::fmt::Debug for DynMem<G> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DynMem")
            .field("config", &self.config)
            .field("pools", &self.pools.len())
            .field("growths", &self.growths)
            .finish_non_exhaustive()
    }
}
