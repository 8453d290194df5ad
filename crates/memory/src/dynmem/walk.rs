//! Heap walks: validation, statistics and pointer verification
//!
//! Every walk checks each header before trusting it, so a damaged heap is
//! reported as [`MemoryError::CorruptHeap`] instead of being followed out of
//! bounds.

use core::ptr::NonNull;

use super::block::{Block, MIN_BLOCK};
use super::{DynMem, GrowthSource, GRANULE};
use crate::error::{MemoryError, MemoryResult};
use crate::utils::is_aligned;

/// Result of a successful [`DynMem::validate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub pools: usize,
    /// Usable bytes across all pools
    pub total_bytes: usize,
    pub allocated_bytes: usize,
    pub free_bytes: usize,
    pub allocated_blocks: usize,
    pub free_blocks: usize,
    /// Largest single free block, in bytes including its header
    pub largest_free: usize,
}

impl HeapStats {
    /// Share of free memory outside the largest free block, 0 to 100.
    pub fn fragmentation_percent(&self) -> f64 {
        if self.free_bytes == 0 {
            0.0
        } else {
            (1.0 - self.largest_free as f64 / self.free_bytes as f64) * 100.0
        }
    }
}

/// One block as seen by [`DynMem::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Header address
    pub addr: usize,
    /// Block size including the header
    pub size: usize,
    pub allocated: bool,
}

fn corrupt(addr: usize, details: impl Into<String>) -> MemoryError {
    MemoryError::corrupt_heap("dynmem", addr, details)
}

impl<G: GrowthSource> DynMem<G> {
    /// Walks pool `index`, checking every tag, and calls `visit` per block.
    fn walk_pool(&self, index: usize, mut visit: impl FnMut(Block, usize, bool)) -> MemoryResult<()> {
        let pool = &self.pools[index];
        let end = pool.end();
        let mut block = pool.first;
        let mut prev_allocated = true;
        let mut total = 0usize;

        loop {
            let addr = block.addr();
            // SAFETY: addr lies in [first, end] by the bounds checks below,
            // so every header read stays inside the pool.
            unsafe {
                if addr == end {
                    if !block.is_epilogue() {
                        return Err(corrupt(addr, "malformed epilogue"));
                    }
                    if block.prev_allocated() != prev_allocated {
                        return Err(corrupt(addr, "epilogue PREV_ALLOC does not match last block"));
                    }
                    break;
                }

                let size = block.size();
                let allocated = block.is_allocated();
                if size < MIN_BLOCK || size > end - addr {
                    return Err(corrupt(addr, format!("block size {size} out of bounds")));
                }
                if block.prev_allocated() != prev_allocated {
                    return Err(corrupt(addr, "PREV_ALLOC does not match predecessor"));
                }
                if !allocated {
                    if !prev_allocated {
                        return Err(corrupt(addr, "adjacent free blocks"));
                    }
                    let footer = block.footer();
                    if footer != size {
                        return Err(corrupt(
                            addr,
                            format!("footer {footer} does not match header {size}"),
                        ));
                    }
                }

                visit(block, size, allocated);
                total += size;
                prev_allocated = allocated;
                block = block.next();
            }
        }

        if total != pool.usable_len {
            return Err(corrupt(
                pool.first.addr(),
                format!("blocks sum to {total}, pool holds {}", pool.usable_len),
            ));
        }
        Ok(())
    }

    /// Walks every pool and checks all boundary tags.
    ///
    /// # Errors
    /// `CorruptHeap` on a tag or footer mismatch, adjacent free blocks, a
    /// size sum that differs from the pool, a malformed epilogue, or a
    /// cursor that is not at a block boundary.
    pub fn validate(&self) -> MemoryResult<HeapStats> {
        let mut stats = HeapStats {
            pools: self.pools.len(),
            ..HeapStats::default()
        };
        let mut cursor_found = self.cursor.is_none();

        for (index, pool) in self.pools.iter().enumerate() {
            stats.total_bytes += pool.usable_len;
            self.walk_pool(index, |block, size, allocated| {
                if Some(block) == self.cursor {
                    cursor_found = true;
                }
                if allocated {
                    stats.allocated_blocks += 1;
                    stats.allocated_bytes += size;
                } else {
                    stats.free_blocks += 1;
                    stats.free_bytes += size;
                    stats.largest_free = stats.largest_free.max(size);
                }
            })?;
            if self.cursor.is_some_and(|c| c.addr() == pool.end()) {
                cursor_found = true;
            }
        }

        if !cursor_found {
            let addr = self.cursor.map_or(0, Block::addr);
            return Err(corrupt(addr, "cursor is not at a block boundary"));
        }
        Ok(stats)
    }

    /// Every block of every pool in address order within each pool.
    pub fn blocks(&self) -> MemoryResult<Vec<BlockInfo>> {
        let mut blocks = Vec::new();
        for index in 0..self.pools.len() {
            self.walk_pool(index, |block, size, allocated| {
                blocks.push(BlockInfo {
                    addr: block.addr(),
                    size,
                    allocated,
                });
            })?;
        }
        Ok(blocks)
    }

    /// Verifies `ptr` is the payload of a live block.
    pub(crate) fn check_live(&self, ptr: NonNull<u8>) -> MemoryResult<()> {
        let addr = ptr.as_ptr() as usize;
        if !is_aligned(addr, GRANULE) {
            return Err(MemoryError::invalid_free(addr, "misaligned pointer"));
        }
        let Some(index) = self
            .pools
            .iter()
            .position(|p| addr > p.first.addr() && addr < p.end())
        else {
            return Err(MemoryError::invalid_free(addr, "outside every pool"));
        };

        let mut found = None;
        self.walk_pool(index, |block, _, allocated| {
            if block.payload().as_ptr() as usize == addr {
                found = Some(allocated);
            }
        })?;

        match found {
            Some(true) => Ok(()),
            Some(false) => Err(MemoryError::invalid_free(addr, "block is already free")),
            None => Err(MemoryError::invalid_free(addr, "not a block payload")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DynMemConfig;
    use crate::extent::Extent;
    use crate::utils::WORD;

    #[repr(align(16))]
    struct Arena([u8; 512]);

    #[test]
    fn test_stats_and_fragmentation() {
        let mut arena = Arena([0; 512]);
        let mut heap = DynMem::with_config(DynMemConfig::production());
        unsafe { heap.add_pool(Extent::from_slice(&mut arena.0)) }.unwrap();

        let a = heap.malloc(40).unwrap();
        let _b = heap.malloc(40).unwrap();
        unsafe { heap.free(a) };

        let stats = heap.validate().unwrap();
        assert_eq!(stats.pools, 1);
        assert_eq!(stats.allocated_blocks, 1);
        assert_eq!(stats.free_blocks, 2);
        assert_eq!(stats.free_bytes + stats.allocated_bytes, stats.total_bytes);
        assert!(stats.fragmentation_percent() > 0.0);

        let blocks = heap.blocks().unwrap();
        assert_eq!(blocks.len(), 3);
        assert!(!blocks[0].allocated);
        assert!(blocks[1].allocated);
    }

    #[test]
    fn test_detects_clobbered_header() {
        let mut arena = Arena([0; 512]);
        let mut heap = DynMem::with_config(DynMemConfig::production());
        unsafe { heap.add_pool(Extent::from_slice(&mut arena.0)) }.unwrap();

        let a = heap.malloc(40).unwrap();
        let b = heap.malloc(40).unwrap();
        unsafe {
            // Overrun a's payload into b's header.
            a.as_ptr().write_bytes(0xFF, 48);
        }
        let err = heap.validate().unwrap_err();
        assert!(err.is_corruption());

        // The walk also refuses to verify pointers on a damaged heap.
        assert!(heap.try_free(b).is_err());
    }

    #[test]
    fn test_detects_bad_footer() {
        let mut arena = Arena([0; 512]);
        let mut heap = DynMem::with_config(DynMemConfig::production());
        unsafe { heap.add_pool(Extent::from_slice(&mut arena.0)) }.unwrap();

        let a = heap.malloc(40).unwrap();
        unsafe {
            let block_end = a.as_ptr().add(heap.usable_size(a));
            let _ = heap.malloc(40).unwrap();
            heap.free(a);
            // a's footer is the last word of its block.
            block_end.sub(WORD).cast::<usize>().write(8);
        }
        let err = heap.validate().unwrap_err();
        assert_eq!(err.code(), "MEM:HEAP:CORRUPT");
    }
}
