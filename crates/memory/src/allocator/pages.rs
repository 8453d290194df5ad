//! Page-granular allocator over anonymous mappings
//!
//! Every block is its own private anonymous mapping, rounded up to whole
//! pages. Useful as the backing allocator of a
//! [`PoolCache`](crate::pool_cache::PoolCache) whose `page_size` matches the
//! system page size, or as a [`DynMem`](crate::dynmem::DynMem) growth source.

use core::alloc::Layout;
use core::ptr::{self, NonNull};

#[cfg(feature = "logging")]
use tracing::error;

use super::traits::validate_layout;
use super::Allocator;
use crate::error::{MemoryError, MemoryResult};
use crate::utils::align_up;

/// Allocator handing out `mmap`ed pages.
///
/// Alignment is limited to the page size. `resize` is not supported.
#[derive(Debug, Clone, Copy)]
pub struct PageAllocator {
    page_size: usize,
}

impl PageAllocator {
    /// Creates an allocator using the system page size.
    pub fn new() -> Self {
        // SAFETY: sysconf has no preconditions.
        let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        let page_size = usize::try_from(raw)
            .ok()
            .filter(|p| p.is_power_of_two())
            .unwrap_or(4096);
        Self { page_size }
    }

    /// The granularity every request is rounded up to.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn mapping_len(&self, layout: Layout) -> usize {
        align_up(layout.size(), self.page_size)
    }
}

impl Default for PageAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: Each block is a fresh private mapping of `mapping_len` bytes that
// no other allocation overlaps; release unmaps exactly that range.
unsafe impl Allocator for PageAllocator {
    unsafe fn acquire(&self, layout: Layout) -> MemoryResult<NonNull<[u8]>> {
        validate_layout(layout)?;
        if layout.align() > self.page_size {
            return Err(MemoryError::invalid_alignment(layout.align(), self.page_size));
        }

        let len = self.mapping_len(layout);
        // SAFETY: anonymous private mapping, no file descriptor involved.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if addr == libc::MAP_FAILED {
            return Err(MemoryError::out_of_memory_with_layout(layout));
        }
        match NonNull::new(addr.cast::<u8>()) {
            Some(start) => Ok(NonNull::slice_from_raw_parts(start, len)),
            None => Err(MemoryError::out_of_memory_with_layout(layout)),
        }
    }

    fn supports_release(&self) -> bool {
        true
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        let len = self.mapping_len(layout);
        // SAFETY: caller contract; ptr is the start of a mapping of len bytes.
        let result = unsafe { libc::munmap(ptr.as_ptr().cast(), len) };

        if result != 0 {
            #[cfg(feature = "logging")]
            error!(addr = ptr.as_ptr() as usize, len, "munmap failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounds_to_pages() {
        let alloc = PageAllocator::new();
        let layout = Layout::from_size_align(100, 8).unwrap();

        let block = unsafe { alloc.acquire(layout) }.unwrap();
        assert_eq!(block.len(), alloc.page_size());
        assert_eq!(block.cast::<u8>().as_ptr() as usize % alloc.page_size(), 0);

        unsafe {
            // Fresh anonymous pages are zeroed.
            assert_eq!(block.cast::<u8>().as_ptr().read(), 0);
            alloc.release(block.cast(), layout);
        }
    }

    #[test]
    fn test_rejects_oversized_alignment() {
        let alloc = PageAllocator::new();
        let layout = Layout::from_size_align(64, alloc.page_size() * 2).unwrap();
        let err = unsafe { alloc.acquire(layout) }.unwrap_err();
        assert_eq!(err.code(), "MEM:ARG:INVALID");
    }

    #[test]
    fn test_capabilities() {
        let alloc = PageAllocator::new();
        assert!(alloc.supports_release());
        assert!(!alloc.supports_resize());
    }
}
