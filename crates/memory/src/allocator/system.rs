//! System allocator implementation
//!
//! Wraps the platform allocator behind the [`Allocator`] interface. It is the
//! usual backing allocator for a [`PoolCache`](crate::pool_cache::PoolCache)
//! or an [`AllocatorGrowth`](crate::dynmem::AllocatorGrowth) source.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;
use std::alloc::System;

use super::traits::validate_layout;
use super::Allocator;
use crate::error::{MemoryError, MemoryResult};

/// Wrapper for the system's default allocator
///
/// Supports every capability: `acquire`, `resize` and `release`.
///
/// # Thread Safety
/// The system allocator is inherently thread-safe.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAllocator;

impl SystemAllocator {
    /// Creates a new SystemAllocator
    #[inline]
    pub const fn new() -> Self {
        Self
    }
}

// SAFETY: Every block comes from `System` with the caller's layout and is
// handed back to `System` with the same layout.
unsafe impl Allocator for SystemAllocator {
    #[inline]
    unsafe fn acquire(&self, layout: Layout) -> MemoryResult<NonNull<[u8]>> {
        validate_layout(layout)?;

        // SAFETY: layout has non-zero size.
        let ptr = unsafe { System.alloc(layout) };
        match NonNull::new(ptr) {
            Some(ptr) => Ok(NonNull::slice_from_raw_parts(ptr, layout.size())),
            None => Err(MemoryError::out_of_memory_with_layout(layout)),
        }
    }

    #[inline]
    fn supports_resize(&self) -> bool {
        true
    }

    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> MemoryResult<NonNull<[u8]>> {
        validate_layout(new_layout)?;

        if old_layout.align() == new_layout.align() {
            // SAFETY: ptr came from System with old_layout; new size is non-zero.
            let new_ptr = unsafe { System.realloc(ptr.as_ptr(), old_layout, new_layout.size()) };
            return match NonNull::new(new_ptr) {
                Some(p) => Ok(NonNull::slice_from_raw_parts(p, new_layout.size())),
                None => Err(MemoryError::out_of_memory_with_layout(new_layout)),
            };
        }

        // Alignment changes: allocate + copy + release
        let new_block = unsafe { self.acquire(new_layout)? };
        let copy_size = old_layout.size().min(new_layout.size());
        // SAFETY: both blocks are live, distinct and at least copy_size long.
        unsafe {
            core::ptr::copy_nonoverlapping(ptr.as_ptr(), new_block.cast::<u8>().as_ptr(), copy_size);
            self.release(ptr, old_layout);
        }
        Ok(new_block)
    }

    #[inline]
    fn supports_release(&self) -> bool {
        true
    }

    #[inline]
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: caller contract; ptr came from System with layout.
        unsafe { System.dealloc(ptr.as_ptr(), layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release() {
        let alloc = SystemAllocator::new();
        let layout = Layout::from_size_align(128, 16).unwrap();

        let block = unsafe { alloc.acquire(layout) }.unwrap();
        assert_eq!(block.len(), 128);
        assert_eq!(block.cast::<u8>().as_ptr() as usize % 16, 0);

        unsafe {
            block.cast::<u8>().as_ptr().write_bytes(0x5A, 128);
            alloc.release(block.cast(), layout);
        }
    }

    #[test]
    fn test_zero_size_rejected() {
        let alloc = SystemAllocator::new();
        let err = unsafe { alloc.acquire(Layout::from_size_align(0, 1).unwrap()) }.unwrap_err();
        assert_eq!(err.code(), "MEM:ARG:INVALID");
    }

    #[test]
    fn test_resize_preserves_contents() {
        let alloc = SystemAllocator::new();
        let old = Layout::from_size_align(8, 8).unwrap();
        let new = Layout::from_size_align(256, 8).unwrap();

        unsafe {
            let block = alloc.acquire(old).unwrap().cast::<u8>();
            for i in 0..8 {
                block.as_ptr().add(i).write(i as u8);
            }
            let grown = alloc.resize(block, old, new).unwrap().cast::<u8>();
            for i in 0..8 {
                assert_eq!(grown.as_ptr().add(i).read(), i as u8);
            }
            alloc.release(grown, new);
        }
    }

    #[test]
    fn test_resize_changes_alignment() {
        let alloc = SystemAllocator::new();
        let old = Layout::from_size_align(16, 8).unwrap();
        let new = Layout::from_size_align(64, 64).unwrap();

        unsafe {
            let block = alloc.acquire(old).unwrap().cast::<u8>();
            block.as_ptr().write(0xAB);
            let moved = alloc.resize(block, old, new).unwrap().cast::<u8>();
            assert_eq!(moved.as_ptr() as usize % 64, 0);
            assert_eq!(moved.as_ptr().read(), 0xAB);
            alloc.release(moved, new);
        }
    }
}
