//! Externally synchronised access to single-owner layers
//!
//! [`Pool`](crate::pool::Pool), [`PoolCache`] and [`DynMem`] take `&mut self`
//! and carry no internal locking. `Locked<T>` supplies the mutual exclusion
//! from outside, and in doing so lets a heap layer act as the
//! [`Allocator`] another layer draws from.

use core::alloc::Layout;
use core::ptr::NonNull;

use parking_lot::{Mutex, MutexGuard};

use super::traits::validate_layout;
use super::Allocator;
use crate::dynmem::{DynMem, GrowthSource, GRANULE};
use crate::error::{MemoryError, MemoryResult};
use crate::pool_cache::PoolCache;
use crate::utils::WORD;

/// A value behind a `parking_lot` mutex.
#[derive(Debug, Default)]
pub struct Locked<T> {
    inner: Mutex<T>,
}

impl<T> Locked<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Locks the value, blocking until it is available.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }

    /// Runs `f` with exclusive access.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

// SAFETY: Blocks come from DynMem::malloc and go back through free/realloc
// under the same lock. Payloads are granule-aligned, larger alignments are
// rejected.
unsafe impl<G: GrowthSource> Allocator for Locked<DynMem<G>> {
    unsafe fn acquire(&self, layout: Layout) -> MemoryResult<NonNull<[u8]>> {
        validate_layout(layout)?;
        if layout.align() > GRANULE {
            return Err(MemoryError::invalid_alignment(layout.align(), GRANULE));
        }
        let ptr = self.lock().malloc(layout.size())?;
        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    fn supports_resize(&self) -> bool {
        true
    }

    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        _old_layout: Layout,
        new_layout: Layout,
    ) -> MemoryResult<NonNull<[u8]>> {
        validate_layout(new_layout)?;
        if new_layout.align() > GRANULE {
            return Err(MemoryError::invalid_alignment(new_layout.align(), GRANULE));
        }
        // SAFETY: caller contract; ptr is a live block of this heap.
        let moved = unsafe { self.lock().realloc(ptr, new_layout.size())? };
        Ok(NonNull::slice_from_raw_parts(moved, new_layout.size()))
    }

    fn supports_release(&self) -> bool {
        true
    }

    unsafe fn release(&self, ptr: NonNull<u8>, _layout: Layout) {
        // SAFETY: caller contract; ptr is a live block of this heap.
        unsafe { self.lock().free(ptr) }
    }
}

// SAFETY: Objects come from PoolCache::alloc and go back through free under
// the same lock. Requests larger than the cached object size or aligned
// beyond a word are rejected.
unsafe impl<A: Allocator> Allocator for Locked<PoolCache<A>> {
    unsafe fn acquire(&self, layout: Layout) -> MemoryResult<NonNull<[u8]>> {
        validate_layout(layout)?;
        if layout.align() > WORD {
            return Err(MemoryError::invalid_alignment(layout.align(), WORD));
        }

        let mut cache = self.lock();
        let object_size = cache.object_size();
        if layout.size() > object_size {
            return Err(MemoryError::invalid_argument(format!(
                "request of {} bytes exceeds cached object size {object_size}",
                layout.size()
            )));
        }
        let ptr = cache.alloc()?;
        Ok(NonNull::slice_from_raw_parts(ptr, object_size))
    }

    fn supports_release(&self) -> bool {
        true
    }

    unsafe fn release(&self, ptr: NonNull<u8>, _layout: Layout) {
        // SAFETY: caller contract; ptr is a live object of this cache.
        unsafe { self.lock().free(ptr) }
    }
}
