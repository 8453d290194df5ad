//! Tracked allocator implementation
//!
//! Debug-instrumented wrapper: forwards every call to another allocator and
//! records what happened, optionally filling fresh and released blocks with
//! recognisable byte patterns.
//!
//! ## Invariants
//!
//! - Every successful acquire is counted and adds to live bytes
//! - Every release subtracts from live bytes
//! - Failed operations only bump the failure counter
//! - A successful resize is accounted as the size difference
//!
//! Counters use `Cell`: the wrapper is single-owner like every layer in
//! this crate. Wrap it in [`Locked`](super::Locked) to share it.

use core::alloc::Layout;
use core::cell::Cell;
use core::ptr::NonNull;

use super::Allocator;
use crate::error::MemoryResult;

/// Snapshot of a [`TrackedAllocator`]'s counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocStats {
    pub acquires: usize,
    pub releases: usize,
    pub resizes: usize,
    pub failures: usize,
    pub live_bytes: usize,
    pub peak_bytes: usize,
}

impl AllocStats {
    /// Blocks acquired but not yet released.
    pub fn outstanding(&self) -> usize {
        self.acquires.saturating_sub(self.releases)
    }
}

/// A wrapper allocator that tracks memory usage statistics
#[derive(Debug)]
pub struct TrackedAllocator<A> {
    inner: A,
    stats: Cell<AllocStats>,
    alloc_pattern: Option<u8>,
    dealloc_pattern: Option<u8>,
}

impl<A> TrackedAllocator<A> {
    /// Creates a new TrackedAllocator wrapping the provided allocator
    pub fn new(allocator: A) -> Self {
        Self {
            inner: allocator,
            stats: Cell::new(AllocStats::default()),
            alloc_pattern: None,
            dealloc_pattern: None,
        }
    }

    /// Fills acquired blocks with `alloc` and released blocks with `dealloc`.
    #[must_use]
    pub fn with_patterns(mut self, alloc: Option<u8>, dealloc: Option<u8>) -> Self {
        self.alloc_pattern = alloc;
        self.dealloc_pattern = dealloc;
        self
    }

    /// Gets a reference to the underlying allocator
    pub fn inner(&self) -> &A {
        &self.inner
    }

    /// Consumes the tracker and returns the underlying allocator
    pub fn into_inner(self) -> A {
        self.inner
    }

    /// Get detailed statistics snapshot
    pub fn stats(&self) -> AllocStats {
        self.stats.get()
    }

    /// Returns the total bytes currently allocated
    pub fn live_bytes(&self) -> usize {
        self.stats.get().live_bytes
    }

    /// Check if there are any outstanding blocks
    pub fn has_leaks(&self) -> bool {
        self.stats.get().outstanding() > 0
    }

    /// Reset counters while keeping live byte accounting
    pub fn reset_stats(&self) {
        let live = self.stats.get().live_bytes;
        self.stats.set(AllocStats {
            live_bytes: live,
            peak_bytes: live,
            ..AllocStats::default()
        });
    }

    fn update(&self, f: impl FnOnce(&mut AllocStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        stats.peak_bytes = stats.peak_bytes.max(stats.live_bytes);
        self.stats.set(stats);
    }
}

// SAFETY: TrackedAllocator forwards to the inner allocator unchanged;
// pattern fills stay inside blocks the caller owns at that moment.
unsafe impl<A: Allocator> Allocator for TrackedAllocator<A> {
    unsafe fn acquire(&self, layout: Layout) -> MemoryResult<NonNull<[u8]>> {
        match unsafe { self.inner.acquire(layout) } {
            Ok(block) => {
                if let Some(pattern) = self.alloc_pattern {
                    // SAFETY: the fresh block is valid for layout.size() bytes.
                    unsafe { block.cast::<u8>().as_ptr().write_bytes(pattern, layout.size()) };
                }
                self.update(|s| {
                    s.acquires += 1;
                    s.live_bytes += layout.size();
                });
                Ok(block)
            }
            Err(err) => {
                self.update(|s| s.failures += 1);
                Err(err)
            }
        }
    }

    fn supports_resize(&self) -> bool {
        self.inner.supports_resize()
    }

    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> MemoryResult<NonNull<[u8]>> {
        match unsafe { self.inner.resize(ptr, old_layout, new_layout) } {
            Ok(block) => {
                self.update(|s| {
                    s.resizes += 1;
                    s.live_bytes = s.live_bytes - old_layout.size() + new_layout.size();
                });
                Ok(block)
            }
            Err(err) => {
                self.update(|s| s.failures += 1);
                Err(err)
            }
        }
    }

    fn supports_release(&self) -> bool {
        self.inner.supports_release()
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        if let Some(pattern) = self.dealloc_pattern {
            // SAFETY: caller still owns the block until it is released below.
            unsafe { ptr.as_ptr().write_bytes(pattern, layout.size()) };
        }
        unsafe { self.inner.release(ptr, layout) };
        self.update(|s| {
            s.releases += 1;
            s.live_bytes = s.live_bytes.saturating_sub(layout.size());
        });
    }
}
