//! Growth sources for [`DynMem`](super::DynMem)
//!
//! When no free block fits a request, the heap asks its growth source for
//! one more extent, registers it and retries once. A source that returns
//! `None` is indistinguishable from a heap that cannot grow.

use core::alloc::Layout;
use core::fmt;
use core::ptr::NonNull;

#[cfg(feature = "logging")]
use tracing::debug;

use super::block::GRANULE;
use crate::allocator::Allocator;
use crate::extent::Extent;
use crate::utils::checked_align_up;

/// Supplies extra extents on demand.
///
/// # Safety
///
/// Every returned extent must be valid for reads and writes, must not
/// overlap any other extent handed out, and must stay valid and otherwise
/// unused for as long as the heap that received it is alive.
pub unsafe trait GrowthSource {
    /// Returns an extent of at least `min_len` bytes, or `None`.
    fn grow(&mut self, min_len: usize) -> Option<Extent>;
}

/// A heap that never grows.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGrowth;

// SAFETY: never returns an extent.
unsafe impl GrowthSource for NoGrowth {
    fn grow(&mut self, _min_len: usize) -> Option<Extent> {
        None
    }
}

// SAFETY: forwards to a source upholding the same contract.
unsafe impl<G: GrowthSource + ?Sized> GrowthSource for Box<G> {
    fn grow(&mut self, min_len: usize) -> Option<Extent> {
        (**self).grow(min_len)
    }
}

/// Adapts a closure into a growth source.
///
/// ```
/// use basalt_memory::dynmem::{DynMem, GrowFn};
/// use basalt_memory::extent::Extent;
///
/// let mut spare: Vec<Box<[u8]>> = vec![vec![0u8; 4096].into_boxed_slice()];
/// let growth = unsafe {
///     GrowFn::new(move |min_len: usize| {
///         let buf = spare.pop().filter(|b| b.len() >= min_len)?;
///         Some(Extent::from_slice(Box::leak(buf)))
///     })
/// };
/// let mut heap = DynMem::with_growth(Default::default(), growth);
/// assert!(heap.malloc(100).is_ok());
/// assert_eq!(heap.pool_count(), 1);
/// ```
pub struct GrowFn<F>(F);

impl<F: FnMut(usize) -> Option<Extent>> GrowFn<F> {
    /// # Safety
    /// Every extent `f` returns must satisfy the [`GrowthSource`] contract.
    pub unsafe fn new(f: F) -> Self {
        Self(f)
    }
}

// SAFETY: the constructor's caller vouched for the closure.
unsafe impl<F: FnMut(usize) -> Option<Extent>> GrowthSource for GrowFn<F> {
    fn grow(&mut self, min_len: usize) -> Option<Extent> {
        (self.0)(min_len)
    }
}

/// Grows a heap with chunks acquired from an [`Allocator`].
///
/// Requests are rounded up to `chunk` bytes. Every chunk is released back to
/// the allocator when the source is dropped, which happens together with
/// the heap owning it.
pub struct AllocatorGrowth<A: Allocator> {
    allocator: A,
    chunk: usize,
    acquired: Vec<(NonNull<u8>, Layout)>,
}

// SAFETY: the source exclusively owns the chunks it acquired.
unsafe impl<A: Allocator + Send> Send for AllocatorGrowth<A> {}

impl<A: Allocator> AllocatorGrowth<A> {
    /// Source acquiring at least `chunk` bytes per growth step.
    pub fn new(allocator: A, chunk: usize) -> Self {
        Self {
            allocator,
            chunk: chunk.max(GRANULE),
            acquired: Vec::new(),
        }
    }

    /// Number of chunks acquired so far.
    pub fn chunks(&self) -> usize {
        self.acquired.len()
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }
}

// SAFETY: each chunk is a fresh allocation owned by this source until drop,
// and the source is dropped no earlier than the heap it grows.
unsafe impl<A: Allocator> GrowthSource for AllocatorGrowth<A> {
    fn grow(&mut self, min_len: usize) -> Option<Extent> {
        let len = checked_align_up(min_len.max(self.chunk), GRANULE)?;
        let layout = Layout::from_size_align(len, GRANULE).ok()?;
        // SAFETY: layout has non-zero size.
        let block = unsafe { self.allocator.acquire(layout) }.ok()?;
        let extent = Extent::from_raw_slice(block);
        self.acquired.push((extent.start(), layout));

        #[cfg(feature = "logging")]
        debug!(len = extent.len(), chunks = self.acquired.len(), "acquired heap chunk");

        Some(extent)
    }
}

impl<A: Allocator> Drop for AllocatorGrowth<A> {
    fn drop(&mut self) {
        if !self.allocator.supports_release() {
            return;
        }
        for (ptr, layout) in self.acquired.drain(..) {
            // SAFETY: acquired from this allocator with this layout.
            unsafe { self.allocator.release(ptr, layout) };
        }
    }
}

impl<A: Allocator> fmt::Debug for AllocatorGrowth<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocatorGrowth")
            .field("chunk", &self.chunk)
            .field("chunks", &self.acquired.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{SystemAllocator, TrackedAllocator};
    use crate::error::MemoryResult;

    /// Hands out 64 bytes more than requested.
    struct Padded;

    impl Padded {
        fn padded(layout: Layout) -> Layout {
            Layout::from_size_align(layout.size() + 64, layout.align()).unwrap()
        }
    }

    unsafe impl Allocator for Padded {
        unsafe fn acquire(&self, layout: Layout) -> MemoryResult<NonNull<[u8]>> {
            unsafe { SystemAllocator.acquire(Self::padded(layout)) }
        }

        fn supports_release(&self) -> bool {
            true
        }

        unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
            unsafe { SystemAllocator.release(ptr, Self::padded(layout)) }
        }
    }

    #[test]
    fn test_no_growth() {
        assert!(NoGrowth.grow(16).is_none());
    }

    #[test]
    fn test_allocator_growth_rounds_to_chunk() {
        let tracked = TrackedAllocator::new(SystemAllocator::new());
        {
            let mut growth = AllocatorGrowth::new(&tracked, 1024);
            let small = growth.grow(10).unwrap();
            assert_eq!(small.len(), 1024);

            let large = growth.grow(5000).unwrap();
            assert_eq!(large.len(), 5008);
            assert_eq!(large.addr() % GRANULE, 0);
            assert_eq!(growth.chunks(), 2);
        }
        assert_eq!(tracked.stats().releases, 2);
        assert_eq!(tracked.live_bytes(), 0);
    }

    #[test]
    fn test_allocator_growth_uses_whole_block() {
        let mut growth = AllocatorGrowth::new(Padded, 256);
        let extent = growth.grow(100).unwrap();
        assert_eq!(extent.len(), 256 + 64);
        assert_eq!(extent.addr() % GRANULE, 0);
    }
}
