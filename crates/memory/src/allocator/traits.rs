//! The allocator capability interface
//!
//! Every layer of the hierarchy obtains raw memory through [`Allocator`]:
//! `acquire` is mandatory, `resize` and `release` are optional capabilities
//! advertised through [`Allocator::supports_resize`] and
//! [`Allocator::supports_release`].
//!
//! # Safety
//!
//! ## Trait Safety Contracts
//!
//! - Pointers returned by `acquire`/`resize` must be valid for reads and
//!   writes of at least `layout.size()` bytes, aligned to `layout.align()`,
//!   and must not overlap any other live allocation of the same allocator.
//! - `release` and `resize` may only be called with a pointer previously
//!   returned by the same allocator together with the layout it was
//!   acquired with.
//!
//! ## Absent Capabilities
//!
//! An allocator without `resize` keeps the default implementation, which
//! always fails with [`MemoryError::Unsupported`]. An allocator without
//! `release` keeps the default no-op (arena-style allocators that never
//! free individually). The layers in this crate check the capability flags
//! before relying on either.

use core::alloc::Layout;
use core::ptr::NonNull;

use crate::error::{MemoryError, MemoryResult};

/// Rejects layouts that no allocator in this crate serves.
///
/// Zero-size requests are an argument error, not a valid empty allocation.
#[inline]
pub fn validate_layout(layout: Layout) -> MemoryResult<()> {
    if layout.size() == 0 {
        return Err(MemoryError::zero_size());
    }
    if layout.size() > isize::MAX as usize - (layout.align() - 1) {
        return Err(MemoryError::invalid_argument("layout size overflows isize"));
    }
    Ok(())
}

/// Capability set every memory layer builds on.
///
/// # Safety
///
/// Implementors must uphold the contracts in the module documentation.
/// Consumers hold either a concrete allocator, a reference to one, or a
/// `&dyn Allocator`; the trait is object safe.
pub unsafe trait Allocator {
    /// Obtains a fresh block for `layout`.
    ///
    /// # Safety
    /// - Memory content is uninitialized and must be initialized before use
    /// - The block must be handed back through `release` (when supported)
    ///   with the same `layout`
    unsafe fn acquire(&self, layout: Layout) -> MemoryResult<NonNull<[u8]>>;

    /// Whether [`Allocator::resize`] is implemented.
    fn supports_resize(&self) -> bool {
        false
    }

    /// Grows or shrinks a block, possibly moving it.
    ///
    /// On failure the original block is untouched and still owned by the
    /// caller.
    ///
    /// # Safety
    /// - `ptr` was returned by this allocator with `old_layout`
    /// - On success `ptr` is invalid and the returned block replaces it
    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> MemoryResult<NonNull<[u8]>> {
        let _ = (ptr, old_layout, new_layout);
        Err(MemoryError::unsupported("resize"))
    }

    /// Whether [`Allocator::release`] gives memory back.
    fn supports_release(&self) -> bool {
        false
    }

    /// Returns a block to the allocator. A no-op unless
    /// [`Allocator::supports_release`] is true.
    ///
    /// # Safety
    /// - `ptr` was returned by this allocator with `layout`
    /// - `ptr` is not used afterwards
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        let _ = (ptr, layout);
    }
}

// SAFETY: Forwarding preserves every contract of the referenced allocator.
unsafe impl<A: Allocator + ?Sized> Allocator for &A {
    #[inline]
    unsafe fn acquire(&self, layout: Layout) -> MemoryResult<NonNull<[u8]>> {
        unsafe { (**self).acquire(layout) }
    }

    #[inline]
    fn supports_resize(&self) -> bool {
        (**self).supports_resize()
    }

    #[inline]
    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> MemoryResult<NonNull<[u8]>> {
        unsafe { (**self).resize(ptr, old_layout, new_layout) }
    }

    #[inline]
    fn supports_release(&self) -> bool {
        (**self).supports_release()
    }

    #[inline]
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { (**self).release(ptr, layout) }
    }
}

// SAFETY: Forwarding preserves every contract of the referenced allocator.
unsafe impl<A: Allocator + ?Sized> Allocator for &mut A {
    #[inline]
    unsafe fn acquire(&self, layout: Layout) -> MemoryResult<NonNull<[u8]>> {
        unsafe { (**self).acquire(layout) }
    }

    #[inline]
    fn supports_resize(&self) -> bool {
        (**self).supports_resize()
    }

    #[inline]
    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> MemoryResult<NonNull<[u8]>> {
        unsafe { (**self).resize(ptr, old_layout, new_layout) }
    }

    #[inline]
    fn supports_release(&self) -> bool {
        (**self).supports_release()
    }

    #[inline]
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { (**self).release(ptr, layout) }
    }
}

// SAFETY: Forwarding preserves every contract of the boxed allocator.
unsafe impl<A: Allocator + ?Sized> Allocator for Box<A> {
    #[inline]
    unsafe fn acquire(&self, layout: Layout) -> MemoryResult<NonNull<[u8]>> {
        unsafe { (**self).acquire(layout) }
    }

    #[inline]
    fn supports_resize(&self) -> bool {
        (**self).supports_resize()
    }

    #[inline]
    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> MemoryResult<NonNull<[u8]>> {
        unsafe { (**self).resize(ptr, old_layout, new_layout) }
    }

    #[inline]
    fn supports_release(&self) -> bool {
        (**self).supports_release()
    }

    #[inline]
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { (**self).release(ptr, layout) }
    }
}
