//! Exhaustion policies
//!
//! Two wrappers decide what an allocation failure means for the caller:
//!
//! - [`AbortOnExhaustion`] treats memory exhaustion as fatal. It runs a
//!   replaceable hook and then terminates through
//!   [`std::alloc::handle_alloc_error`], so callers never see a failure.
//! - [`SignalOnExhaustion`] turns every failure into
//!   [`MemoryError::OutOfMemory`] and counts it. Paired with
//!   [`recover_exhaustion`] it forms an explicit recovery boundary: code
//!   inside the boundary propagates with `?`, the boundary decides what to
//!   do instead.
//!
//! Argument errors (zero-size requests, unsupported capabilities) are not
//! exhaustion and pass through both wrappers unchanged.

use core::alloc::Layout;
use core::cell::Cell;
use core::fmt;
use core::ptr::NonNull;

#[cfg(feature = "logging")]
use tracing::{error, warn};

use super::Allocator;
use crate::error::{MemoryError, MemoryResult};

/// Hook invoked before the process is terminated on exhaustion.
pub type ExhaustionHook = Box<dyn Fn(Layout, &MemoryError) + Send + Sync>;

fn default_hook(layout: Layout, err: &MemoryError) {
    #[cfg(feature = "logging")]
    error!(
        size = layout.size(),
        align = layout.align(),
        code = err.code(),
        "memory exhausted, aborting"
    );

    #[cfg(not(feature = "logging"))]
    let _ = (layout, err);
}

/// Allocator wrapper for which exhaustion is never a recoverable condition.
pub struct AbortOnExhaustion<A> {
    inner: A,
    hook: ExhaustionHook,
}

impl<A> AbortOnExhaustion<A> {
    /// Wraps `inner` with the default logging hook.
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            hook: Box::new(default_hook),
        }
    }

    /// Wraps `inner` with a custom hook.
    pub fn with_hook(inner: A, hook: ExhaustionHook) -> Self {
        Self { inner, hook }
    }

    /// Replaces the hook, returning the previous one.
    pub fn set_hook(&mut self, hook: ExhaustionHook) -> ExhaustionHook {
        core::mem::replace(&mut self.hook, hook)
    }

    /// Gets a reference to the underlying allocator
    pub fn inner(&self) -> &A {
        &self.inner
    }

    /// Consumes the wrapper and returns the underlying allocator
    pub fn into_inner(self) -> A {
        self.inner
    }

    #[cold]
    fn exhausted(&self, layout: Layout, err: &MemoryError) -> ! {
        (self.hook)(layout, err);
        std::alloc::handle_alloc_error(layout)
    }

    #[inline]
    fn check(
        &self,
        layout: Layout,
        result: MemoryResult<NonNull<[u8]>>,
    ) -> MemoryResult<NonNull<[u8]>> {
        match result {
            Err(err) if err.is_exhaustion() => self.exhausted(layout, &err),
            other => other,
        }
    }
}

impl<A: fmt::Debug> fmt::Debug for AbortOnExhaustion<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortOnExhaustion")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

// SAFETY: Successful results are the inner allocator's, unchanged.
unsafe impl<A: Allocator> Allocator for AbortOnExhaustion<A> {
    unsafe fn acquire(&self, layout: Layout) -> MemoryResult<NonNull<[u8]>> {
        let result = unsafe { self.inner.acquire(layout) };
        self.check(layout, result)
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
        let result = unsafe { self.inner.resize(ptr, old_layout, new_layout) };
        self.check(new_layout, result)
    }

    fn supports_release(&self) -> bool {
        self.inner.supports_release()
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { self.inner.release(ptr, layout) }
    }
}

/// Allocator wrapper that reports every exhaustion as `OutOfMemory`.
#[derive(Debug)]
pub struct SignalOnExhaustion<A> {
    inner: A,
    signals: Cell<usize>,
}

impl<A> SignalOnExhaustion<A> {
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            signals: Cell::new(0),
        }
    }

    /// Number of failures signalled so far.
    pub fn signal_count(&self) -> usize {
        self.signals.get()
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    pub fn into_inner(self) -> A {
        self.inner
    }

    #[inline]
    fn check(
        &self,
        layout: Layout,
        result: MemoryResult<NonNull<[u8]>>,
    ) -> MemoryResult<NonNull<[u8]>> {
        match result {
            Err(err) if err.is_exhaustion() => {
                self.signals.set(self.signals.get() + 1);

                #[cfg(feature = "logging")]
                warn!(size = layout.size(), code = err.code(), "allocation failure signalled");

                Err(MemoryError::out_of_memory_with_layout(layout))
            }
            other => other,
        }
    }
}

// SAFETY: Successful results are the inner allocator's, unchanged.
unsafe impl<A: Allocator> Allocator for SignalOnExhaustion<A> {
    unsafe fn acquire(&self, layout: Layout) -> MemoryResult<NonNull<[u8]>> {
        let result = unsafe { self.inner.acquire(layout) };
        self.check(layout, result)
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
        let result = unsafe { self.inner.resize(ptr, old_layout, new_layout) };
        self.check(new_layout, result)
    }

    fn supports_release(&self) -> bool {
        self.inner.supports_release()
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { self.inner.release(ptr, layout) }
    }
}

/// Runs `body`; if it fails with an exhaustion-class error, runs `fallback`
/// with that error instead. Every other error propagates unchanged.
///
/// # Examples
/// ```
/// use basalt_memory::allocator::recover_exhaustion;
/// use basalt_memory::MemoryError;
///
/// let value = recover_exhaustion(
///     || Err::<u32, _>(MemoryError::out_of_memory(64, 8)),
///     |_| Ok(0),
/// );
/// assert_eq!(value, Ok(0));
/// ```
pub fn recover_exhaustion<T>(
    body: impl FnOnce() -> MemoryResult<T>,
    fallback: impl FnOnce(MemoryError) -> MemoryResult<T>,
) -> MemoryResult<T> {
    match body() {
        Err(err) if err.is_exhaustion() => fallback(err),
        other => other,
    }
}
