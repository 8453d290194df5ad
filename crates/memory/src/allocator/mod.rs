//! Allocator interface and its variants
//!
//! [`Allocator`] is the single seam through which every layer obtains raw
//! memory. A layer holds any `A: Allocator`, including `&A`, `Box<A>` and
//! `&dyn Allocator`, and never assumes a process-wide default.
//!
//! Provided variants:
//! - [`SystemAllocator`]: the platform allocator
//! - [`AbortOnExhaustion`] / [`SignalOnExhaustion`]: exhaustion policies
//! - [`TrackedAllocator`]: counters and fill patterns for debugging
//! - [`PageAllocator`]: anonymous page mappings (unix)
//! - [`Locked`]: mutex-guarded heap layers usable as allocators

mod exhaustion;
mod locked;
#[cfg(unix)]
mod pages;
mod system;
mod tracked;
mod traits;

pub use exhaustion::{recover_exhaustion, AbortOnExhaustion, ExhaustionHook, SignalOnExhaustion};
pub use locked::Locked;
#[cfg(unix)]
pub use pages::PageAllocator;
pub use system::SystemAllocator;
pub use tracked::{AllocStats, TrackedAllocator};
pub use traits::{validate_layout, Allocator};
