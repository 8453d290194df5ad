//! # basalt-memory
//!
//! Layered memory management for a freestanding utility toolkit.
//!
//! Four layers, each built on the one below:
//! - [`allocator::Allocator`]: the acquire / resize / release seam every
//!   layer obtains raw memory through
//! - [`pool::Pool`]: a fixed-size slab over one extent, O(1) alloc and free
//! - [`pool_cache::PoolCache`]: same-size pools that grow on demand and are
//!   released above a high-water mark of empty pools
//! - [`dynmem::DynMem`]: a boundary-tag heap with next-fit search, immediate
//!   coalescing and optional growth
//!
//! ## Quick Start
//!
//! ```rust
//! use basalt_memory::prelude::*;
//!
//! // Fixed-size objects
//! let mut cache = PoolCache::new(PoolCacheConfig::for_objects(32), SystemAllocator::new())?;
//! let obj = cache.alloc()?;
//! unsafe { cache.free(obj) };
//!
//! // Variable-size blocks, growing in 64 KiB chunks
//! let growth = AllocatorGrowth::new(SystemAllocator::new(), 64 * 1024);
//! let mut heap = DynMem::with_growth(DynMemConfig::default(), growth);
//! let block = heap.malloc(200)?;
//! let block = unsafe { heap.realloc(block, 800)? };
//! unsafe { heap.free(block) };
//! # Ok::<(), MemoryError>(())
//! ```
//!
//! ## Features
//!
//! - `logging` (default): structured events through `tracing`
//!
//! ## Architecture
//!
//! - Standalone error handling via the [`error`] module; failures are
//!   returned as values, never panics, on every hot path
//! - No global state: allocators are constructed and passed explicitly
//! - Every structure is single-owner; [`allocator::Locked`] adds external
//!   mutual exclusion where sharing is needed

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(unsafe_code)]
#![warn(rust_2018_idioms)]

// Error types
pub mod error;

// Configuration and primitives
pub mod config;
pub mod extent;
pub mod utils;

// Layers
pub mod allocator;
pub mod dynmem;
pub mod pool;
pub mod pool_cache;

pub use crate::error::{MemoryError, MemoryResult, Result};

// Public API exports
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::error::{MemoryError, MemoryResult};

    pub use crate::config::{DynMemConfig, PoolCacheConfig};
    pub use crate::extent::Extent;

    pub use crate::allocator::{
        recover_exhaustion, AbortOnExhaustion, Allocator, Locked, SignalOnExhaustion,
        SystemAllocator, TrackedAllocator,
    };
    #[cfg(unix)]
    pub use crate::allocator::PageAllocator;

    pub use crate::dynmem::{AllocatorGrowth, DynMem, GrowFn, GrowthSource, HeapStats, NoGrowth};
    pub use crate::pool::Pool;
    pub use crate::pool_cache::{PoolCache, PoolCacheStats, PoolState};
}
