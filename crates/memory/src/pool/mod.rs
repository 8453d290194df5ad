//! Fixed-size slab allocation
//!
//! A [`Pool`] splits one extent into equally sized slots and hands them out
//! in O(1) through an intrusive free list. It is the building block of
//! [`PoolCache`](crate::pool_cache::PoolCache) and can be used on its own
//! over any buffer:
//!
//! ```
//! use basalt_memory::pool::Pool;
//!
//! let mut buf = vec![0u8; 1024];
//! let mut pool = Pool::from_slice(&mut buf, 32, 16).unwrap();
//!
//! let slot = pool.alloc().unwrap();
//! assert_eq!(pool.allocated(), 1);
//! unsafe { pool.free(slot) };
//! assert!(pool.is_empty());
//! ```

mod slab;

pub use slab::Pool;
