//! Configuration records for the heap layers
//!
//! Both records are plain data with a `Default`, named presets and a
//! `validate()` that reports malformed parameters as
//! [`MemoryError::InvalidArgument`].

use crate::error::{MemoryError, MemoryResult};
use crate::pool::Pool;
use crate::utils::WORD;

const DEBUG_ALLOC_PATTERN: u8 = 0xBB;
const DEBUG_DEALLOC_PATTERN: u8 = 0xDD;

fn debug_pattern(pattern: u8) -> Option<u8> {
    if cfg!(debug_assertions) {
        Some(pattern)
    } else {
        None
    }
}

/// Configuration for [`PoolCache`](crate::pool_cache::PoolCache)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolCacheConfig {
    /// Size of every cached object in bytes
    pub object_size: usize,
    /// Size of each extent requested from the backing allocator
    pub page_size: usize,
    /// Maximum number of pools; 0 means unbounded
    pub max_pools: usize,
    /// Number of empty pools kept before the oldest is released
    pub high_water: usize,

    /// Fill pattern byte for newly allocated objects (for debugging)
    pub alloc_pattern: Option<u8>,
    /// Fill pattern byte for freed objects (for debugging)
    pub dealloc_pattern: Option<u8>,
}

impl Default for PoolCacheConfig {
    fn default() -> Self {
        Self {
            object_size: 64,
            page_size: 4096,
            max_pools: 0,
            high_water: 1,
            alloc_pattern: debug_pattern(DEBUG_ALLOC_PATTERN),
            dealloc_pattern: debug_pattern(DEBUG_DEALLOC_PATTERN),
        }
    }
}

impl PoolCacheConfig {
    /// Cache of `object_size`-byte objects with default paging.
    #[must_use]
    pub fn for_objects(object_size: usize) -> Self {
        Self {
            object_size,
            ..Self::default()
        }
    }

    /// Production configuration - no fill patterns
    #[must_use]
    pub fn production() -> Self {
        Self {
            alloc_pattern: None,
            dealloc_pattern: None,
            ..Self::default()
        }
    }

    /// Debug configuration - fill patterns always on
    #[must_use]
    pub fn debug() -> Self {
        Self {
            alloc_pattern: Some(DEBUG_ALLOC_PATTERN),
            dealloc_pattern: Some(DEBUG_DEALLOC_PATTERN),
            ..Self::default()
        }
    }

    /// Distance between consecutive slots: owner header plus payload,
    /// word-aligned.
    pub fn slot_stride(&self) -> usize {
        Pool::slot_stride(WORD.saturating_add(self.object_size))
    }

    /// Objects one `page_size` extent holds.
    pub fn objects_per_pool(&self) -> usize {
        self.page_size / self.slot_stride()
    }

    pub fn validate(&self) -> MemoryResult<()> {
        if self.object_size == 0 {
            return Err(MemoryError::invalid_argument("object_size must be non-zero"));
        }
        if self.object_size > isize::MAX as usize / 2 {
            return Err(MemoryError::invalid_argument("object_size too large"));
        }
        if self.objects_per_pool() == 0 {
            return Err(MemoryError::invalid_argument(format!(
                "page_size {} cannot hold one {}-byte slot",
                self.page_size,
                self.slot_stride()
            )));
        }
        Ok(())
    }
}

/// Configuration for [`DynMem`](crate::dynmem::DynMem)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynMemConfig {
    /// Walk the heap on every `free`/`realloc` and panic on a pointer that
    /// is not a live block
    pub verify_frees: bool,

    /// Fill pattern byte for newly allocated payloads (for debugging)
    pub alloc_pattern: Option<u8>,
    /// Fill pattern byte for freed payloads (for debugging)
    pub dealloc_pattern: Option<u8>,
}

impl Default for DynMemConfig {
    fn default() -> Self {
        Self {
            verify_frees: cfg!(debug_assertions),
            alloc_pattern: debug_pattern(DEBUG_ALLOC_PATTERN),
            dealloc_pattern: debug_pattern(DEBUG_DEALLOC_PATTERN),
        }
    }
}

impl DynMemConfig {
    /// Production configuration - no verification, no fill patterns
    #[must_use]
    pub fn production() -> Self {
        Self {
            verify_frees: false,
            alloc_pattern: None,
            dealloc_pattern: None,
        }
    }

    /// Debug configuration - verified frees and fill patterns
    #[must_use]
    pub fn debug() -> Self {
        Self {
            verify_frees: true,
            alloc_pattern: Some(DEBUG_ALLOC_PATTERN),
            dealloc_pattern: Some(DEBUG_DEALLOC_PATTERN),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_cache_presets() {
        assert_eq!(PoolCacheConfig::production().alloc_pattern, None);
        assert_eq!(PoolCacheConfig::debug().dealloc_pattern, Some(0xDD));
        assert!(PoolCacheConfig::default().validate().is_ok());
    }

    #[test]
    fn test_slot_stride_includes_header() {
        let config = PoolCacheConfig::for_objects(32);
        assert_eq!(config.slot_stride(), 32 + WORD);

        let tiny = PoolCacheConfig::for_objects(1);
        assert_eq!(tiny.slot_stride(), 2 * WORD);
    }

    #[test]
    fn test_validate_rejects_bad_sizes() {
        assert!(PoolCacheConfig::for_objects(0).validate().is_err());

        let config = PoolCacheConfig {
            object_size: 100,
            page_size: 64,
            ..PoolCacheConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "MEM:ARG:INVALID");
    }

    #[test]
    fn test_dynmem_presets() {
        assert!(!DynMemConfig::production().verify_frees);
        assert!(DynMemConfig::debug().verify_frees);
        assert_eq!(DynMemConfig::default().verify_frees, cfg!(debug_assertions));
    }
}
