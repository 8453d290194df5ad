//! Standalone error types for basalt-memory
//!
//! Uses thiserror for clean, idiomatic Rust error definitions.
//!
//! Allocation failures are ordinary return values. `InvalidFree` and
//! `CorruptHeap` are only produced by the diagnostic entry points
//! (`try_free`, `validate`) and indicate a caller contract violation or an
//! earlier out-of-bounds write.

use core::alloc::Layout;
use thiserror::Error;

#[cfg(feature = "logging")]
use tracing::{error, warn};

// ============================================================================
// Main Error Types
// ============================================================================

/// Memory management errors
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    // --- Capacity Errors ---
    #[error("{component} exhausted (capacity: {capacity})")]
    Exhausted {
        component: &'static str,
        capacity: usize,
    },

    #[error("pool cache exhausted: {max_pools} pools of {per_pool} objects in use")]
    CacheExhausted { max_pools: usize, per_pool: usize },

    #[error("out of memory: {size} bytes with {align} byte alignment")]
    OutOfMemory { size: usize, align: usize },

    // --- Argument Errors ---
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("capability not supported: {capability}")]
    Unsupported { capability: &'static str },

    // --- Contract Violations ---
    #[error("invalid free of {addr:#x}: {reason}")]
    InvalidFree { addr: usize, reason: &'static str },

    #[error("heap corruption in {component} at {addr:#x}: {details}")]
    CorruptHeap {
        component: &'static str,
        addr: usize,
        details: String,
    },
}

impl MemoryError {
    /// Check if error is retryable
    ///
    /// Exhaustion of one specific pool or cache can be recovered by growing
    /// or by retrying elsewhere; everything else cannot.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Exhausted { .. } | Self::CacheExhausted { .. })
    }

    /// True for the memory-exhaustion class (`Exhausted`, `CacheExhausted`,
    /// `OutOfMemory`).
    #[must_use]
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::Exhausted { .. } | Self::CacheExhausted { .. } | Self::OutOfMemory { .. }
        )
    }

    /// True for caller contract violations and detected corruption.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::InvalidFree { .. } | Self::CorruptHeap { .. })
    }

    /// Get error code for categorization
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Exhausted { .. } => "MEM:POOL:EXHAUSTED",
            Self::CacheExhausted { .. } => "MEM:CACHE:EXHAUSTED",
            Self::OutOfMemory { .. } => "MEM:ALLOC:OOM",
            Self::InvalidArgument { .. } => "MEM:ARG:INVALID",
            Self::Unsupported { .. } => "MEM:ARG:UNSUPPORTED",
            Self::InvalidFree { .. } => "MEM:HEAP:INVALID_FREE",
            Self::CorruptHeap { .. } => "MEM:HEAP:CORRUPT",
        }
    }

    // ============================================================================
    // Convenience Constructors
    // ============================================================================

    /// Create exhausted error for a fixed-capacity component
    pub fn exhausted(component: &'static str, capacity: usize) -> Self {
        Self::Exhausted {
            component,
            capacity,
        }
    }

    /// Create pool cache exhausted error
    pub fn cache_exhausted(max_pools: usize, per_pool: usize) -> Self {
        #[cfg(feature = "logging")]
        warn!(max_pools, per_pool, "pool cache exhausted");

        Self::CacheExhausted {
            max_pools,
            per_pool,
        }
    }

    /// Create out of memory error
    pub fn out_of_memory(size: usize, align: usize) -> Self {
        Self::OutOfMemory { size, align }
    }

    /// Create out of memory error from layout
    pub fn out_of_memory_with_layout(layout: Layout) -> Self {
        Self::out_of_memory(layout.size(), layout.align())
    }

    /// Create invalid argument error
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create zero-size request error
    pub fn zero_size() -> Self {
        Self::invalid_argument("zero-size request")
    }

    /// Create invalid alignment error
    pub fn invalid_alignment(align: usize, max: usize) -> Self {
        Self::invalid_argument(format!("alignment {align} exceeds supported {max}"))
    }

    /// Create unsupported capability error
    pub fn unsupported(capability: &'static str) -> Self {
        Self::Unsupported { capability }
    }

    /// Create invalid free error
    pub fn invalid_free(addr: usize, reason: &'static str) -> Self {
        #[cfg(feature = "logging")]
        error!(addr, reason, "invalid free");

        Self::InvalidFree { addr, reason }
    }

    /// Create heap corruption error
    pub fn corrupt_heap(component: &'static str, addr: usize, details: impl Into<String>) -> Self {
        let details = details.into();

        #[cfg(feature = "logging")]
        error!(component, addr, %details, "heap corruption detected");

        Self::CorruptHeap {
            component,
            addr,
            details,
        }
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// Result type for memory operations
pub type MemoryResult<T> = core::result::Result<T, MemoryError>;

/// Generic result type alias
pub type Result<T> = MemoryResult<T>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_memory_with_layout() {
        let layout = Layout::new::<u64>();
        let error = MemoryError::out_of_memory_with_layout(layout);
        assert!(error.to_string().contains(&layout.size().to_string()));
        assert!(error.is_exhaustion());
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(MemoryError::exhausted("pool", 4).code(), "MEM:POOL:EXHAUSTED");
        assert_eq!(MemoryError::cache_exhausted(2, 8).code(), "MEM:CACHE:EXHAUSTED");
        assert_eq!(MemoryError::zero_size().code(), "MEM:ARG:INVALID");
        assert_eq!(MemoryError::unsupported("resize").code(), "MEM:ARG:UNSUPPORTED");
        assert_eq!(
            MemoryError::corrupt_heap("dynmem", 0x10, "bad tag").code(),
            "MEM:HEAP:CORRUPT"
        );
    }

    #[test]
    fn test_classification() {
        assert!(MemoryError::exhausted("pool", 4).is_retryable());
        assert!(MemoryError::cache_exhausted(1, 1).is_retryable());
        assert!(!MemoryError::out_of_memory(8, 8).is_retryable());
        assert!(MemoryError::invalid_free(0x20, "not live").is_corruption());
        assert!(!MemoryError::invalid_argument("x").is_corruption());
    }

    #[test]
    fn test_display_includes_context() {
        let error = MemoryError::invalid_free(0x40, "double free");
        let text = error.to_string();
        assert!(text.contains("0x40"));
        assert!(text.contains("double free"));
    }
}
