//! Utility functions for address arithmetic
//!
//! All alignments passed to these helpers must be powers of two.

/// Machine word size; the unit of every header, footer and free-list link.
pub const WORD: usize = core::mem::size_of::<usize>();

/// Aligns a value up to the nearest multiple of alignment
///
/// # Examples
/// ```
/// use basalt_memory::utils::align_up;
/// assert_eq!(align_up(13, 8), 16);
/// assert_eq!(align_up(16, 8), 16);
/// ```
#[inline(always)]
pub const fn align_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Aligns a value up, returning `None` on overflow
#[inline]
pub const fn checked_align_up(value: usize, alignment: usize) -> Option<usize> {
    debug_assert!(alignment.is_power_of_two());
    match value.checked_add(alignment - 1) {
        Some(v) => Some(v & !(alignment - 1)),
        None => None,
    }
}

/// Aligns a value down to the nearest multiple of alignment
///
/// # Examples
/// ```
/// use basalt_memory::utils::align_down;
/// assert_eq!(align_down(13, 8), 8);
/// ```
#[inline(always)]
pub const fn align_down(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    value & !(alignment - 1)
}

/// Checks if a value is aligned to the given alignment
#[inline(always)]
pub const fn is_aligned(value: usize, alignment: usize) -> bool {
    value & (alignment - 1) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        for i in 0..10 {
            let sizes = (WORD * i + 1)..=(WORD * (i + 1));
            for size in sizes {
                assert_eq!(align_up(size, WORD), WORD * (i + 1));
            }
        }
        assert_eq!(align_up(0, 16), 0);
    }

    #[test]
    fn test_align_down() {
        assert_eq!(align_down(31, 16), 16);
        assert_eq!(align_down(32, 16), 32);
        assert_eq!(align_down(7, 8), 0);
    }

    #[test]
    fn test_checked_align_up_overflow() {
        assert_eq!(checked_align_up(usize::MAX, 16), None);
        assert_eq!(checked_align_up(17, 16), Some(32));
    }

    #[test]
    fn test_is_aligned() {
        assert!(is_aligned(64, 16));
        assert!(!is_aligned(72, 16));
    }
}
