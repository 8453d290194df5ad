//! Raw memory extents
//!
//! An [`Extent`] describes a contiguous, address-stable span of bytes. It
//! does not own the memory: whoever hands an extent to a [`Pool`] or a
//! [`DynMem`] keeps it alive for as long as that structure uses it.
//!
//! [`Pool`]: crate::pool::Pool
//! [`DynMem`]: crate::dynmem::DynMem

use core::ptr::NonNull;

/// A contiguous span of raw memory `[start, start + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    start: NonNull<u8>,
    len: usize,
}

impl Extent {
    /// Describes `len` bytes starting at `start`.
    #[inline]
    pub const fn new(start: NonNull<u8>, len: usize) -> Self {
        Self { start, len }
    }

    /// Describes the memory returned by an allocator.
    #[inline]
    pub fn from_raw_slice(block: NonNull<[u8]>) -> Self {
        Self::new(block.cast::<u8>(), block.len())
    }

    /// Describes a borrowed buffer.
    ///
    /// The extent does not carry the borrow: passing it to an `unsafe`
    /// constructor makes the caller responsible for keeping `buf` alive
    /// and otherwise unused.
    #[inline]
    pub fn from_slice(buf: &mut [u8]) -> Self {
        let start = NonNull::from(&mut *buf).cast::<u8>();
        Self::new(start, buf.len())
    }

    /// First byte of the extent.
    #[inline]
    pub const fn start(&self) -> NonNull<u8> {
        self.start
    }

    /// Address of the first byte.
    #[inline]
    pub fn addr(&self) -> usize {
        self.start.as_ptr() as usize
    }

    /// One past the last byte.
    #[inline]
    pub fn end(&self) -> usize {
        self.addr() + self.len
    }

    /// Length in bytes.
    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True when the extent spans no bytes.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True if `addr` lies inside the extent.
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.addr() && addr < self.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds() {
        let mut buf = [0u8; 64];
        let extent = Extent::from_slice(&mut buf);
        let base = buf.as_ptr() as usize;

        assert_eq!(extent.addr(), base);
        assert_eq!(extent.len(), 64);
        assert_eq!(extent.end(), base + 64);
        assert!(extent.contains(base));
        assert!(extent.contains(base + 63));
        assert!(!extent.contains(base + 64));
        assert!(!extent.is_empty());
    }

    #[test]
    fn test_from_raw_slice() {
        let mut buf = [0u8; 48];
        let block = NonNull::from(&mut buf[..]);
        let extent = Extent::from_raw_slice(block);

        assert_eq!(extent.start(), block.cast::<u8>());
        assert_eq!(extent.len(), 48);
    }
}
