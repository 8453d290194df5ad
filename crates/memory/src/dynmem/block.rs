//! Boundary tags
//!
//! ```text
//!  allocated block                 free block
//! +------------------------+      +------------------------+
//! | size | PREV_ALLOC | 1  |      | size | PREV_ALLOC | 0  |
//! +------------------------+      +------------------------+
//! | payload ...            |      | (unused) ...           |
//! |                        |      +------------------------+
//! |                        |      | size (footer)          |
//! +------------------------+      +------------------------+
//! ```
//!
//! Sizes are multiples of [`GRANULE`], leaving the two low bits of the
//! header free for flags. Only free blocks carry a footer; an allocated
//! block's successor knows not to look for one through its `PREV_ALLOC`
//! bit. A header of size 0 with `ALLOC` set is the epilogue ending a pool.

use core::ptr::NonNull;

use crate::utils::WORD;

/// Block size unit and payload alignment.
pub const GRANULE: usize = 2 * WORD;

/// Smallest block: a header plus room for a footer.
pub const MIN_BLOCK: usize = GRANULE;

const ALLOC: usize = 0b01;
const PREV_ALLOC: usize = 0b10;
const SIZE_MASK: usize = !(GRANULE - 1);

const _: () = assert!(GRANULE >= 4, "flag bits must fit below the granule");
const _: () = assert!(MIN_BLOCK >= 2 * WORD, "a free block needs header and footer");

/// A block, identified by the address of its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block(NonNull<u8>);

impl Block {
    #[inline]
    pub(crate) const fn at(header: NonNull<u8>) -> Self {
        Self(header)
    }

    /// The block whose payload starts at `payload`.
    ///
    /// # Safety
    /// `payload` is at least one word past the start of its allocation.
    #[inline]
    pub(crate) unsafe fn from_payload(payload: NonNull<u8>) -> Self {
        Self(unsafe { payload.sub(WORD) })
    }

    #[inline]
    pub(crate) fn payload(self) -> NonNull<u8> {
        // SAFETY: every block, including the epilogue's extent tail, has a
        // header word in front of its payload.
        unsafe { self.0.add(WORD) }
    }

    #[inline]
    pub(crate) fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    #[inline]
    unsafe fn tag(self) -> usize {
        unsafe { self.0.cast::<usize>().as_ptr().read() }
    }

    /// # Safety
    /// `self` points at a block header inside a registered pool.
    #[inline]
    pub(crate) unsafe fn size(self) -> usize {
        unsafe { self.tag() & SIZE_MASK }
    }

    /// # Safety
    /// `self` points at a block header inside a registered pool.
    #[inline]
    pub(crate) unsafe fn is_allocated(self) -> bool {
        unsafe { self.tag() & ALLOC != 0 }
    }

    /// # Safety
    /// `self` points at a block header inside a registered pool.
    #[inline]
    pub(crate) unsafe fn prev_allocated(self) -> bool {
        unsafe { self.tag() & PREV_ALLOC != 0 }
    }

    /// Size 0 and allocated: the end of a pool.
    ///
    /// # Safety
    /// `self` points at a block header inside a registered pool.
    #[inline]
    pub(crate) unsafe fn is_epilogue(self) -> bool {
        unsafe { self.size() == 0 && self.is_allocated() }
    }

    /// Writes the header.
    ///
    /// # Safety
    /// `self` is a header position inside a registered pool.
    #[inline]
    pub(crate) unsafe fn write(self, size: usize, allocated: bool, prev_allocated: bool) {
        debug_assert_eq!(size & !SIZE_MASK, 0, "block size {size} is not granule-aligned");
        let mut tag = size;
        if allocated {
            tag |= ALLOC;
        }
        if prev_allocated {
            tag |= PREV_ALLOC;
        }
        unsafe { self.0.cast::<usize>().as_ptr().write(tag) }
    }

    /// # Safety
    /// `self` points at a block header inside a registered pool.
    #[inline]
    pub(crate) unsafe fn set_prev_allocated(self, prev_allocated: bool) {
        unsafe {
            let tag = self.tag();
            let tag = if prev_allocated {
                tag | PREV_ALLOC
            } else {
                tag & !PREV_ALLOC
            };
            self.0.cast::<usize>().as_ptr().write(tag);
        }
    }

    /// Copies the header size into the last word of the block.
    ///
    /// # Safety
    /// `self` is a free block of at least `MIN_BLOCK` bytes.
    #[inline]
    pub(crate) unsafe fn write_footer(self) {
        unsafe {
            let size = self.size();
            self.0.add(size - WORD).cast::<usize>().as_ptr().write(size);
        }
    }

    /// Size recorded in the footer.
    ///
    /// # Safety
    /// `self` is a free block.
    #[inline]
    pub(crate) unsafe fn footer(self) -> usize {
        unsafe {
            let size = self.size();
            self.0.add(size - WORD).cast::<usize>().as_ptr().read()
        }
    }

    /// The physically following block.
    ///
    /// # Safety
    /// `self` is not the epilogue.
    #[inline]
    pub(crate) unsafe fn next(self) -> Self {
        unsafe { Self(self.0.add(self.size())) }
    }

    /// The physically preceding block, found through its footer.
    ///
    /// # Safety
    /// `self.prev_allocated()` is false.
    #[inline]
    pub(crate) unsafe fn prev(self) -> Self {
        unsafe {
            let prev_size = self.0.sub(WORD).cast::<usize>().as_ptr().read();
            Self(self.0.sub(prev_size))
        }
    }
}

/// Block size serving an `n`-byte request: header included, rounded up to
/// the granule, never below [`MIN_BLOCK`]. `None` on overflow.
#[inline]
pub(crate) const fn block_size_for(n: usize) -> Option<usize> {
    let Some(with_header) = n.checked_add(WORD) else {
        return None;
    };
    let Some(rounded) = crate::utils::checked_align_up(with_header, GRANULE) else {
        return None;
    };
    if rounded > isize::MAX as usize {
        return None;
    }
    Some(if rounded < MIN_BLOCK { MIN_BLOCK } else { rounded })
}
