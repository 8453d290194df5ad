//! Fixed-size slab over a single extent
//!
//! # Safety
//!
//! - Free slots store the next free slot in their first word, forming an
//!   intrusive singly linked list; there is no side table
//! - Slots are word-aligned and at least one word long, so the link write
//!   is always in bounds and aligned
//! - A live slot is never on the free list; the free list holds exactly
//!   `capacity - allocated` entries
//!
//! ## Invariants
//!
//! - `first` is the first word-aligned address of the extent
//! - slot `i` lives at `first + i * stride`, `i < capacity`
//! - `first + capacity * stride <= extent.end()`

use core::marker::PhantomData;
use core::ptr::{self, NonNull};

use crate::error::{MemoryError, MemoryResult};
use crate::extent::Extent;
use crate::utils::{align_up, checked_align_up, is_aligned, WORD};

/// Node in the free list
///
/// When a slot is free, its first word points to the next free slot.
#[repr(C)]
struct FreeSlot {
    next: *mut FreeSlot,
}

/// Fixed-size object slab.
///
/// `alloc` and `free` are O(1). The pool never grows; when every slot is
/// live, `alloc` reports [`MemoryError::Exhausted`].
///
/// The lifetime ties a pool built by [`Pool::from_slice`] to its buffer.
/// Pools built by [`Pool::init`] pick any lifetime the caller vouches for.
pub struct Pool<'a> {
    extent: Extent,
    first: NonNull<u8>,
    stride: usize,
    capacity: usize,
    allocated: usize,
    free_head: *mut FreeSlot,
    _buffer: PhantomData<&'a mut [u8]>,
}

// SAFETY: Pool has exclusive access to its extent; moving it to another
// thread moves that access with it.
unsafe impl Send for Pool<'_> {}

impl<'a> Pool<'a> {
    /// Slot stride for a requested object size: at least one word, rounded
    /// up to word alignment.
    #[inline]
    pub const fn slot_stride(slot_size: usize) -> usize {
        let size = if slot_size < WORD { WORD } else { slot_size };
        align_up(size, WORD)
    }

    /// How many `slot_size` slots fit in `extent`.
    pub fn max_capacity(extent: Extent, slot_size: usize) -> usize {
        if slot_size == 0 {
            return 0;
        }
        let Some(first) = checked_align_up(extent.addr(), WORD) else {
            return 0;
        };
        if first >= extent.end() {
            return 0;
        }
        (extent.end() - first) / Self::slot_stride(slot_size)
    }

    /// Carves `capacity` slots of `slot_size` bytes out of `extent` and
    /// threads them onto the free list.
    ///
    /// # Errors
    /// `InvalidArgument` if `slot_size` or `capacity` is zero, or if
    /// `capacity` slots do not fit in the extent.
    ///
    /// # Safety
    /// - `extent` is valid for reads and writes for all of `'a`
    /// - Nothing else accesses the extent while the pool is alive
    pub unsafe fn init(extent: Extent, slot_size: usize, capacity: usize) -> MemoryResult<Self> {
        if slot_size == 0 {
            return Err(MemoryError::invalid_argument("slot_size must be non-zero"));
        }
        if capacity == 0 {
            return Err(MemoryError::invalid_argument("capacity must be non-zero"));
        }
        let fits = Self::max_capacity(extent, slot_size);
        if capacity > fits {
            return Err(MemoryError::invalid_argument(format!(
                "{capacity} slots of {slot_size} bytes do not fit in {} bytes (max {fits})",
                extent.len()
            )));
        }

        let offset = align_up(extent.addr(), WORD) - extent.addr();
        // SAFETY: offset < extent.len() since at least one slot fits.
        let first = unsafe { extent.start().add(offset) };

        let mut pool = Self {
            extent,
            first,
            stride: Self::slot_stride(slot_size),
            capacity,
            allocated: 0,
            free_head: ptr::null_mut(),
            _buffer: PhantomData,
        };
        // SAFETY: the pool owns every slot and none is live yet.
        unsafe { pool.thread_free_list() };
        Ok(pool)
    }

    /// Safe constructor over a borrowed buffer.
    pub fn from_slice(buf: &'a mut [u8], slot_size: usize, capacity: usize) -> MemoryResult<Self> {
        // SAFETY: the exclusive borrow lives as long as the pool.
        unsafe { Self::init(Extent::from_slice(buf), slot_size, capacity) }
    }

    /// Links all slots together, lowest address first.
    ///
    /// # Safety
    /// No slot may be live.
    unsafe fn thread_free_list(&mut self) {
        let mut next: *mut FreeSlot = ptr::null_mut();
        for i in (0..self.capacity).rev() {
            let slot = self.slot_ptr(i).cast::<FreeSlot>();
            debug_assert!(is_aligned(slot as usize, WORD));
            // SAFETY: slot i is in bounds, word-aligned and at least a word long.
            unsafe { slot.write(FreeSlot { next }) };
            next = slot;
        }
        self.free_head = next;
        self.allocated = 0;
    }

    #[inline]
    fn slot_ptr(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.capacity);
        self.first.as_ptr().wrapping_add(index * self.stride)
    }

    /// Pops a free slot.
    ///
    /// # Errors
    /// `Exhausted` when every slot is live.
    #[inline]
    pub fn alloc(&mut self) -> MemoryResult<NonNull<u8>> {
        let Some(head) = NonNull::new(self.free_head) else {
            return Err(MemoryError::exhausted("pool", self.capacity));
        };
        // SAFETY: head is a free slot of this pool; its first word is a link.
        self.free_head = unsafe { head.as_ptr().read().next };
        self.allocated += 1;
        Ok(head.cast())
    }

    /// Returns a slot to the free list.
    ///
    /// Debug builds scan the free list first and panic on a pointer that is
    /// not a live slot of this pool.
    ///
    /// # Safety
    /// - `ptr` was returned by [`Pool::alloc`] on this pool
    /// - `ptr` has not been freed since
    #[inline]
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        #[cfg(debug_assertions)]
        {
            assert!(
                self.owns(ptr),
                "Pool::free: {:#x} is not a slot of this pool",
                ptr.as_ptr() as usize
            );
            assert!(
                !self.is_free(ptr),
                "Pool::free: double free of {:#x}",
                ptr.as_ptr() as usize
            );
        }

        let slot = ptr.cast::<FreeSlot>();
        // SAFETY: caller contract; the slot is live, in bounds and aligned.
        unsafe {
            slot.as_ptr().write(FreeSlot {
                next: self.free_head,
            })
        };
        self.free_head = slot.as_ptr();
        self.allocated -= 1;
    }

    /// Forgets every allocation and rethreads all slots.
    ///
    /// # Safety
    /// No pointer previously returned by `alloc` may be used afterwards.
    pub unsafe fn reset(&mut self) {
        unsafe { self.thread_free_list() }
    }

    /// True if `ptr` is the start of one of this pool's slots.
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.slot_index(ptr).is_some()
    }

    /// Index of the slot starting at `ptr`.
    pub fn slot_index(&self, ptr: NonNull<u8>) -> Option<usize> {
        let addr = ptr.as_ptr() as usize;
        let first = self.first.as_ptr() as usize;
        if addr < first {
            return None;
        }
        let offset = addr - first;
        let index = offset / self.stride;
        (offset % self.stride == 0 && index < self.capacity).then_some(index)
    }

    /// True if `ptr` is currently on the free list. O(free slots).
    pub fn is_free(&self, ptr: NonNull<u8>) -> bool {
        let target = ptr.as_ptr().cast::<FreeSlot>();
        let mut node = self.free_head;
        let mut steps = 0;
        while !node.is_null() && steps <= self.capacity {
            if node == target {
                return true;
            }
            // SAFETY: nodes on the free list are free slots of this pool.
            node = unsafe { node.read().next };
            steps += 1;
        }
        false
    }

    /// Walks the free list and checks it against the bookkeeping.
    ///
    /// # Errors
    /// `CorruptHeap` if an entry is outside the pool, misaligned or listed
    /// twice, or if the list length differs from `capacity - allocated`.
    pub fn validate(&self) -> MemoryResult<()> {
        let mut seen = vec![false; self.capacity];
        let mut count = 0usize;
        let mut node = self.free_head;

        while let Some(slot) = NonNull::new(node) {
            let addr = slot.as_ptr() as usize;
            let Some(index) = self.slot_index(slot.cast()) else {
                return Err(MemoryError::corrupt_heap(
                    "pool",
                    addr,
                    "free-list entry is not a slot of this pool",
                ));
            };
            if seen[index] {
                return Err(MemoryError::corrupt_heap(
                    "pool",
                    addr,
                    format!("slot {index} appears twice on the free list"),
                ));
            }
            seen[index] = true;
            count += 1;
            // SAFETY: slot was verified to be one of this pool's slots.
            node = unsafe { slot.as_ptr().read().next };
        }

        let expected = self.capacity - self.allocated;
        if count != expected {
            return Err(MemoryError::corrupt_heap(
                "pool",
                self.first.as_ptr() as usize,
                format!("free list holds {count} slots, bookkeeping says {expected}"),
            ));
        }
        Ok(())
    }

    /// Distance between consecutive slots in bytes.
    #[inline]
    pub fn slot_size(&self) -> usize {
        self.stride
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    #[inline]
    pub fn free_slots(&self) -> usize {
        self.capacity - self.allocated
    }

    /// No slot is free.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.allocated == self.capacity
    }

    /// No slot is live.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.allocated == 0
    }

    /// The extent the pool was built over.
    pub fn extent(&self) -> Extent {
        self.extent
    }
}

impl core::fmt::Debug for Pool<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pool")
            .field("start", &self.first)
            .field("slot_size", &self.stride)
            .field("capacity", &self.capacity)
            .field("allocated", &self.allocated)
            .finish()
    }
}
