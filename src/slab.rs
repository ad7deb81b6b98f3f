//! # Slab Heap
//!
//! Fixed-capacity pool of equally sized slots carved out of one backing
//! allocation. Free slots are threaded onto a [`FreeList`] through their own
//! storage, so allocation and release are pointer arithmetic plus one list
//! operation. The global allocator is only touched by [`SlabHeap::init`].
//!
//! ```text
//!   pool ─► ┌────────┬────────┬────────┬────────┐
//!           │ slot 0 │ slot 1 │ slot 2 │ slot 3 │   slot_size bytes each
//!           └────────┴────────┴────────┴────────┘
//!   free list (while unused, bytes 0.. of a slot hold its Link):
//!           sentinel ─► slot 2 ─► slot 3
//! ```
//!
//! A freed slot goes to the front of the free list and is the next one
//! handed out, which keeps reuse addresses predictable when debugging.

use alloc::alloc::{alloc, dealloc};
use core::alloc::Layout;
use core::mem::{align_of, size_of};
use core::ptr::{self, NonNull};

use crate::list::{Link, List};

// ---------------------------------------------------------------------------
// Free list discipline
// ---------------------------------------------------------------------------

/// Free slots. Threaded in address order at init; LIFO afterwards.
#[derive(Debug, Default)]
pub struct FreeList {
    list: List,
}

impl FreeList {
    pub const fn new() -> Self {
        Self { list: List::new() }
    }

    fn reset(&mut self) {
        self.list.init();
    }

    /// # Safety
    /// `slot` must point to an unused slot of the owning slab.
    unsafe fn thread(&mut self, slot: NonNull<Link>) {
        self.list.push_back(slot);
    }

    /// # Safety
    /// `slot` must point to a slot of the owning slab that was just released.
    unsafe fn release(&mut self, slot: NonNull<Link>) {
        self.list.push_front(slot);
    }

    fn take(&mut self) -> Option<NonNull<Link>> {
        self.list.pop_front()
    }
}

// ---------------------------------------------------------------------------
// Slab heap
// ---------------------------------------------------------------------------

/// One object class's pool. Must not move once [`init`](Self::init) has
/// threaded the free list.
#[derive(Debug)]
pub struct SlabHeap {
    pool: *mut u8,
    pool_layout: Layout,
    slot_size: usize,
    capacity: usize,
    in_use: usize,
    free: FreeList,
}

impl SlabHeap {
    /// An empty slab: every allocation fails until `init` succeeds.
    pub const fn new() -> Self {
        Self {
            pool: ptr::null_mut(),
            pool_layout: Layout::new::<()>(),
            slot_size: 0,
            capacity: 0,
            in_use: 0,
            free: FreeList::new(),
        }
    }

    /// Carve `capacity` slots able to hold `object` and thread them all onto
    /// the free list. On failure the slab is left empty.
    pub fn init(&mut self, object: Layout, capacity: usize) {
        self.release_pool();

        if object.size() < size_of::<Link>() {
            log::warn!(
                "slab: object of {} bytes cannot hold a free-list link",
                object.size()
            );
            return;
        }
        let Ok(slot) = object.align_to(align_of::<Link>()) else {
            return;
        };
        let slot = slot.pad_to_align();
        let pool_layout = slot
            .size()
            .checked_mul(capacity)
            .and_then(|size| Layout::from_size_align(size, slot.align()).ok());
        let Some(pool_layout) = pool_layout.filter(|layout| layout.size() > 0) else {
            log::warn!("slab: cannot size a pool of {} slots", capacity);
            return;
        };

        // SAFETY: the layout has non-zero size.
        let pool = unsafe { alloc(pool_layout) };
        if pool.is_null() {
            log::warn!(
                "slab: backing allocation of {} bytes failed",
                pool_layout.size()
            );
            return;
        }

        self.pool = pool;
        self.pool_layout = pool_layout;
        self.slot_size = slot.size();
        self.capacity = capacity;
        self.in_use = 0;
        self.free.reset();
        for index in 0..capacity {
            // SAFETY: `index` is in bounds and every slot is unused.
            unsafe {
                let link = pool.add(index * self.slot_size).cast::<Link>();
                link.write(Link::new());
                self.free.thread(NonNull::new_unchecked(link));
            }
        }
    }

    /// Take one slot. `None` when the pool is exhausted (or was never
    /// initialized); nothing changes in that case.
    pub fn alloc(&mut self) -> Option<NonNull<u8>> {
        let slot = self.free.take()?;
        self.in_use += 1;
        Some(slot.cast())
    }

    /// Like [`alloc`](Self::alloc), then zero the first `clear_size` bytes
    /// of the slot (clamped to the slot size).
    pub fn calloc(&mut self, clear_size: usize) -> Option<NonNull<u8>> {
        let slot = self.alloc()?;
        // SAFETY: the slot is owned by the caller and `slot_size` long.
        unsafe { ptr::write_bytes(slot.as_ptr(), 0, clear_size.min(self.slot_size)) };
        Some(slot)
    }

    /// Return a slot obtained from this slab.
    ///
    /// # Safety
    /// `slot` must come from `alloc`/`calloc` on this slab and must not be
    /// used again by the caller.
    pub unsafe fn free(&mut self, slot: NonNull<u8>) {
        debug_assert!(self.index_of(slot).is_some(), "slot is not from this slab");
        let link = slot.cast::<Link>();
        link.as_ptr().write(Link::new());
        self.free.release(link);
        self.in_use -= 1;
    }

    /// Index of the slot starting at `ptr`, if `ptr` is one.
    pub fn index_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        if self.pool.is_null() {
            return None;
        }
        let offset = (ptr.as_ptr() as usize).checked_sub(self.pool as usize)?;
        let index = offset / self.slot_size;
        (offset % self.slot_size == 0 && index < self.capacity).then_some(index)
    }

    /// Start of slot `index`, allocated or not.
    pub fn slot_ptr(&self, index: usize) -> Option<NonNull<u8>> {
        if index >= self.capacity {
            return None;
        }
        // SAFETY: in bounds of the pool.
        NonNull::new(unsafe { self.pool.add(index * self.slot_size) })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    fn release_pool(&mut self) {
        if !self.pool.is_null() {
            // SAFETY: allocated in `init` with exactly this layout.
            unsafe { dealloc(self.pool, self.pool_layout) };
            self.pool = ptr::null_mut();
        }
        self.slot_size = 0;
        self.capacity = 0;
        self.in_use = 0;
        self.free = FreeList::new();
    }
}

impl Default for SlabHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SlabHeap {
    fn drop(&mut self) {
        self.release_pool();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> Layout {
        Layout::new::<[u64; 4]>()
    }

    #[test]
    fn test_exhaustion_at_capacity_plus_one() {
        let mut slab = SlabHeap::new();
        slab.init(layout(), 4);
        assert_eq!(slab.capacity(), 4);

        for _ in 0..4 {
            assert!(slab.alloc().is_some());
        }
        assert!(slab.alloc().is_none());
        assert_eq!(slab.in_use(), 4);
    }

    #[test]
    fn test_freed_slot_is_reused_first() {
        let mut slab = SlabHeap::new();
        slab.init(layout(), 3);

        let a = slab.alloc().unwrap();
        let b = slab.alloc().unwrap();
        let _c = slab.alloc().unwrap();
        assert!(slab.alloc().is_none());

        unsafe { slab.free(b) };
        assert_eq!(slab.alloc(), Some(b));

        unsafe { slab.free(a) };
        assert_eq!(slab.index_of(a), Some(0));
        assert_eq!(slab.alloc(), Some(a));
    }

    #[test]
    fn test_initial_order_follows_addresses() {
        let mut slab = SlabHeap::new();
        slab.init(layout(), 3);
        for index in 0..3 {
            let slot = slab.alloc().unwrap();
            assert_eq!(slab.index_of(slot), Some(index));
            assert_eq!(slab.slot_ptr(index), Some(slot));
        }
    }

    #[test]
    fn test_calloc_clears_prefix() {
        let mut slab = SlabHeap::new();
        slab.init(layout(), 1);

        let slot = slab.alloc().unwrap();
        unsafe {
            ptr::write_bytes(slot.as_ptr(), 0xAA, 32);
            slab.free(slot);
        }
        let slot = slab.calloc(24).unwrap();
        let bytes = unsafe { core::slice::from_raw_parts(slot.as_ptr(), 32) };
        assert!(bytes[..24].iter().all(|&b| b == 0));
        assert!(bytes[24..].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_object_smaller_than_link_leaves_slab_empty() {
        let mut slab = SlabHeap::new();
        slab.init(Layout::new::<u8>(), 8);
        assert_eq!(slab.capacity(), 0);
        assert!(slab.alloc().is_none());
    }

    #[test]
    fn test_zero_capacity_fails_cleanly() {
        let mut slab = SlabHeap::new();
        slab.init(layout(), 0);
        assert!(slab.alloc().is_none());
        assert!(slab.calloc(8).is_none());
    }

    #[test]
    fn test_foreign_pointer_has_no_index() {
        let mut slab = SlabHeap::new();
        slab.init(layout(), 2);
        let mut outside = [0u64; 4];
        let outside = NonNull::from(&mut outside).cast::<u8>();
        assert_eq!(slab.index_of(outside), None);

        let slot = slab.alloc().unwrap();
        let inside = unsafe { NonNull::new_unchecked(slot.as_ptr().add(1)) };
        assert_eq!(slab.index_of(inside), None);
    }
}
