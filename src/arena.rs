//! # Object Arena
//!
//! Typed, generation-checked storage on top of a [`SlabHeap`]. Every kernel
//! object (task, event, mutex, semaphore) lives in an arena slot and is
//! referred to by a [`Handle`]: a slot index plus the generation the slot
//! had when the object was inserted. Removing an object bumps the slot's
//! generation, so a handle kept past deletion is rejected with
//! [`KError::InvalidHandle`] instead of reaching whatever reuses the slot.
//!
//! ```text
//!   slot layout (repr(C))
//!   ┌──────────────────────────────┬────────────┬──────┐
//!   │ value: T  (free-list Link    │ generation │ live │
//!   │ lives here while unused)     │    u16     │ bool │
//!   └──────────────────────────────┴────────────┴──────┘
//! ```

use core::alloc::Layout;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use core::mem::{size_of, MaybeUninit};
use core::ptr::{addr_of_mut, NonNull};

use crate::error::{KError, KResult};
use crate::list::Link;
use crate::slab::SlabHeap;

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Reference to an object of type `T` held in an [`Arena`].
pub struct Handle<T> {
    index: u16,
    generation: u16,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    const fn new(index: u16, generation: u16) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    pub const fn index(self) -> u16 {
        self.index
    }

    pub const fn generation(self) -> u16 {
        self.generation
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

// ---------------------------------------------------------------------------
// Arena
// ---------------------------------------------------------------------------

#[repr(C)]
struct Slot<T> {
    value: MaybeUninit<T>,
    generation: u16,
    live: bool,
}

/// Slab-backed object store. Must not move after [`init`](Self::init).
pub struct Arena<T> {
    slab: SlabHeap,
    _marker: PhantomData<T>,
}

impl<T> Arena<T> {
    const LINK_FITS: () = assert!(
        size_of::<T>() >= size_of::<Link>(),
        "arena objects must be large enough to hold a free-list link"
    );

    pub const fn new() -> Self {
        Self {
            slab: SlabHeap::new(),
            _marker: PhantomData,
        }
    }

    /// Size the arena for `capacity` objects. Capacities beyond the handle
    /// index range are clamped.
    pub fn init(&mut self, capacity: usize) {
        let () = Self::LINK_FITS;
        debug_assert_eq!(self.slab.in_use(), 0, "arena re-initialized while in use");

        let capacity = capacity.min(usize::from(u16::MAX) + 1);
        self.slab.init(Layout::new::<Slot<T>>(), capacity);
        for index in 0..self.slab.capacity() {
            let Some(slot) = self.slab.slot_ptr(index) else {
                break;
            };
            let slot = slot.cast::<Slot<T>>().as_ptr();
            // SAFETY: the bookkeeping fields sit past the free-list link.
            unsafe {
                addr_of_mut!((*slot).generation).write(0);
                addr_of_mut!((*slot).live).write(false);
            }
        }
    }

    /// Move `value` into a free slot. Gives the value back when full.
    pub fn insert(&mut self, value: T) -> Result<Handle<T>, T> {
        let Some(raw) = self.slab.alloc() else {
            return Err(value);
        };
        let Some(index) = self.slab.index_of(raw) else {
            return Err(value);
        };
        let slot = raw.cast::<Slot<T>>().as_ptr();
        // SAFETY: the slot was just allocated and its bookkeeping initialized.
        unsafe {
            addr_of_mut!((*slot).value).write(MaybeUninit::new(value));
            addr_of_mut!((*slot).live).write(true);
            let generation = (*slot).generation;
            Ok(Handle::new(index as u16, generation))
        }
    }

    fn slot(&self, handle: Handle<T>) -> KResult<NonNull<Slot<T>>> {
        let slot = self
            .slab
            .slot_ptr(usize::from(handle.index))
            .ok_or(KError::InvalidHandle)?
            .cast::<Slot<T>>();
        // SAFETY: bookkeeping of every slot is initialized by `init`.
        let (live, generation) = unsafe {
            let slot = slot.as_ptr();
            ((*slot).live, (*slot).generation)
        };
        if live && generation == handle.generation {
            Ok(slot)
        } else {
            Err(KError::InvalidHandle)
        }
    }

    /// Stable address of a live object. Valid until it is removed.
    pub fn get_ptr(&self, handle: Handle<T>) -> KResult<NonNull<T>> {
        self.slot(handle).map(|slot| slot.cast::<T>())
    }

    pub fn get(&self, handle: Handle<T>) -> KResult<&T> {
        // SAFETY: live slot; shared borrow tied to `self`.
        self.get_ptr(handle).map(|ptr| unsafe { &*ptr.as_ptr() })
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> KResult<&mut T> {
        // SAFETY: live slot; unique borrow tied to `self`.
        self.get_ptr(handle).map(|ptr| unsafe { &mut *ptr.as_ptr() })
    }

    /// Move the object out and retire the handle.
    pub fn remove(&mut self, handle: Handle<T>) -> KResult<T> {
        let slot = self.slot(handle)?.as_ptr();
        // SAFETY: live slot; it is marked dead before being freed.
        unsafe {
            let value = (*slot).value.assume_init_read();
            (*slot).live = false;
            (*slot).generation = (*slot).generation.wrapping_add(1);
            self.slab.free(NonNull::new_unchecked(slot).cast());
            Ok(value)
        }
    }

    /// Handle of the live object stored at `ptr`.
    pub fn handle_of(&self, ptr: NonNull<T>) -> Option<Handle<T>> {
        let index = self.slab.index_of(ptr.cast())?;
        let slot = ptr.cast::<Slot<T>>().as_ptr();
        // SAFETY: `ptr` is the start of one of our slots.
        let (live, generation) = unsafe { ((*slot).live, (*slot).generation) };
        live.then(|| Handle::new(index as u16, generation))
    }

    pub fn capacity(&self) -> usize {
        self.slab.capacity()
    }

    pub fn in_use(&self) -> usize {
        self.slab.in_use()
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Arena<T> {
    fn drop(&mut self) {
        for index in 0..self.slab.capacity() {
            let Some(slot) = self.slab.slot_ptr(index) else {
                break;
            };
            let slot = slot.cast::<Slot<T>>().as_ptr();
            // SAFETY: only live slots hold an initialized value.
            unsafe {
                if (*slot).live {
                    (*slot).live = false;
                    (*slot).value.assume_init_drop();
                }
            }
        }
    }
}
