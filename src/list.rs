//! # Intrusive List
//!
//! Circular doubly-linked list whose nodes are embedded in the objects being
//! queued. A [`List`] is a sentinel [`Link`] of the same type; every queue in
//! the kernel (slab free lists, run queues, wait queues) is a `List` wrapped
//! in a type that exposes only that queue's discipline.
//!
//! ```text
//!            ┌──────────────────────────────────────────┐
//!            ▼                                          │
//!   ┌──────────┐ next ┌────────┐ next ┌────────┐ next   │
//!   │ sentinel │ ───► │ oldest │ ───► │ newest │ ───────┘
//!   └──────────┘      └────────┘      └────────┘
//!   push_back inserts before the sentinel (new logical tail)
//!   pop_front removes the node after the sentinel (oldest)
//! ```
//!
//! All operations are O(1) and allocation free. Nodes and sentinels are
//! addressed by raw pointer, so neither may move while linked. A sentinel
//! that was never initialized (both links null) reads as empty and is
//! self-linked at its current address on first insertion.

use core::ptr::{self, NonNull};

/// A list node, or a list sentinel.
#[repr(C)]
#[derive(Debug)]
pub struct Link {
    next: *mut Link,
    prev: *mut Link,
}

impl Link {
    /// An unlinked node.
    pub const fn new() -> Self {
        Self {
            next: ptr::null_mut(),
            prev: ptr::null_mut(),
        }
    }

    /// Turn this link into an empty, self-linked sentinel at its current
    /// address.
    pub fn init(&mut self) {
        let this: *mut Link = self;
        self.next = this;
        self.prev = this;
    }

    /// Whether this node is currently a member of some list (or, for a
    /// sentinel, whether it has been initialized).
    pub fn is_linked(&self) -> bool {
        !self.next.is_null()
    }

    /// Sentinel emptiness test.
    pub fn is_empty(&self) -> bool {
        self.next.is_null() || ptr::eq(self.next, self)
    }

    /// # Safety
    /// `prev` and `next` must be adjacent members of one list and `node`
    /// must be valid and unlinked.
    unsafe fn splice(node: NonNull<Link>, prev: *mut Link, next: *mut Link) {
        let node = node.as_ptr();
        debug_assert!(!(*node).is_linked(), "node is already queued");
        (*node).next = next;
        (*node).prev = prev;
        (*next).prev = node;
        (*prev).next = node;
    }

    /// Insert `node` immediately before `anchor`.
    ///
    /// # Safety
    /// `anchor` must be a linked node or an initialized sentinel. `node` must
    /// be unlinked, and must not move or be freed until it is removed again.
    pub unsafe fn insert_before(anchor: NonNull<Link>, node: NonNull<Link>) {
        let anchor = anchor.as_ptr();
        Self::splice(node, (*anchor).prev, anchor);
    }

    /// Insert `node` immediately after `anchor`.
    ///
    /// # Safety
    /// Same contract as [`Link::insert_before`].
    pub unsafe fn insert_after(anchor: NonNull<Link>, node: NonNull<Link>) {
        let anchor = anchor.as_ptr();
        Self::splice(node, anchor, (*anchor).next);
    }

    /// Unlink `node` from whatever list holds it and clear its links.
    ///
    /// # Safety
    /// `node` must be linked into a list whose members are all valid.
    pub unsafe fn remove(node: NonNull<Link>) {
        let node = node.as_ptr();
        (*(*node).prev).next = (*node).next;
        (*(*node).next).prev = (*node).prev;
        (*node).next = ptr::null_mut();
        (*node).prev = ptr::null_mut();
    }
}

impl Default for Link {
    fn default() -> Self {
        Self::new()
    }
}

/// A list sentinel with the generic queue operations.
#[repr(C)]
#[derive(Debug, Default)]
pub struct List {
    head: Link,
}

impl List {
    pub const fn new() -> Self {
        Self { head: Link::new() }
    }

    /// Self-link the sentinel at its current address, forgetting any members.
    pub fn init(&mut self) {
        self.head.init();
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_empty()
    }

    fn sentinel(&mut self) -> NonNull<Link> {
        if !self.head.is_linked() {
            self.head.init();
        }
        NonNull::from(&mut self.head)
    }

    /// Enqueue `node` as the new tail.
    ///
    /// # Safety
    /// `node` must be unlinked and stay valid and unmoved while queued.
    pub unsafe fn push_back(&mut self, node: NonNull<Link>) {
        Link::insert_before(self.sentinel(), node);
    }

    /// Enqueue `node` so it is dequeued next.
    ///
    /// # Safety
    /// Same contract as [`List::push_back`].
    pub unsafe fn push_front(&mut self, node: NonNull<Link>) {
        Link::insert_after(self.sentinel(), node);
    }

    /// Dequeue the oldest node.
    pub fn pop_front(&mut self) -> Option<NonNull<Link>> {
        let node = self.front()?;
        // SAFETY: members stay valid while queued (push contract).
        unsafe { Link::remove(node) };
        Some(node)
    }

    /// Dequeue the newest node.
    pub fn pop_back(&mut self) -> Option<NonNull<Link>> {
        if self.is_empty() {
            return None;
        }
        let node = NonNull::new(self.head.prev)?;
        // SAFETY: members stay valid while queued (push contract).
        unsafe { Link::remove(node) };
        Some(node)
    }

    /// The node `pop_front` would return, without removing it.
    pub fn front(&self) -> Option<NonNull<Link>> {
        if self.is_empty() {
            return None;
        }
        NonNull::new(self.head.next)
    }

    /// Number of queued nodes. O(n); diagnostics only.
    pub fn len(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        let sentinel: *const Link = &self.head;
        let mut count = 0;
        let mut cursor = self.head.next as *const Link;
        while !ptr::eq(cursor, sentinel) {
            count += 1;
            // SAFETY: members stay valid while queued (push contract).
            cursor = unsafe { (*cursor).next };
        }
        count
    }
}
