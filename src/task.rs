//! # Task Control Block
//!
//! Per-task state owned by the task arena. A task's scheduling state is not
//! stored: it follows from which queue, if any, holds the task's `node`.
//!
//! ```text
//!   ┌──────────┐   selected by scheduler   ┌─────────┐
//!   │  Ready   │ ────────────────────────► │ Running │
//!   │ runqueue │ ◄──────────────────────── │ current │
//!   └──────────┘    yield / preempted      └─────────┘
//!        ▲                                   │     │
//!        │ wake_n            block_on        │     │ exit
//!        │            ┌──────────┐           │     ▼
//!        └─────────── │ Blocked  │ ◄─────────┘  ┌─────────┐
//!                     │ waitqueue│              │  Dead   │ pending reap
//!                     └──────────┘              └─────────┘
//! ```
//!
//! The `node` link is the first field so a queue member can be turned back
//! into its control block with a pointer cast.

use alloc::alloc::{alloc, dealloc};
use core::alloc::Layout;
use core::ptr::NonNull;

use crate::arch::port::{self, TaskContext};
use crate::arena::Handle;
use crate::config::{stack_size_for, STACK_ALIGN};
use crate::error::KResult;
use crate::list::Link;

/// Task entry point. The argument is the `arg` given to `create_task`.
/// Returning is the same as calling [`kernel::exit`](crate::kernel::exit).
pub type TaskFn = fn(usize);

pub type TaskHandle = Handle<TaskControlBlock>;

// ---------------------------------------------------------------------------
// Stacks
// ---------------------------------------------------------------------------

/// A task stack taken from the global allocator.
#[derive(Debug)]
pub struct Stack {
    base: NonNull<u8>,
    layout: Layout,
}

impl Stack {
    /// Allocate a stack of at least `requested` bytes, rounded up to
    /// [`STACK_ALIGN`]. `None` if the size is unrepresentable or the
    /// allocator is out of memory.
    pub fn new(requested: usize) -> Option<Self> {
        let layout = Layout::from_size_align(stack_size_for(requested)?, STACK_ALIGN).ok()?;
        // SAFETY: stack_size_for never yields zero.
        let base = NonNull::new(unsafe { alloc(layout) })?;
        Some(Self { base, layout })
    }

    pub fn size(&self) -> usize {
        self.layout.size()
    }

    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// One past the highest byte; stacks grow down from here.
    pub fn top(&self) -> NonNull<u8> {
        // SAFETY: one past the end of the allocation.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(self.size())) }
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with this layout.
        unsafe { dealloc(self.base.as_ptr(), self.layout) };
    }
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

#[repr(C)]
pub struct TaskControlBlock {
    /// Membership in exactly one of: slab free list, run queue, wait queue.
    pub(crate) node: Link,

    /// Monotonic creation number; never reused within one kernel lifetime.
    pub id: u32,

    /// Core the task was created on.
    pub core: u8,

    /// Fixed at creation. Larger runs first.
    pub priority: u8,

    /// Result the task observes when it next resumes from a block.
    pub(crate) wake_result: KResult,

    pub(crate) entry: Option<TaskFn>,
    pub(crate) arg: usize,

    pub(crate) context: TaskContext,

    /// `None` for the main task, which runs on the boot stack.
    pub(crate) stack: Option<Stack>,
}

impl TaskControlBlock {
    /// A task that will start at `entry(arg)` on `stack`.
    pub fn new(id: u32, priority: u8, entry: TaskFn, arg: usize, stack: Stack) -> Self {
        let context = TaskContext::new_task(&stack);
        Self {
            node: Link::new(),
            id,
            core: port::current_core(),
            priority,
            wake_result: Ok(()),
            entry: Some(entry),
            arg,
            context,
            stack: Some(stack),
        }
    }

    /// The control block adopted by the flow of control that called
    /// `kernel::init`.
    pub fn adopt_running(id: u32, priority: u8) -> Self {
        Self {
            node: Link::new(),
            id,
            core: port::current_core(),
            priority,
            wake_result: Ok(()),
            entry: None,
            arg: 0,
            context: TaskContext::running(),
            stack: None,
        }
    }

    pub fn stack_size(&self) -> usize {
        self.stack.as_ref().map_or(0, Stack::size)
    }

    pub(crate) fn link(tcb: NonNull<Self>) -> NonNull<Link> {
        tcb.cast()
    }

    /// # Safety
    /// `link` must be the `node` of a live control block.
    pub(crate) unsafe fn from_link(link: NonNull<Link>) -> NonNull<Self> {
        link.cast()
    }
}
