//! # Kernel Configuration
//!
//! Compile-time constants governing the scheduler and object pools, plus the
//! [`KernelConfig`] handed to [`kernel::init`](crate::kernel::init).
//! Every pool is sized once at init; there is no runtime growth.
//!
//! ## Priority convention
//!
//! Task priorities run from `0` to [`MAX_PRIORITY`] and a **numerically larger
//! priority is scheduled first**. Interrupt priorities (see [`crate::irq`])
//! follow the hardware convention instead: a numerically **smaller** interrupt
//! priority is more urgent. The two scales are unrelated and are never
//! converted into each other.

/// Number of task priority levels. One run queue and one readiness bit
/// exist per level, so this must fit the `u32` readiness bitmap.
pub const PRIORITY_LEVELS: usize = 8;

/// Highest priority a task may be created with.
pub const MAX_PRIORITY: u8 = (PRIORITY_LEVELS - 1) as u8;

/// Priority of the idle task. It is the lowest level, so any other ready
/// task at a level >= this one gets the CPU when idle checks in.
pub const IDLE_PRIORITY: u8 = 0;

const _: () = assert!(
    PRIORITY_LEVELS >= 3 && PRIORITY_LEVELS <= 32,
    "PRIORITY_LEVELS must be in 3..=32"
);

/// Default task slab capacity. Includes the main and idle tasks.
pub const MAX_TASKS: usize = 16;

/// Default event slab capacity.
pub const MAX_EVENTS: usize = 16;

/// Default mutex slab capacity.
pub const MAX_MUTEXES: usize = 8;

/// Default semaphore slab capacity.
pub const MAX_SEMAPHORES: usize = 8;

/// Stack size of the idle task in bytes. On hardware this stack also
/// absorbs interrupt frames taken while idling.
pub const IDLE_STACK_SIZE: usize = 0x1000;

/// Stack size used when `create_task` is asked for a zero-sized stack.
pub const DEFAULT_STACK_SIZE: usize = 0x1000;

/// Required stack alignment (AAPCS).
pub const STACK_ALIGN: usize = 8;

/// Number of interrupt lines the interrupt table can route.
pub const IRQ_LINES: usize = 128;

/// Runtime parameters for [`kernel::init`](crate::kernel::init).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Priority the calling (main) flow of control runs at after init.
    pub main_priority: u8,
    /// Task slab capacity, main and idle task included.
    pub max_tasks: usize,
    pub max_events: usize,
    pub max_mutexes: usize,
    pub max_semaphores: usize,
    pub idle_stack_size: usize,
}

impl KernelConfig {
    /// Default configuration with the given main task priority.
    pub const fn with_main_priority(main_priority: u8) -> Self {
        Self {
            main_priority,
            max_tasks: MAX_TASKS,
            max_events: MAX_EVENTS,
            max_mutexes: MAX_MUTEXES,
            max_semaphores: MAX_SEMAPHORES,
            idle_stack_size: IDLE_STACK_SIZE,
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::with_main_priority(MAX_PRIORITY / 2)
    }
}

/// Round a requested stack size up to [`STACK_ALIGN`], substituting
/// [`DEFAULT_STACK_SIZE`] for zero. `None` if the rounded size does not fit
/// in a `usize`.
pub const fn stack_size_for(requested: usize) -> Option<usize> {
    let size = if requested == 0 { DEFAULT_STACK_SIZE } else { requested };
    match size.checked_add(STACK_ALIGN - 1) {
        Some(padded) => Some(padded & !(STACK_ALIGN - 1)),
        None => None,
    }
}
