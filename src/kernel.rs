//! # Kernel
//!
//! Top-level kernel state and the task API.
//!
//! All kernel state (scheduler, object arenas) lives in one [`Kernel`]
//! singleton that is only reachable through [`state`], which demands proof
//! that the kernel lock is held.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset / test thread
//!   └─► kernel::init(config)       ← size the arenas, create idle,
//!         │                           adopt the caller as the main task
//!         ├─► kernel::create_task() ← queue tasks ready (×N)
//!         └─► block / yield / exit  ← first switch happens here
//! ```
//!
//! ## Task exit and reaping
//!
//! An exiting task is still running on its own stack, so it cannot free it.
//! It becomes the scheduler's pending reap and the next scheduler
//! invocation, from whichever task runs next, frees the stack and the
//! control block.

use core::cell::UnsafeCell;
use core::ptr::{addr_of, addr_of_mut, NonNull};

use crate::arch::port;
use crate::arena::Arena;
use crate::config::{KernelConfig, IDLE_PRIORITY, MAX_PRIORITY};
use crate::error::{decode, encode, CreateError, KResult};
use crate::event::Event;
use crate::mutex::Mutex;
use crate::scheduler::{Decision, Leaving, Scheduler};
use crate::semaphore::Semaphore;
use crate::sync::KernelLock;
use crate::task::{Stack, TaskControlBlock, TaskFn, TaskHandle};

// ---------------------------------------------------------------------------
// Global kernel instance
// ---------------------------------------------------------------------------

/// Scheduler plus every object arena. Must not move after `init`.
pub(crate) struct Kernel {
    pub(crate) scheduler: Scheduler,
    pub(crate) tasks: Arena<TaskControlBlock>,
    pub(crate) events: Arena<Event>,
    pub(crate) mutexes: Arena<Mutex>,
    pub(crate) semaphores: Arena<Semaphore>,
    next_id: u32,
}

impl Kernel {
    const fn new() -> Self {
        Self {
            scheduler: Scheduler::new(),
            tasks: Arena::new(),
            events: Arena::new(),
            mutexes: Arena::new(),
            semaphores: Arena::new(),
            next_id: 0,
        }
    }

    /// Handle of the running task.
    pub(crate) fn current_handle(&self) -> TaskHandle {
        let handle = self
            .scheduler
            .current()
            .and_then(|tcb| self.tasks.handle_of(tcb));
        match handle {
            Some(handle) => handle,
            None => fatal("current task is not in the task arena"),
        }
    }

    fn reap(&mut self, dead: NonNull<TaskControlBlock>) {
        let Some(handle) = self.tasks.handle_of(dead) else {
            fatal("pending reap is not a live task");
        };
        if let Ok(tcb) = self.tasks.remove(handle) {
            log::debug!("reaped task {}", tcb.id);
        }
    }
}

struct KernelCell(UnsafeCell<Option<Kernel>>);

// SAFETY: the contents are only reached through `state`, under the lock.
unsafe impl Sync for KernelCell {}

static KERNEL: KernelCell = KernelCell(UnsafeCell::new(None));

/// The kernel, borrowed for as long as the lock guard lives. Halts if
/// `init` has not run.
pub(crate) fn state(_lock: &KernelLock) -> &mut Kernel {
    // SAFETY: the lock serializes all access; callers never hold two of
    // these borrows at once.
    match unsafe { (*KERNEL.0.get()).as_mut() } {
        Some(kernel) => kernel,
        None => fatal("kernel used before init"),
    }
}

// ---------------------------------------------------------------------------
// Scheduling entry point
// ---------------------------------------------------------------------------

/// Run the scheduler for the current task and switch if it decides so.
/// Releases the lock. Returns the result the current task was resumed with.
pub(crate) fn schedule(lock: KernelLock, leaving: Leaving) -> KResult {
    if cfg!(debug_assertions) && !port::in_task_context() {
        fatal("scheduler entered outside task context");
    }

    let kernel = state(&lock);
    if let Some(dead) = kernel.scheduler.take_pending_reap() {
        kernel.reap(dead);
    }

    match kernel.scheduler.decide(leaving) {
        Decision::Continue => Ok(()),
        Decision::Switch { from, to } => {
            // SAFETY: both control blocks are live; `from` stays allocated
            // at least until `to` runs and reaps it.
            let (value, from_ctx, to_ctx) = unsafe {
                let to = to.as_ptr();
                let value = encode(core::mem::replace(&mut (*to).wake_result, Ok(())));
                (value, addr_of_mut!((*from.as_ptr()).context), addr_of!((*to).context))
            };
            drop(lock);
            // SAFETY: the lock is released and both contexts are valid.
            decode(unsafe { port::switch_context(value, from_ctx, to_ctx) })
        }
    }
}

/// Log and stop the system. For corrupted or impossible kernel state only.
pub fn fatal(reason: &str) -> ! {
    log::error!("kernel fatal: {}", reason);
    port::halt(reason)
}

// ---------------------------------------------------------------------------
// Kernel API
// ---------------------------------------------------------------------------

/// Initialize the kernel and turn the caller into the main task.
///
/// Sizes every object arena from `config`, creates the idle task and
/// returns the handle of the main task, which keeps running. Calling it
/// again discards the previous kernel and every task and object in it.
pub fn init(config: KernelConfig) -> Result<TaskHandle, CreateError> {
    if config.main_priority > MAX_PRIORITY {
        log::warn!("init: main priority {} out of range", config.main_priority);
        return Err(CreateError::InvalidPriority);
    }
    let idle_stack = Stack::new(config.idle_stack_size).ok_or(CreateError::OutOfMemory)?;

    let lock = KernelLock::acquire();
    // SAFETY: the lock is held and no borrow from `state` is alive.
    let slot = unsafe { &mut *KERNEL.0.get() };
    *slot = None;
    let kernel = slot.insert(Kernel::new());
    kernel.tasks.init(config.max_tasks);
    kernel.events.init(config.max_events);
    kernel.mutexes.init(config.max_mutexes);
    kernel.semaphores.init(config.max_semaphores);

    let main = adopt_boot_flow(kernel, config.main_priority, idle_stack);
    if main.is_err() {
        *slot = None;
    }
    drop(lock);

    if let Ok(main) = main {
        log::debug!("kernel up, main task {:?} at priority {}", main, config.main_priority);
    }
    main
}

fn adopt_boot_flow(
    kernel: &mut Kernel,
    main_priority: u8,
    idle_stack: Stack,
) -> Result<TaskHandle, CreateError> {
    let idle = TaskControlBlock::new(kernel.next_id, IDLE_PRIORITY, idle_loop, 0, idle_stack);
    let idle = kernel
        .tasks
        .insert(idle)
        .map_err(|_| CreateError::OutOfMemory)?;
    kernel.next_id += 1;

    let main = TaskControlBlock::adopt_running(kernel.next_id, main_priority);
    let main = kernel
        .tasks
        .insert(main)
        .map_err(|_| CreateError::OutOfMemory)?;
    kernel.next_id += 1;

    let (Ok(idle), Ok(main_tcb)) = (kernel.tasks.get_ptr(idle), kernel.tasks.get_ptr(main)) else {
        fatal("boot tasks vanished");
    };
    // SAFETY: idle was just inserted and is in no queue.
    unsafe { kernel.scheduler.make_ready(idle) };
    kernel.scheduler.count_new_task();
    kernel.scheduler.adopt(main_tcb);
    Ok(main)
}

fn idle_loop(_: usize) {
    loop {
        port::wait_for_interrupt();
        yield_task();
    }
}

/// Create a task that starts at `entry(arg)` and queue it ready to run.
///
/// The new task does not run until the caller blocks, yields or exits.
/// A `stack_size` of zero selects the default size.
pub fn create_task(
    stack_size: usize,
    priority: u8,
    entry: TaskFn,
    arg: usize,
) -> Result<TaskHandle, CreateError> {
    if priority > MAX_PRIORITY {
        log::warn!("create_task: priority {} out of range", priority);
        return Err(CreateError::InvalidPriority);
    }
    let Some(stack) = Stack::new(stack_size) else {
        log::warn!("create_task: no memory for a {} byte stack", stack_size);
        return Err(CreateError::OutOfMemory);
    };

    let lock = KernelLock::acquire();
    let kernel = state(&lock);
    let tcb = TaskControlBlock::new(kernel.next_id, priority, entry, arg, stack);
    let Ok(handle) = kernel.tasks.insert(tcb) else {
        log::warn!("create_task: task arena exhausted");
        return Err(CreateError::OutOfMemory);
    };
    kernel.next_id += 1;
    let Ok(tcb) = kernel.tasks.get_ptr(handle) else {
        fatal("new task vanished");
    };
    // SAFETY: just inserted, in no queue.
    unsafe { kernel.scheduler.make_ready(tcb) };
    kernel.scheduler.count_new_task();
    log::debug!("created task {:?} at priority {}", handle, priority);
    Ok(handle)
}

/// Voluntarily give the CPU to any ready task of equal or higher priority.
pub fn yield_task() {
    let lock = KernelLock::acquire();
    // A yielding task is never woken with an error.
    let _ = schedule(lock, Leaving::Yield);
}

/// Terminate the calling task. Its stack and control block are freed by the
/// next scheduler invocation.
pub fn exit() -> ! {
    let lock = KernelLock::acquire();
    let id = state(&lock).current_handle();
    log::debug!("task {:?} exiting", id);
    let _ = schedule(lock, Leaving::Exit);
    fatal("exited task was resumed")
}

/// Body of every task created with `create_task`.
pub(crate) fn run_current_task() -> ! {
    let (entry, arg) = {
        let lock = KernelLock::acquire();
        let kernel = state(&lock);
        let Some(current) = kernel.scheduler.current() else {
            fatal("task started without being current");
        };
        // SAFETY: the current task is live.
        let tcb = unsafe { current.as_ref() };
        (tcb.entry, tcb.arg)
    };
    if let Some(entry) = entry {
        entry(arg);
    }
    exit()
}

pub fn current_task() -> TaskHandle {
    let lock = KernelLock::acquire();
    state(&lock).current_handle()
}

pub fn task_priority(task: TaskHandle) -> KResult<u8> {
    let lock = KernelLock::acquire();
    state(&lock).tasks.get(task).map(|tcb| tcb.priority)
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Occupancy of one object arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub in_use: usize,
    pub capacity: usize,
}

impl<T> From<&Arena<T>> for PoolStats {
    fn from(arena: &Arena<T>) -> Self {
        Self {
            in_use: arena.in_use(),
            capacity: arena.capacity(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelStats {
    /// Tasks created and not yet exited, main and idle included.
    pub live_tasks: usize,
    pub tasks: PoolStats,
    pub events: PoolStats,
    pub mutexes: PoolStats,
    pub semaphores: PoolStats,
}

pub fn stats() -> KernelStats {
    let lock = KernelLock::acquire();
    let kernel = state(&lock);
    KernelStats {
        live_tasks: kernel.scheduler.live_tasks(),
        tasks: PoolStats::from(&kernel.tasks),
        events: PoolStats::from(&kernel.events),
        mutexes: PoolStats::from(&kernel.mutexes),
        semaphores: PoolStats::from(&kernel.semaphores),
    }
}
