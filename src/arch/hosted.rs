//! # Hosted Port
//!
//! Runs the kernel on an operating system for testing. Every task is backed
//! by an OS thread, but only the thread of the kernel's current task is ever
//! allowed to run kernel or task code: all other task threads are parked on
//! their [`Baton`]. A context switch hands the baton to the next task and
//! parks the caller, which makes the threads behave like coroutines sharing
//! one CPU.
//!
//! ```text
//!   switch_context(v, from, to)
//!     to.resume(v) ──► to's thread wakes (spawned on its first resume)
//!     from.wait()  ◄── blocks until some later switch resumes `from`
//! ```
//!
//! Dropping a [`TaskContext`] (the task was reaped, or the kernel was
//! re-initialized) wakes its parked thread with an unwind that ends the
//! thread quietly.
//!
//! Interrupts do not exist here. Tests play the role of interrupt hardware
//! by calling [`irq::dispatch`](crate::irq::dispatch) from plain threads.

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};

use std::boxed::Box;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::config::IRQ_LINES;
use crate::task::Stack;

std::thread_local! {
    static IN_TASK: Cell<bool> = const { Cell::new(false) };
}

static IRQ_ENABLED: [AtomicBool; IRQ_LINES] = [const { AtomicBool::new(false) }; IRQ_LINES];

// ---------------------------------------------------------------------------
// Baton
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatonState {
    /// No thread yet; one is spawned on the first resume.
    Unstarted,
    /// The thread owns the CPU, or has given it up and not been resumed.
    Active,
    /// Resumed with a value the thread has not picked up yet.
    Resumed(usize),
    /// The task is gone; its thread must unwind.
    Reaped,
}

#[derive(Debug)]
struct Baton {
    state: Mutex<BatonState>,
    wakeup: Condvar,
}

/// Unwind payload that ends a reaped task's thread.
struct Reaped;

impl Baton {
    fn new(state: BatonState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            wakeup: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BatonState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resume(self: &Arc<Self>, value: usize) {
        let mut state = self.lock();
        match *state {
            BatonState::Unstarted => {
                *state = BatonState::Resumed(value);
                drop(state);
                spawn_task_thread(self.clone());
            }
            BatonState::Reaped => {
                drop(state);
                halt("resumed a reaped task");
            }
            _ => {
                *state = BatonState::Resumed(value);
                self.wakeup.notify_all();
            }
        }
    }

    fn wait(&self) -> usize {
        let mut state = self.lock();
        loop {
            match *state {
                BatonState::Resumed(value) => {
                    *state = BatonState::Active;
                    return value;
                }
                BatonState::Reaped => {
                    drop(state);
                    panic::resume_unwind(Box::new(Reaped));
                }
                _ => {
                    state = self
                        .wakeup
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    fn reap(&self) {
        *self.lock() = BatonState::Reaped;
        self.wakeup.notify_all();
    }
}

fn spawn_task_thread(baton: Arc<Baton>) {
    let spawned = thread::Builder::new()
        .name("taskcore-task".into())
        .spawn(move || {
            IN_TASK.with(|flag| flag.set(true));
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                baton.wait();
                crate::kernel::run_current_task()
            }));
            if let Err(payload) = outcome {
                if !payload.is::<Reaped>() {
                    // A task panicked while owning the CPU. Nothing can resume
                    // the tasks parked behind it.
                    std::process::abort();
                }
            }
        });
    if spawned.is_err() {
        halt("cannot spawn a task thread");
    }
}

// ---------------------------------------------------------------------------
// Port interface
// ---------------------------------------------------------------------------

/// Saved execution state of one task.
#[derive(Debug)]
pub struct TaskContext {
    baton: Arc<Baton>,
}

impl TaskContext {
    /// Context of the calling thread, which becomes a task.
    pub fn running() -> Self {
        IN_TASK.with(|flag| flag.set(true));
        Self {
            baton: Baton::new(BatonState::Active),
        }
    }

    /// Context of a task that has not run yet. The OS thread brings its own
    /// stack; `stack` only accounts for the memory.
    pub fn new_task(_stack: &Stack) -> Self {
        Self {
            baton: Baton::new(BatonState::Unstarted),
        }
    }
}

impl Drop for TaskContext {
    fn drop(&mut self) {
        self.baton.reap();
    }
}

/// Give the CPU to `to`, passing it `value`, and park until some later
/// switch resumes `from`. Returns the value that switch passed.
///
/// # Safety
/// Both contexts must be valid on entry and the kernel lock must not be
/// held. `from` may be freed as soon as `to` runs.
pub unsafe fn switch_context(value: usize, from: *mut TaskContext, to: *const TaskContext) -> usize {
    let from = (*from).baton.clone();
    let to = (*to).baton.clone();
    to.resume(value);
    from.wait()
}

pub fn in_task_context() -> bool {
    IN_TASK.with(Cell::get)
}

pub fn wait_for_interrupt() {
    thread::sleep(Duration::from_micros(50));
}

pub fn halt(reason: &str) -> ! {
    panic!("kernel halted: {reason}")
}

pub fn current_core() -> u8 {
    0
}

pub fn enable_irq(line: u16, _priority: u8) {
    if let Some(enabled) = IRQ_ENABLED.get(usize::from(line)) {
        enabled.store(true, Ordering::Release);
    }
}

pub fn disable_irq(line: u16) {
    if let Some(enabled) = IRQ_ENABLED.get(usize::from(line)) {
        enabled.store(false, Ordering::Release);
    }
}

pub fn is_irq_enabled(line: u16) -> bool {
    IRQ_ENABLED
        .get(usize::from(line))
        .is_some_and(|enabled| enabled.load(Ordering::Acquire))
}
