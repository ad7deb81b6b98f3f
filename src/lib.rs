//! # taskcore — Fixed-Priority Task Kernel
//!
//! The task kernel of an embedded firmware: a fixed-priority scheduler, the
//! blocking synchronization objects tasks use to coordinate (events,
//! mutexes, semaphores) and the fixed-capacity allocator behind them.
//!
//! ## Overview
//!
//! - **Cooperative with explicit preemption points**: a task switch happens
//!   only when the running task yields, blocks, exits or wakes a task with
//!   rescheduling. There is no timer tick.
//! - **Strict priorities**: a larger task priority always runs first; equal
//!   priorities run in FIFO order.
//! - **Bounded memory**: every object class lives in a slab sized at
//!   [`kernel::init`]. Running out is an error returned to the caller.
//! - **Safe teardown**: deleting an object wakes every task blocked on it
//!   with [`KError::Deleted`].
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                    │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                  │
//! │      init() · create_task() · yield_task() · exit()     │
//! ├──────────────┬──────────────────┬──────────────────────┤
//! │  event.rs    │  mutex.rs        │  semaphore.rs        │
//! │  irq.rs ─────┘ (interrupt bridge)                       │
//! ├──────────────┴──────────────────┴──────────────────────┤
//! │         Wait Queues (waitqueue.rs) · block / wake       │
//! ├────────────────────────────────────────────────────────┤
//! │   Scheduler (scheduler.rs) · run queues · ready bitmap  │
//! ├──────────────────────────┬─────────────────────────────┤
//! │  Tasks (task.rs)         │  Kernel lock (sync.rs)      │
//! ├──────────────────────────┴─────────────────────────────┤
//! │   Arena (arena.rs) · Slab (slab.rs) · List (list.rs)    │
//! ├────────────────────────────────────────────────────────┤
//! │   Port: arch/cortex_m4.rs  |  arch/hosted.rs (tests)    │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! let main = kernel::init(KernelConfig::with_main_priority(4))?;
//! let ready = semaphore::create(0)?;
//! kernel::create_task(0, 5, worker, ready_as_arg)?;
//! semaphore::wait(ready)?;   // worker runs now
//! ```
//!
//! ## Memory Model
//!
//! - **`alloc` only at init and task creation**: one backing block per
//!   slab, one stack per task
//! - **Intrusive queues**: a task sits in at most one free list, run queue
//!   or wait queue through the link embedded in its control block
//! - **Critical sections**: the `critical-section` crate, single-core
//!   interrupt masking on hardware

#![no_std]

extern crate alloc;

#[cfg(not(target_os = "none"))]
extern crate std;

pub mod config;
pub mod error;
pub mod list;
pub mod slab;
pub mod arena;
pub mod task;
pub mod scheduler;
pub mod waitqueue;
pub mod arch;
pub mod kernel;
pub mod sync;
pub mod event;
pub mod mutex;
pub mod semaphore;
pub mod irq;

pub use arena::Handle;
pub use config::KernelConfig;
pub use error::{CreateError, KError, KResult};
pub use event::{EventHandle, ResetMode};
pub use mutex::MutexHandle;
pub use semaphore::SemaphoreHandle;
pub use task::{TaskFn, TaskHandle};
