//! # Wait Queues
//!
//! The block/wake mechanism under every synchronization object. A task
//! blocks by putting itself on an object's [`WaitQueue`] and entering the
//! scheduler; whoever changes the object's state moves waiters back to their
//! run queues with the result their blocking call will return.
//!
//! Waiters are released in arrival order. With two waiters looping on a
//! one-shot event that is signaled once per round, this strict order means
//! the waiter that re-arrives first after being woken is always served next;
//! a waiter is never skipped, but the interleaving is decided by run-queue
//! placement, not by how long a task has been waiting overall.

use core::ptr::NonNull;

use crate::arch::port;
use crate::error::KResult;
use crate::kernel::{self, schedule};
use crate::list::List;
use crate::scheduler::{Leaving, Scheduler};
use crate::sync::KernelLock;
use crate::task::TaskControlBlock;

/// `n` for [`wake_n`] that releases every waiter.
pub const WAKE_ALL: usize = usize::MAX;

/// Tasks blocked on one object, oldest first.
#[derive(Debug, Default)]
pub struct WaitQueue {
    list: List,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self { list: List::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// # Safety
    /// `tcb` must be live and in no other queue.
    unsafe fn enqueue(&mut self, tcb: NonNull<TaskControlBlock>) {
        self.list.push_back(TaskControlBlock::link(tcb));
    }

    fn dequeue(&mut self) -> Option<NonNull<TaskControlBlock>> {
        // SAFETY: only control blocks are ever enqueued.
        self.list
            .pop_front()
            .map(|link| unsafe { TaskControlBlock::from_link(link) })
    }
}

/// Block the current task on `queue` until it is woken. Releases the lock.
///
/// # Safety
/// `queue` must belong to a live object.
pub(crate) unsafe fn block_on(lock: KernelLock, queue: NonNull<WaitQueue>) -> KResult {
    let state = kernel::state(&lock);
    let Some(current) = state.scheduler.current() else {
        kernel::fatal("block without a current task");
    };
    (*queue.as_ptr()).enqueue(current);
    schedule(lock, Leaving::Blocked)
}

/// Move up to `n` waiters from `queue` to their run queues, each to resume
/// with `result`. Returns how many were moved. The lock stays held.
pub(crate) fn release(
    scheduler: &mut Scheduler,
    queue: &mut WaitQueue,
    n: usize,
    result: KResult,
) -> usize {
    let mut woken = 0;
    while woken < n {
        let Some(tcb) = queue.dequeue() else {
            break;
        };
        // SAFETY: waiters are live and were just unlinked.
        unsafe {
            (*tcb.as_ptr()).wake_result = result;
            scheduler.make_ready(tcb);
        }
        woken += 1;
    }
    woken
}

/// Put the current task at the front of its level and let any strictly
/// higher-priority ready task run. Releases the lock.
pub(crate) fn preempt(lock: KernelLock) {
    let state = kernel::state(&lock);
    let Some(current) = state.scheduler.current() else {
        kernel::fatal("preempt without a current task");
    };
    // SAFETY: the running task is in no queue.
    unsafe { state.scheduler.make_ready_front(current) };
    // The waker resumes with its own clean result.
    let _ = schedule(lock, Leaving::Woke);
}

/// Wake up to `n` waiters of `queue` with `result`. With `reschedule` the
/// caller then yields to any woken task of strictly higher priority;
/// without it the lock is simply released, which is the only form an
/// interrupt handler may use.
///
/// Returns `false`, with nothing changed, if `n` is zero or nobody waits.
///
/// # Safety
/// `queue` must belong to a live object.
pub(crate) unsafe fn wake_n(
    lock: KernelLock,
    queue: NonNull<WaitQueue>,
    n: usize,
    result: KResult,
    reschedule: bool,
) -> bool {
    let state = kernel::state(&lock);
    let queue = &mut *queue.as_ptr();
    if n == 0 || queue.is_empty() {
        return false;
    }

    release(&mut state.scheduler, queue, n, result);
    if reschedule {
        debug_assert!(port::in_task_context(), "rescheduling wake outside a task");
        preempt(lock);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KError;
    use crate::task::Stack;
    use alloc::boxed::Box;
    use alloc::vec::Vec;

    fn noop(_: usize) {}

    #[test]
    fn test_release_is_fifo_and_bounded() {
        let mut tcbs: Vec<Box<TaskControlBlock>> = (0..4)
            .map(|id| Box::new(TaskControlBlock::new(id, 2, noop, 0, Stack::new(64).unwrap())))
            .collect();
        let ptrs: Vec<_> = tcbs.iter_mut().map(|tcb| NonNull::from(&mut **tcb)).collect();

        let mut scheduler = Scheduler::new();
        let mut queue = WaitQueue::new();
        for &tcb in &ptrs {
            unsafe { queue.enqueue(tcb) };
        }
        assert_eq!(queue.len(), 4);

        assert_eq!(release(&mut scheduler, &mut queue, 0, Ok(())), 0);
        assert_eq!(release(&mut scheduler, &mut queue, 3, Err(KError::Deleted)), 3);
        assert_eq!(queue.len(), 1);
        assert_eq!(scheduler.ready_count(2), 3);
        assert_eq!(tcbs[0].wake_result, Err(KError::Deleted));
        assert_eq!(tcbs[3].wake_result, Ok(()));

        assert_eq!(release(&mut scheduler, &mut queue, WAKE_ALL, Ok(())), 1);
        assert!(queue.is_empty());
        assert_eq!(scheduler.ready_count(2), 4);
    }
}
