//! # Scheduler
//!
//! Fixed-priority run queues and the decision of which task runs next.
//!
//! ## Scheduling Algorithm
//!
//! The scheduler runs only when the current task calls into it, with the
//! kernel lock held:
//! 1. **Reap**: free the task that exited during the previous invocation
//!    (done by the caller, see `kernel::schedule`)
//! 2. **Find**: highest priority with a ready task, from the readiness bitmap
//! 3. **Fast path**: a task that yields keeps the CPU when nothing ready has
//!    a priority `>=` its own
//! 4. **Requeue**: otherwise a yielding task goes to the back of its level;
//!    an exiting task becomes the pending reap instead
//! 5. **Select**: pop the front of the highest ready level (FIFO among
//!    equals) and clear its bit when the level empties
//!
//! There is no tick and no time slicing: every switch is a call.
//!
//! ## Readiness Bitmap
//!
//! ```text
//!   bit:    7 6 5 4 3 2 1 0
//!   ready:  0 0 1 0 0 1 0 1      highest ready = 31 - leading_zeros = 5
//!               │     │   └── idle
//!               ▼     ▼
//!           run queue 5, run queue 2 (non-empty)
//! ```
//!
//! Bit `i` is set if and only if run queue `i` is non-empty.

use core::ptr::NonNull;

use crate::config::PRIORITY_LEVELS;
use crate::list::List;
use crate::task::TaskControlBlock;

// ---------------------------------------------------------------------------
// Run queue discipline
// ---------------------------------------------------------------------------

/// Ready tasks of one priority level.
#[derive(Debug, Default)]
pub struct RunQueue {
    list: List,
}

impl RunQueue {
    pub const fn new() -> Self {
        Self { list: List::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Append behind every task already ready at this level.
    ///
    /// # Safety
    /// `tcb` must be live and in no other queue.
    pub unsafe fn enqueue(&mut self, tcb: NonNull<TaskControlBlock>) {
        self.list.push_back(TaskControlBlock::link(tcb));
    }

    /// Place ahead of every task already ready at this level.
    ///
    /// # Safety
    /// Same contract as [`RunQueue::enqueue`].
    pub unsafe fn enqueue_front(&mut self, tcb: NonNull<TaskControlBlock>) {
        self.list.push_front(TaskControlBlock::link(tcb));
    }

    pub fn dequeue(&mut self) -> Option<NonNull<TaskControlBlock>> {
        // SAFETY: only control blocks are ever enqueued.
        self.list
            .pop_front()
            .map(|link| unsafe { TaskControlBlock::from_link(link) })
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Why the current task entered the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leaving {
    /// Still runnable; keeps the CPU unless an equal or higher level is ready.
    Yield,
    /// Already placed on a wait queue.
    Blocked,
    /// Woke other tasks and already put itself at the front of its level.
    Woke,
    /// Terminating; never runs again.
    Exit,
}

/// Outcome of [`Scheduler::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The caller stays current.
    Continue,
    /// `to` is now current; the caller must switch away from `from`.
    Switch {
        from: NonNull<TaskControlBlock>,
        to: NonNull<TaskControlBlock>,
    },
}

/// Run queues, readiness bitmap and the current task. One instance lives in
/// the kernel; it must not move once a task has been queued.
#[derive(Debug)]
pub struct Scheduler {
    run_queues: [RunQueue; PRIORITY_LEVELS],
    ready: u32,
    current: Option<NonNull<TaskControlBlock>>,
    pending_reap: Option<NonNull<TaskControlBlock>>,
    live: usize,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            run_queues: [const { RunQueue::new() }; PRIORITY_LEVELS],
            ready: 0,
            current: None,
            pending_reap: None,
            live: 0,
        }
    }

    /// Highest priority with a ready task.
    pub fn highest_ready(&self) -> Option<u8> {
        if self.ready == 0 {
            None
        } else {
            Some((31 - self.ready.leading_zeros()) as u8)
        }
    }

    pub fn ready_bitmap(&self) -> u32 {
        self.ready
    }

    pub fn ready_count(&self, priority: u8) -> usize {
        self.run_queues
            .get(usize::from(priority))
            .map_or(0, RunQueue::len)
    }

    /// Queue `tcb` behind the ready tasks of its level.
    ///
    /// # Safety
    /// `tcb` must be live and in no other queue.
    pub unsafe fn make_ready(&mut self, tcb: NonNull<TaskControlBlock>) {
        let priority = tcb.as_ref().priority;
        self.run_queues[usize::from(priority)].enqueue(tcb);
        self.ready |= 1 << priority;
    }

    /// Queue `tcb` ahead of the ready tasks of its level.
    ///
    /// # Safety
    /// Same contract as [`Scheduler::make_ready`].
    pub unsafe fn make_ready_front(&mut self, tcb: NonNull<TaskControlBlock>) {
        let priority = tcb.as_ref().priority;
        self.run_queues[usize::from(priority)].enqueue_front(tcb);
        self.ready |= 1 << priority;
    }

    fn take_ready(&mut self, priority: u8) -> Option<NonNull<TaskControlBlock>> {
        let queue = &mut self.run_queues[usize::from(priority)];
        let tcb = queue.dequeue();
        if queue.is_empty() {
            self.ready &= !(1 << priority);
        }
        tcb
    }

    pub fn current(&self) -> Option<NonNull<TaskControlBlock>> {
        self.current
    }

    /// Make `tcb` the running task without a switch. Used once, for the
    /// flow of control that initializes the kernel.
    pub fn adopt(&mut self, tcb: NonNull<TaskControlBlock>) {
        self.current = Some(tcb);
        self.live += 1;
    }

    /// Account for a task that was just made ready for the first time.
    pub fn count_new_task(&mut self) {
        self.live += 1;
    }

    pub fn live_tasks(&self) -> usize {
        self.live
    }

    pub fn take_pending_reap(&mut self) -> Option<NonNull<TaskControlBlock>> {
        self.pending_reap.take()
    }

    /// Pick the task to run after the current one leaves for `leaving`.
    /// Updates `current`; the caller performs the switch.
    pub fn decide(&mut self, leaving: Leaving) -> Decision {
        let Some(current) = self.current else {
            crate::kernel::fatal("scheduler entered without a current task");
        };
        // SAFETY: the current task is live.
        let priority = unsafe { current.as_ref().priority };

        match leaving {
            Leaving::Yield => {
                match self.highest_ready() {
                    Some(ready) if ready >= priority => {}
                    _ => return Decision::Continue,
                }
                // SAFETY: a running task is in no queue.
                unsafe { self.make_ready(current) };
            }
            Leaving::Exit => {
                debug_assert!(self.pending_reap.is_none(), "previous task not reaped");
                self.pending_reap = Some(current);
                self.live -= 1;
            }
            Leaving::Blocked | Leaving::Woke => {}
        }

        let Some(next) = self
            .highest_ready()
            .and_then(|priority| self.take_ready(priority))
        else {
            crate::kernel::fatal("no task ready to run");
        };
        self.current = Some(next);
        if next == current {
            Decision::Continue
        } else {
            Decision::Switch {
                from: current,
                to: next,
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Stack;
    use alloc::boxed::Box;
    use alloc::vec::Vec;

    fn noop(_: usize) {}

    /// Boxed so the control blocks keep their addresses while queued.
    fn tasks(priorities: &[u8]) -> Vec<Box<TaskControlBlock>> {
        priorities
            .iter()
            .enumerate()
            .map(|(id, &priority)| {
                Box::new(TaskControlBlock::new(
                    id as u32,
                    priority,
                    noop,
                    0,
                    Stack::new(64).unwrap(),
                ))
            })
            .collect()
    }

    fn ptr(tcb: &mut Box<TaskControlBlock>) -> NonNull<TaskControlBlock> {
        NonNull::from(&mut **tcb)
    }

    fn assert_bitmap_matches_queues(scheduler: &Scheduler) {
        for level in 0..PRIORITY_LEVELS as u8 {
            let bit = scheduler.ready_bitmap() & (1 << level) != 0;
            assert_eq!(bit, scheduler.ready_count(level) > 0, "level {level}");
        }
    }

    #[test]
    fn test_empty_scheduler_has_nothing_ready() {
        let scheduler = Scheduler::new();
        assert_eq!(scheduler.highest_ready(), None);
        assert_eq!(scheduler.ready_bitmap(), 0);
    }

    #[test]
    fn test_yield_fast_path_keeps_cpu() {
        let mut tcbs = tasks(&[4, 2, 3]);
        let mut scheduler = Scheduler::new();
        scheduler.adopt(ptr(&mut tcbs[0]));
        unsafe {
            scheduler.make_ready(ptr(&mut tcbs[1]));
            scheduler.make_ready(ptr(&mut tcbs[2]));
        }

        assert_eq!(scheduler.decide(Leaving::Yield), Decision::Continue);
        assert_eq!(scheduler.current(), Some(ptr(&mut tcbs[0])));
        assert_eq!(scheduler.ready_count(2), 1);
        assert_eq!(scheduler.ready_count(3), 1);
    }

    #[test]
    fn test_yield_with_nothing_ready_continues() {
        let mut tcbs = tasks(&[0]);
        let mut scheduler = Scheduler::new();
        scheduler.adopt(ptr(&mut tcbs[0]));
        assert_eq!(scheduler.decide(Leaving::Yield), Decision::Continue);
    }

    #[test]
    fn test_yield_round_robins_equal_priority() {
        let mut tcbs = tasks(&[3, 3, 3]);
        let (a, b, c) = (ptr(&mut tcbs[0]), ptr(&mut tcbs[1]), ptr(&mut tcbs[2]));
        let mut scheduler = Scheduler::new();
        scheduler.adopt(a);
        unsafe {
            scheduler.make_ready(b);
            scheduler.make_ready(c);
        }

        assert_eq!(
            scheduler.decide(Leaving::Yield),
            Decision::Switch { from: a, to: b }
        );
        assert_eq!(
            scheduler.decide(Leaving::Yield),
            Decision::Switch { from: b, to: c }
        );
        assert_eq!(
            scheduler.decide(Leaving::Yield),
            Decision::Switch { from: c, to: a }
        );
        assert_bitmap_matches_queues(&scheduler);
    }

    #[test]
    fn test_blocked_picks_highest_then_fifo() {
        let mut tcbs = tasks(&[7, 2, 5, 5, 1]);
        let ptrs: Vec<_> = tcbs.iter_mut().map(ptr).collect();
        let mut scheduler = Scheduler::new();
        scheduler.adopt(ptrs[0]);
        unsafe {
            scheduler.make_ready(ptrs[1]);
            scheduler.make_ready(ptrs[2]);
            scheduler.make_ready(ptrs[3]);
            scheduler.make_ready(ptrs[4]);
        }
        assert_bitmap_matches_queues(&scheduler);

        let mut order = Vec::new();
        let mut from = ptrs[0];
        for _ in 0..4 {
            match scheduler.decide(Leaving::Blocked) {
                Decision::Switch { from: f, to } => {
                    assert_eq!(f, from);
                    order.push(to);
                    from = to;
                }
                Decision::Continue => panic!("blocked task kept the CPU"),
            }
            assert_bitmap_matches_queues(&scheduler);
        }
        assert_eq!(order, [ptrs[2], ptrs[3], ptrs[1], ptrs[4]]);
        assert_eq!(scheduler.ready_bitmap(), 0);
    }

    #[test]
    fn test_woke_waker_at_front_keeps_cpu() {
        let mut tcbs = tasks(&[3, 3]);
        let (waker, woken) = (ptr(&mut tcbs[0]), ptr(&mut tcbs[1]));
        let mut scheduler = Scheduler::new();
        scheduler.adopt(waker);
        unsafe {
            scheduler.make_ready_front(waker);
            scheduler.make_ready(woken);
        }
        assert_eq!(scheduler.decide(Leaving::Woke), Decision::Continue);
        assert_eq!(scheduler.ready_count(3), 1);
    }

    #[test]
    fn test_woke_higher_priority_preempts() {
        let mut tcbs = tasks(&[3, 6]);
        let (waker, woken) = (ptr(&mut tcbs[0]), ptr(&mut tcbs[1]));
        let mut scheduler = Scheduler::new();
        scheduler.adopt(waker);
        unsafe {
            scheduler.make_ready_front(waker);
            scheduler.make_ready(woken);
        }
        assert_eq!(
            scheduler.decide(Leaving::Woke),
            Decision::Switch {
                from: waker,
                to: woken
            }
        );
        assert_eq!(scheduler.ready_count(3), 1);
    }

    #[test]
    fn test_exit_becomes_pending_reap() {
        let mut tcbs = tasks(&[4, 0]);
        let (dying, idle) = (ptr(&mut tcbs[0]), ptr(&mut tcbs[1]));
        let mut scheduler = Scheduler::new();
        scheduler.adopt(dying);
        unsafe { scheduler.make_ready(idle) };
        scheduler.count_new_task();
        assert_eq!(scheduler.live_tasks(), 2);

        assert_eq!(
            scheduler.decide(Leaving::Exit),
            Decision::Switch {
                from: dying,
                to: idle
            }
        );
        assert_eq!(scheduler.live_tasks(), 1);
        assert_eq!(scheduler.take_pending_reap(), Some(dying));
        assert_eq!(scheduler.take_pending_reap(), None);
        assert_eq!(scheduler.ready_count(4), 0);
    }

    #[test]
    #[should_panic(expected = "no task ready to run")]
    fn test_blocking_with_nothing_ready_is_fatal() {
        let mut tcbs = tasks(&[2]);
        let mut scheduler = Scheduler::new();
        scheduler.adopt(ptr(&mut tcbs[0]));
        scheduler.decide(Leaving::Blocked);
    }
}
