//! # Synchronization Primitives
//!
//! The kernel lock. One global critical section guards every run queue, the
//! readiness bitmap, every wait queue and every kernel object. It is the
//! `critical-section` crate's section: interrupts disabled on the Cortex-M
//! port, a process-wide reentrant mutex on the hosted port.
//!
//! Two forms are offered:
//!
//! - [`KernelLock`], an owned guard. Operations that may switch tasks take
//!   it by value and release it themselves before the switch.
//! - [`critical_section`], the closure form for short sections that never
//!   switch tasks.

use core::marker::PhantomData;

use critical_section::{CriticalSection, RestoreState};

/// Proof that the kernel lock is held. Dropping it releases the lock.
#[must_use = "dropping the guard releases the kernel lock"]
pub struct KernelLock {
    restore: RestoreState,
    _not_send: PhantomData<*mut ()>,
}

impl KernelLock {
    pub fn acquire() -> Self {
        // SAFETY: released exactly once, in `Drop`, in nesting order because
        // the guard cannot leave the acquiring thread.
        let restore = unsafe { critical_section::acquire() };
        Self {
            restore,
            _not_send: PhantomData,
        }
    }
}

impl Drop for KernelLock {
    fn drop(&mut self) {
        // SAFETY: paired with the acquire in `KernelLock::acquire`.
        unsafe { critical_section::release(self.restore) };
    }
}

/// Execute a closure within the kernel lock.
///
/// ```ignore
/// sync::critical_section(|cs| TABLE.borrow_ref_mut(cs)[line] = None);
/// ```
///
/// Keep the closure short: on hardware, interrupts are masked throughout.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    critical_section::with(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    #[test]
    fn test_lock_is_reentrant() {
        let outer = KernelLock::acquire();
        let hits = critical_section(|_cs| {
            let inner = KernelLock::acquire();
            drop(inner);
            1
        });
        drop(outer);
        assert_eq!(hits, 1);
    }

    #[test]
    fn test_closure_form_guards_shared_cell() {
        static COUNTER: critical_section::Mutex<Cell<u32>> =
            critical_section::Mutex::new(Cell::new(0));
        for _ in 0..3 {
            critical_section(|cs| {
                let cell = COUNTER.borrow(cs);
                cell.set(cell.get() + 1);
            });
        }
        assert_eq!(critical_section(|cs| COUNTER.borrow(cs).get()), 3);
    }
}
