//! # Events
//!
//! A signaled flag plus a wait queue. The reset mode is fixed at creation:
//!
//! | Mode | `signal` | `wait` when signaled |
//! |------|----------|----------------------|
//! | [`ResetMode::OneShot`] | wakes one waiter; with none, latches the flag | clears the flag, returns |
//! | [`ResetMode::Persistent`] | latches the flag, wakes every waiter | returns, flag stays set |
//!
//! An event can be bound to an interrupt line. The line's handler then
//! signals the event without rescheduling, which is how interrupt handlers
//! hand work to tasks.

use core::cell::RefCell;
use core::ptr::NonNull;

use critical_section::Mutex as CsMutex;

use crate::arena::Handle;
use crate::config::IRQ_LINES;
use crate::error::{CreateError, KError, KResult};
use crate::irq;
use crate::kernel::state;
use crate::sync::{critical_section, KernelLock};
use crate::waitqueue::{self, block_on, wake_n, WaitQueue, WAKE_ALL};

pub type EventHandle = Handle<Event>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Consumed by the waiter it releases.
    OneShot,
    /// Stays signaled until [`clear`].
    Persistent,
}

#[derive(Debug)]
pub struct Event {
    waiters: WaitQueue,
    signaled: bool,
    mode: ResetMode,
}

/// Event bound to each interrupt line.
static BINDINGS: CsMutex<RefCell<[Option<EventHandle>; IRQ_LINES]>> =
    CsMutex::new(RefCell::new([None; IRQ_LINES]));

pub fn create(mode: ResetMode) -> Result<EventHandle, CreateError> {
    let lock = KernelLock::acquire();
    let event = Event {
        waiters: WaitQueue::new(),
        signaled: false,
        mode,
    };
    let handle = state(&lock).events.insert(event).map_err(|_| {
        log::warn!("event arena exhausted");
        CreateError::OutOfMemory
    })?;
    log::debug!("created {:?} event {:?}", mode, handle);
    Ok(handle)
}

/// Delete `event`. Every waiter returns [`KError::Deleted`]; interrupt
/// lines bound to it are unbound.
pub fn delete(event: EventHandle) -> KResult {
    let lock = KernelLock::acquire();
    let kernel = state(&lock);
    let ptr = kernel.events.get_ptr(event)?;
    // SAFETY: live object; waiters leave the queue before it is freed.
    let woken = unsafe {
        waitqueue::release(
            &mut kernel.scheduler,
            &mut (*ptr.as_ptr()).waiters,
            WAKE_ALL,
            Err(KError::Deleted),
        )
    };
    kernel.events.remove(event)?;
    log::debug!("deleted event {:?}, {} waiter(s) released", event, woken);

    let table = critical_section(|cs| {
        let mut bindings = BINDINGS.borrow_ref_mut(cs);
        let table = *bindings;
        for bound in bindings.iter_mut().filter(|bound| **bound == Some(event)) {
            *bound = None;
        }
        table
    });
    for line in (0..IRQ_LINES).filter(|&line| table[line] == Some(event)) {
        if let Err(err) = irq::unregister(line as u16) {
            log::warn!("event {:?}: cannot unregister irq {}: {}", event, line, err);
        }
    }

    if woken > 0 {
        waitqueue::preempt(lock);
    }
    Ok(())
}

/// Block until `event` is signaled. One-shot events are consumed.
pub fn wait(event: EventHandle) -> KResult {
    let lock = KernelLock::acquire();
    let ptr = state(&lock).events.get_ptr(event)?;
    // SAFETY: live object, lock held.
    let this = unsafe { &mut *ptr.as_ptr() };
    if this.signaled {
        if this.mode == ResetMode::OneShot {
            this.signaled = false;
        }
        return Ok(());
    }
    // SAFETY: the queue belongs to a live event.
    unsafe { block_on(lock, NonNull::from(&mut this.waiters)) }
}

/// Signal `event`. Safe from interrupt handlers when `reschedule` is false.
pub fn signal(event: EventHandle, reschedule: bool) -> KResult {
    let lock = KernelLock::acquire();
    let ptr = state(&lock).events.get_ptr(event)?;
    // SAFETY: live object, lock held.
    let this = unsafe { &mut *ptr.as_ptr() };
    if this.signaled {
        return Ok(());
    }
    let waiters = NonNull::from(&mut this.waiters);
    match this.mode {
        ResetMode::OneShot => {
            if this.waiters.is_empty() {
                this.signaled = true;
            } else {
                // SAFETY: the queue belongs to a live event.
                unsafe { wake_n(lock, waiters, 1, Ok(()), reschedule) };
            }
        }
        ResetMode::Persistent => {
            this.signaled = true;
            // SAFETY: the queue belongs to a live event.
            unsafe { wake_n(lock, waiters, WAKE_ALL, Ok(()), reschedule) };
        }
    }
    Ok(())
}

/// Reset the flag.
pub fn clear(event: EventHandle) -> KResult {
    let lock = KernelLock::acquire();
    state(&lock).events.get_mut(event)?.signaled = false;
    Ok(())
}

/// Flag state, without consuming it.
pub fn is_signaled(event: EventHandle) -> KResult<bool> {
    let lock = KernelLock::acquire();
    state(&lock).events.get(event).map(|this| this.signaled)
}

// ---------------------------------------------------------------------------
// Interrupt binding
// ---------------------------------------------------------------------------

/// Signal `event` (without rescheduling) whenever interrupt `line` fires.
/// `priority` is a hardware interrupt priority: smaller is more urgent.
pub fn bind_interrupt(event: EventHandle, line: u16, priority: u8) -> KResult {
    {
        let lock = KernelLock::acquire();
        state(&lock).events.get(event)?;
    }
    let index = usize::from(line);
    if index >= IRQ_LINES {
        return Err(KError::InvalidHandle);
    }
    critical_section(|cs| BINDINGS.borrow_ref_mut(cs)[index] = Some(event));
    irq::register(line, priority, signal_bound_event)?;
    log::debug!("bound irq {} to event {:?}", line, event);
    Ok(())
}

pub fn unbind_interrupt(line: u16) -> KResult {
    irq::unregister(line)?;
    critical_section(|cs| BINDINGS.borrow_ref_mut(cs)[usize::from(line)] = None);
    Ok(())
}

fn signal_bound_event(line: u32) {
    let bound = critical_section(|cs| {
        BINDINGS
            .borrow_ref(cs)
            .get(line as usize)
            .copied()
            .flatten()
    });
    let Some(event) = bound else {
        return;
    };
    if signal(event, false).is_err() {
        log::warn!("irq {}: bound event {:?} is gone", line, event);
    }
}
