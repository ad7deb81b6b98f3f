//! # Interrupt Table
//!
//! Routes interrupt lines to Rust handlers. The firmware's vector table (or
//! a test standing in for the hardware) calls [`dispatch`] with the line
//! that fired; the handler registered for it runs with the line number as
//! its argument.
//!
//! Handlers run in interrupt context. They may only use non-blocking,
//! non-rescheduling kernel calls such as `event::signal(e, false)` or
//! `semaphore::signal(s, n, false)`.
//!
//! Priorities here are hardware priorities: a numerically smaller value is
//! more urgent, unlike task priorities.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::arch::port;
use crate::config::IRQ_LINES;
use crate::error::{KError, KResult};
use crate::sync::critical_section;

/// Interrupt handler. Receives the line that fired.
pub type Isr = fn(u32);

static HANDLERS: Mutex<RefCell<[Option<Isr>; IRQ_LINES]>> =
    Mutex::new(RefCell::new([None; IRQ_LINES]));

fn check(line: u16) -> KResult<usize> {
    let index = usize::from(line);
    if index < IRQ_LINES {
        Ok(index)
    } else {
        Err(KError::InvalidHandle)
    }
}

/// Install `isr` for `line` at hardware `priority` and unmask the line.
/// Replaces any handler already installed.
pub fn register(line: u16, priority: u8, isr: Isr) -> KResult {
    let index = check(line)?;
    critical_section(|cs| HANDLERS.borrow_ref_mut(cs)[index] = Some(isr));
    port::enable_irq(line, priority);
    Ok(())
}

/// Mask `line` and forget its handler.
pub fn unregister(line: u16) -> KResult {
    let index = check(line)?;
    port::disable_irq(line);
    critical_section(|cs| HANDLERS.borrow_ref_mut(cs)[index] = None);
    Ok(())
}

/// Run the handler registered for `line`. Lines without one are ignored.
pub fn dispatch(line: u16) {
    let Ok(index) = check(line) else {
        return;
    };
    let isr = critical_section(|cs| HANDLERS.borrow_ref(cs)[index]);
    match isr {
        Some(isr) => isr(u32::from(line)),
        None => log::trace!("spurious irq {}", line),
    }
}

pub fn is_registered(line: u16) -> bool {
    check(line)
        .map(|index| critical_section(|cs| HANDLERS.borrow_ref(cs)[index].is_some()))
        .unwrap_or(false)
}
