//! Shared harness for the end-to-end tests.
//!
//! Every test boots a fresh kernel on the hosted port and turns the test
//! thread into the main task. The kernel is a process-wide singleton, so
//! tests in one binary are serialized by [`boot`]'s guard.

#![allow(dead_code)]

use std::sync::{Mutex, MutexGuard, PoisonError};

use taskcore::{kernel, KernelConfig, TaskHandle};

static SERIAL: Mutex<()> = Mutex::new(());

/// A running kernel. Keep it alive for the whole test.
pub struct Booted {
    pub main: TaskHandle,
    _serial: MutexGuard<'static, ()>,
}

pub fn boot(main_priority: u8) -> Booted {
    boot_with(KernelConfig::with_main_priority(main_priority))
}

pub fn boot_with(config: KernelConfig) -> Booted {
    let serial = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
    let main = kernel::init(config).expect("kernel init");
    Booted {
        main,
        _serial: serial,
    }
}

/// Leak `value` and encode its address as a task argument.
pub fn share<T: Sync + 'static>(value: T) -> usize {
    Box::leak(Box::new(value)) as *const T as usize
}

/// Recover a value passed with [`share`].
pub fn shared<T: Sync + 'static>(arg: usize) -> &'static T {
    // SAFETY: `arg` came from `share::<T>` and the value is never freed.
    unsafe { &*(arg as *const T) }
}

/// Append-only record of what tasks observed, in order.
pub struct Log<T>(Mutex<Vec<T>>);

impl<T: Clone> Log<T> {
    pub fn new() -> Self {
        Self(Mutex::new(Vec::new()))
    }

    pub fn push(&self, value: T) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(value);
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl<T: Clone> Default for Log<T> {
    fn default() -> Self {
        Self::new()
    }
}
