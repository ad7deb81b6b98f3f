//! # Mutexes
//!
//! Non-reentrant, owner-checked mutual exclusion. Ownership is not handed
//! to a woken waiter: `unlock` clears the owner and wakes one waiter, which
//! then competes for the mutex again. [`lock`] therefore loops until it
//! finds the mutex free.

use core::ptr::NonNull;

use crate::arena::Handle;
use crate::error::{CreateError, KError, KResult};
use crate::kernel::state;
use crate::sync::KernelLock;
use crate::task::TaskHandle;
use crate::waitqueue::{self, block_on, wake_n, WaitQueue, WAKE_ALL};

pub type MutexHandle = Handle<Mutex>;

#[derive(Debug)]
pub struct Mutex {
    waiters: WaitQueue,
    owner: Option<TaskHandle>,
}

pub fn create() -> Result<MutexHandle, CreateError> {
    let lock = KernelLock::acquire();
    let mutex = Mutex {
        waiters: WaitQueue::new(),
        owner: None,
    };
    let handle = state(&lock).mutexes.insert(mutex).map_err(|_| {
        log::warn!("mutex arena exhausted");
        CreateError::OutOfMemory
    })?;
    log::debug!("created mutex {:?}", handle);
    Ok(handle)
}

/// Delete `mutex`, owned or not. Every waiter returns [`KError::Deleted`].
pub fn delete(mutex: MutexHandle) -> KResult {
    let lock = KernelLock::acquire();
    let kernel = state(&lock);
    let ptr = kernel.mutexes.get_ptr(mutex)?;
    // SAFETY: live object; waiters leave the queue before it is freed.
    let woken = unsafe {
        waitqueue::release(
            &mut kernel.scheduler,
            &mut (*ptr.as_ptr()).waiters,
            WAKE_ALL,
            Err(KError::Deleted),
        )
    };
    kernel.mutexes.remove(mutex)?;
    log::debug!("deleted mutex {:?}, {} waiter(s) released", mutex, woken);
    if woken > 0 {
        waitqueue::preempt(lock);
    }
    Ok(())
}

/// Acquire `mutex`, blocking while another task owns it.
pub fn lock(mutex: MutexHandle) -> KResult {
    loop {
        let lock = KernelLock::acquire();
        let kernel = state(&lock);
        let me = kernel.current_handle();
        let ptr = kernel.mutexes.get_ptr(mutex)?;
        // SAFETY: live object, lock held.
        let this = unsafe { &mut *ptr.as_ptr() };
        if this.owner.is_none() {
            this.owner = Some(me);
            return Ok(());
        }
        // SAFETY: the queue belongs to a live mutex.
        unsafe { block_on(lock, NonNull::from(&mut this.waiters))? };
    }
}

/// Release `mutex`. Only the owner may; anyone else, including everyone
/// when the mutex is free, gets [`KError::NoPermission`].
pub fn unlock(mutex: MutexHandle) -> KResult {
    let lock = KernelLock::acquire();
    let kernel = state(&lock);
    let me = kernel.current_handle();
    let ptr = kernel.mutexes.get_ptr(mutex)?;
    // SAFETY: live object, lock held.
    let this = unsafe { &mut *ptr.as_ptr() };
    if this.owner != Some(me) {
        return Err(KError::NoPermission);
    }
    this.owner = None;
    // SAFETY: the queue belongs to a live mutex.
    unsafe { wake_n(lock, NonNull::from(&mut this.waiters), 1, Ok(()), true) };
    Ok(())
}

/// Current owner, if any.
pub fn owner(mutex: MutexHandle) -> KResult<Option<TaskHandle>> {
    let lock = KernelLock::acquire();
    state(&lock).mutexes.get(mutex).map(|this| this.owner)
}
