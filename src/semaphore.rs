//! # Semaphores
//!
//! A signed counter plus a wait queue. While the count is negative its
//! magnitude is the number of blocked waiters.
//!
//! `signal(k)` adds `k` and releases as many waiters as the addition paid
//! for: all `k` while the count stays `<= 0`, and every blocked waiter once
//! it turns positive. The number released follows the amount signaled, not
//! the length of the queue.
//!
//! The count never leaves the `i32` range. A `wait` or `signal` that would
//! push it out fails with [`KError::WouldBlock`] and changes nothing.

use core::ptr::NonNull;

use crate::arena::Handle;
use crate::error::{CreateError, KError, KResult};
use crate::kernel::state;
use crate::sync::KernelLock;
use crate::waitqueue::{self, block_on, wake_n, WaitQueue, WAKE_ALL};

pub type SemaphoreHandle = Handle<Semaphore>;

#[derive(Debug)]
pub struct Semaphore {
    waiters: WaitQueue,
    count: i32,
}

pub fn create(count: i32) -> Result<SemaphoreHandle, CreateError> {
    let lock = KernelLock::acquire();
    let semaphore = Semaphore {
        waiters: WaitQueue::new(),
        count,
    };
    let handle = state(&lock).semaphores.insert(semaphore).map_err(|_| {
        log::warn!("semaphore arena exhausted");
        CreateError::OutOfMemory
    })?;
    log::debug!("created semaphore {:?} with count {}", handle, count);
    Ok(handle)
}

/// Delete `semaphore`. Every waiter returns [`KError::Deleted`].
pub fn delete(semaphore: SemaphoreHandle) -> KResult {
    let lock = KernelLock::acquire();
    let kernel = state(&lock);
    let ptr = kernel.semaphores.get_ptr(semaphore)?;
    // SAFETY: live object; waiters leave the queue before it is freed.
    let woken = unsafe {
        waitqueue::release(
            &mut kernel.scheduler,
            &mut (*ptr.as_ptr()).waiters,
            WAKE_ALL,
            Err(KError::Deleted),
        )
    };
    kernel.semaphores.remove(semaphore)?;
    log::debug!("deleted semaphore {:?}, {} waiter(s) released", semaphore, woken);
    if woken > 0 {
        waitqueue::preempt(lock);
    }
    Ok(())
}

/// Take one unit, blocking while none is available.
pub fn wait(semaphore: SemaphoreHandle) -> KResult {
    let lock = KernelLock::acquire();
    let ptr = state(&lock).semaphores.get_ptr(semaphore)?;
    // SAFETY: live object, lock held.
    let this = unsafe { &mut *ptr.as_ptr() };
    let Some(count) = this.count.checked_sub(1) else {
        log::warn!("semaphore {:?}: count at its minimum", semaphore);
        return Err(KError::WouldBlock);
    };
    this.count = count;
    if count >= 0 {
        return Ok(());
    }
    // SAFETY: the queue belongs to a live semaphore.
    unsafe { block_on(lock, NonNull::from(&mut this.waiters)) }
}

/// Take one unit if available, else [`KError::WouldBlock`] with nothing
/// changed.
pub fn poll(semaphore: SemaphoreHandle) -> KResult {
    let lock = KernelLock::acquire();
    let this = state(&lock).semaphores.get_mut(semaphore)?;
    if this.count <= 0 {
        return Err(KError::WouldBlock);
    }
    this.count -= 1;
    Ok(())
}

/// Add `count` units. Safe from interrupt handlers when `reschedule` is
/// false. Fails with [`KError::WouldBlock`], changing nothing, if the count
/// would exceed `i32::MAX`.
pub fn signal(semaphore: SemaphoreHandle, count: u32, reschedule: bool) -> KResult {
    let lock = KernelLock::acquire();
    let ptr = state(&lock).semaphores.get_ptr(semaphore)?;
    // SAFETY: live object, lock held.
    let this = unsafe { &mut *ptr.as_ptr() };
    let before = this.count;
    let after = i32::try_from(count)
        .ok()
        .and_then(|added| before.checked_add(added));
    let Some(after) = after else {
        log::warn!("semaphore {:?}: signal of {} overflows the count", semaphore, count);
        return Err(KError::WouldBlock);
    };
    this.count = after;
    if before >= 0 {
        return Ok(());
    }
    let release = count.min(before.unsigned_abs()) as usize;
    // SAFETY: the queue belongs to a live semaphore.
    unsafe { wake_n(lock, NonNull::from(&mut this.waiters), release, Ok(()), reschedule) };
    Ok(())
}

/// Current count. Negative values count blocked waiters.
pub fn count(semaphore: SemaphoreHandle) -> KResult<i32> {
    let lock = KernelLock::acquire();
    state(&lock).semaphores.get(semaphore).map(|this| this.count)
}
