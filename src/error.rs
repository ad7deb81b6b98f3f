//! # Kernel Result Codes
//!
//! The closed set of outcomes returned by kernel operations. Blocking calls
//! carry their result across a context switch as a raw word, so every
//! [`KError`] has a fixed numeric code and success is `0`.

use thiserror::Error;

/// Failure of an operation on an existing kernel object.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KError {
    /// The handle does not name a live object (never created, or stale).
    #[error("invalid or stale handle")]
    InvalidHandle = 1,
    /// The object was deleted while the caller was blocked on it.
    #[error("object deleted")]
    Deleted = 2,
    /// A non-blocking call could not complete without blocking.
    #[error("operation would block")]
    WouldBlock = 3,
    /// The caller is not allowed to do this, e.g. unlock a mutex it does not own.
    #[error("no permission")]
    NoPermission = 4,
}

/// Result of a kernel operation; `Ok(())` is success.
pub type KResult<T = ()> = Result<T, KError>;

/// Failure to create a task or kernel object. Stands in for the null handle:
/// nothing was allocated and the caller must not retry blindly.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CreateError {
    #[error("priority out of range")]
    InvalidPriority,
    #[error("out of kernel object memory")]
    OutOfMemory,
}

/// Encode a wake result into the word passed through a context switch.
pub(crate) fn encode(result: KResult) -> usize {
    match result {
        Ok(()) => 0,
        Err(err) => err as usize,
    }
}

/// Decode a word received from a context switch.
pub(crate) fn decode(raw: usize) -> KResult {
    match raw {
        0 => Ok(()),
        1 => Err(KError::InvalidHandle),
        2 => Err(KError::Deleted),
        3 => Err(KError::WouldBlock),
        4 => Err(KError::NoPermission),
        // Only encode() produces these words.
        _ => crate::kernel::fatal("corrupt wake result"),
    }
}
