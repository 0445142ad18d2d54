//! Error taxonomy for the public API.
//!
//! Structural invariant violations (list corruption, refcount underflow,
//! double ownership) are never represented here -- those are bugs, and are
//! reported with `assert!`/`debug_assert!`, matching the source's split
//! between recoverable `error_t` returns and fatal `CHECK`/`assert`
//! failures. Everything that *can* legitimately happen at runtime (a bad
//! caller, an allocation failure, an unknown worker id) is.

use std::error::Error;
use std::fmt;

/// Errors surfaced by the public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskError {
    /// The caller violated a precondition: `yield_now` off-task,
    /// `TaskPool::stop` of the calling worker itself,
    /// `TaskPool::execute` from inside a task, `TaskPool::schedule`
    /// called outside a task context.
    InvalidArgument(&'static str),
    /// A task's stack allocation failed.
    OutOfMemory,
    /// `TaskPool::stop` was given a worker id not currently registered
    /// with the pool.
    NotFound,
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::InvalidArgument(why) => write!(f, "invalid argument: {why}"),
            TaskError::OutOfMemory => write!(f, "out of memory"),
            TaskError::NotFound => write!(f, "no such worker registered with this pool"),
        }
    }
}

impl Error for TaskError {}

pub type Result<T> = std::result::Result<T, TaskError>;
