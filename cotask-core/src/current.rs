//! The process's one piece of genuinely global mutable state: which task
//! (if any) is running on the calling OS thread right now.
//!
//! Two distinct thread-locals:
//!
//! - `CURRENT_TASK` is a plain `Cell`, written only around
//!   `Task::execute` (the worker's resume call) and read by `yield_now`,
//!   `Condvar::wait`, `Semaphore::down` and `TaskPool::schedule` to tell a
//!   task context from a native-thread context and to find "my owner
//!   pool".
//! - `TASK_YIELDER` is a `scoped_tls` scoped thread-local set once, by the
//!   task's own trampoline, for the entire dynamic extent of that
//!   coroutine's execution (which may span many separate `resume` calls,
//!   since the closure's stack frame simply sits suspended between them).
//!   It is how `suspend()` reaches the `corosensei::Yielder` from
//!   arbitrarily deep call frames without threading it through every
//!   function signature in the crate.

use std::cell::Cell;

use corosensei::Yielder;

use crate::task::TaskPtr;

type TaskYielder = Yielder<(), ()>;

thread_local! {
    static CURRENT_TASK: Cell<Option<TaskPtr>> = const { Cell::new(None) };
    /// `(pool id, worker id)` of the worker loop running on this OS
    /// thread, if any. Set for the whole duration of `TaskPool::start`'s
    /// spawned thread or a `TaskPool::execute` call, so `TaskPool::stop`
    /// can reject a worker stopping itself.
    static CURRENT_WORKER: Cell<Option<(u64, u64)>> = const { Cell::new(None) };
}

scoped_tls::scoped_thread_local!(pub(crate) static TASK_YIELDER: TaskYielder);

/// Returns the task currently running on this OS thread, if any.
pub(crate) fn current_task() -> Option<TaskPtr> {
    CURRENT_TASK.with(|cell| cell.get())
}

/// Run `body` with `task` installed as the current task for this thread.
/// Used exactly once, by `Task::execute`, around the `resume` call.
pub(crate) fn with_current_task<R>(task: TaskPtr, body: impl FnOnce() -> R) -> R {
    let previous = CURRENT_TASK.with(|cell| cell.replace(Some(task)));
    debug_assert!(previous.is_none(), "tasks do not nest on one OS thread");
    let result = body();
    CURRENT_TASK.with(|cell| cell.set(previous));
    result
}

/// Suspend the currently running task, returning control to whichever
/// worker last resumed it. Panics if called outside a task context --
/// callers (`yield_now`, `Condvar::wait`, `Semaphore::down`) must check
/// `current_task().is_some()` first and report `TaskError::InvalidArgument`
/// instead of reaching here when it is `None`.
pub(crate) fn suspend_current() {
    TASK_YIELDER.with(|yielder| yielder.suspend(()));
}

/// True if the calling OS thread is currently running the worker loop
/// identified by `(pool_id, worker_id)`.
pub(crate) fn is_current_worker(pool_id: u64, worker_id: u64) -> bool {
    CURRENT_WORKER.with(|cell| cell.get() == Some((pool_id, worker_id)))
}

/// Run `body` with `(pool_id, worker_id)` installed as the current
/// worker identity for this thread. Used by the worker loop for its
/// entire run, whether spawned by `start` or driven by `execute`.
pub(crate) fn with_current_worker<R>(pool_id: u64, worker_id: u64, body: impl FnOnce() -> R) -> R {
    let previous = CURRENT_WORKER.with(|cell| cell.replace(Some((pool_id, worker_id))));
    debug_assert!(previous.is_none(), "worker loops do not nest on one OS thread");
    let result = body();
    CURRENT_WORKER.with(|cell| cell.set(previous));
    result
}
