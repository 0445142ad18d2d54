//! `cotask`: an M:N cooperative task runtime.
//!
//! Tasks are stackful coroutines -- independent execution contexts with
//! their own stack that can suspend and be resumed -- multiplexed over
//! pools of OS worker threads. A task can migrate from one pool to
//! another mid-execution, but always originates on, and eventually
//! finishes back on, the pool it was created on.
//!
//! ```no_run
//! use cotask::TaskPool;
//!
//! let pool = TaskPool::builder().num_workers(4).build().unwrap();
//! let task = pool.spawn(64 * 1024, || {
//!     // runs on one of the pool's workers
//!     40 + 2
//! }).unwrap();
//! assert_eq!(task.wait(), 42);
//! ```
//!
//! This crate is a thin facade over `cotask-core`, which holds the
//! actual engine; depend on `cotask-core` directly only if you want to
//! avoid this crate's re-exports.

pub use cotask_core::{
    current_pool, current_task, yield_now, Condvar, Result, Semaphore, SpinLock, SpinLockGuard,
    Task, TaskError, TaskPool, TaskPoolBuilder, WorkerId,
};
