//! A hybrid task/thread condition variable, ported from
//! `libtask/util/condition.c`.
//!
//! Bound to a caller-supplied [`SpinLock`] at each call rather than at
//! construction: `wait` takes and returns a `SpinLockGuard`, the same
//! shape as `std::sync::Condvar::wait(MutexGuard)`, which turned out to
//! be exactly the API this primitive already wanted. A sleeping *task* is
//! parked on an intrusive list (reusing its `waiting_link`, per the
//! invariant that link is linked in at most one of {ready queue, a
//! wait-list, nothing} at a time) and later re-queued onto its owner
//! pool's ready queue; a sleeping *native thread* parks on an ordinary
//! `std::sync::Condvar`.

use std::ptr::NonNull;
use std::sync::{Condvar as StdCondvar, Mutex};

use crate::current;
use crate::list::{Link, LinkStorage};
use crate::spinlock::{SpinLock, SpinLockGuard};
use crate::task::TaskPtr;

pub struct Condvar {
    // Boxed so the sentinel's self-referential pointers stay valid even
    // if the `Condvar` itself is later moved (e.g. into an `Arc` or a
    // struct field) after construction.
    sleepers: Box<LinkStorage>,
    native_mutex: Mutex<()>,
    native_condvar: StdCondvar,
}

impl Condvar {
    pub fn new() -> Self {
        let mut sleepers = Box::new(LinkStorage::new());
        let ptr = sleepers.ptr();
        sleepers.init(ptr);
        Condvar {
            sleepers,
            native_mutex: Mutex::new(()),
            native_condvar: StdCondvar::new(),
        }
    }

    fn sleepers_head(&self) -> NonNull<Link> {
        self.sleepers.ptr()
    }

    /// Release `guard`'s spinlock, sleep until woken, then reacquire it.
    ///
    /// Precondition: the caller already holds the
    /// spinlock `guard` was produced from (enforced by the type system --
    /// `guard` had to come from somewhere).
    pub fn wait<'a, T>(&self, guard: SpinLockGuard<'a, T>) -> SpinLockGuard<'a, T> {
        let lock: &'a SpinLock<T> = guard.source();
        match current::current_task() {
            Some(task) => {
                unsafe { Link::push_back(self.sleepers_head(), task.waiting_link()) };
                drop(guard);
                TaskPtr::suspend();
            }
            None => {
                let native_guard = self.native_mutex.lock().unwrap();
                drop(guard);
                let native_guard = self.native_condvar.wait(native_guard).unwrap();
                drop(native_guard);
            }
        }
        lock.lock()
    }

    /// Wake one sleeper. If a task is waiting, it is re-queued onto its
    /// owner pool and the native condvar is left untouched; otherwise the
    /// native condvar is signaled. Requires the associated spinlock held
    /// (proven by `_guard`).
    pub fn signal<T>(&self, _guard: &SpinLockGuard<'_, T>) {
        let popped = unsafe { Link::pop_front(self.sleepers_head()) };
        match popped {
            Some(link) => {
                crate::pool::requeue_on_owner(TaskPtr::from_waiting_link(link));
            }
            None => {
                let _native_guard = self.native_mutex.lock().unwrap();
                self.native_condvar.notify_one();
            }
        }
    }

    /// Wake every sleeper: every waiting task is re-queued onto its owner
    /// pool, and the native condvar is unconditionally broadcast
    /// afterward -- unlike `signal`, the native path here is not
    /// conditioned on the task list being empty.
    pub fn broadcast<T>(&self, _guard: &SpinLockGuard<'_, T>) {
        let mut private = LinkStorage::new();
        let private_ptr = private.ptr();
        private.init(private_ptr);
        unsafe {
            Link::move_all(private_ptr, self.sleepers_head());
            while let Some(link) = Link::pop_front(private_ptr) {
                crate::pool::requeue_on_owner(TaskPtr::from_waiting_link(link));
            }
        }
        let _native_guard = self.native_mutex.lock().unwrap();
        self.native_condvar.notify_all();
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Condvar::new()
    }
}
