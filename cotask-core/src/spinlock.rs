//! A thin CAS spinlock with a queryable "is held" predicate.
//!
//! Ported from `libtask/util/spinlock.h`: the word holds 1 when free and 0
//! when held, so a fresh lock can be zero-initialized... except it can't,
//! because 0 means *held* here, so every constructor has to actually store
//! 1. Kept only for short critical sections (pool queues, condvar and
//! semaphore internals) -- never held across a context switch.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};

use crossbeam_utils::Backoff;

use crate::atomic::Atomic32;

const FREE: u32 = 1;
const HELD: u32 = 0;

/// A mutual-exclusion spinlock guarding a `T`.
///
/// Unlike `std::sync::Mutex`, there is no poisoning: a panic while the
/// guard is held simply releases the lock on unwind, same as the source's
/// `libtask_spinlock_unlock` would if called from a `longjmp`-free signal
/// handler. Callers that need poisoning semantics should reach for
/// `std::sync::Mutex` instead; this type exists for the primitives this
/// crate specifies, not as a general-purpose replacement.
pub struct SpinLock<T> {
    word: Atomic32,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        SpinLock {
            word: Atomic32::new(FREE),
            value: UnsafeCell::new(value),
        }
    }

    /// True if the lock is currently held by someone.
    pub fn is_held(&self) -> bool {
        self.word.load() == HELD
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let backoff = Backoff::new();
        while self.word.compare_exchange(FREE, HELD) != FREE {
            backoff.spin();
        }
        SpinLockGuard { lock: self }
    }

    /// Consume the lock and return the inner value without acquiring it;
    /// useful once a structure holding a `SpinLock` is uniquely owned
    /// (e.g. during finalization).
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }

    /// Borrow the inner value without locking, exactly like
    /// `std::sync::Mutex::get_mut`: the `&mut self` already proves
    /// exclusive access. Used at construction time to fix up intrusive
    /// links' self-pointers before the containing object is shared.
    pub(crate) fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        SpinLock::new(T::default())
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<'a, T> SpinLockGuard<'a, T> {
    /// The lock this guard came from. Used by `Condvar::wait` to release
    /// and later reacquire the same spinlock across a sleep, exactly the
    /// way `std::sync::Condvar::wait` uses the `Mutex` behind a
    /// `MutexGuard`.
    pub(crate) fn source(&self) -> &'a SpinLock<T> {
        self.lock
    }
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.word.store(FREE);
    }
}
