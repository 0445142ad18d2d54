//! The task object: a stackful coroutine with its own
//! stack, a completion condvar, and membership in two pools at once
//! (origin, fixed for life, and owner, which migrates).
//!
//! The stackful-switching mechanism itself is `corosensei` rather than
//! a hand-rolled context swap: a
//! `Coroutine<(), (), i32>` built over a `corosensei::stack::DefaultStack`
//! plays the role of the source's saved self-context / saved
//! thread-context pair. `resume(())` is `execute()`; `Yielder::suspend(())`
//! is `suspend()`.

use std::cell::Cell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult};

use crate::condvar::Condvar;
use crate::current;
use crate::error::{Result, TaskError};
use crate::list::{Link, LinkStorage};
use crate::log::{self, Event};
use crate::pool::PoolPtr;
use crate::refcount::{Decremented, RefCount};
use crate::spinlock::SpinLock;

fn next_task_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// The boxed user entry: a function pointer and opaque argument become
/// a single `FnOnce` closure, the idiomatic Rust way to pair a
/// function with the data it closes over.
type Entry = Box<dyn FnOnce() -> i32 + Send>;

struct Completion {
    done: bool,
    result: Option<i32>,
}

/// The coroutine plus its stack, guarded by the task's stack lock so at
/// most one worker ever resumes it at a time.
struct Body {
    coroutine: Option<Coroutine<(), (), i32, DefaultStack>>,
}

pub(crate) struct TaskInner {
    id: u64,
    refcount: RefCount,
    body: SpinLock<Body>,
    completion: SpinLock<Completion>,
    completion_condvar: Condvar,
    /// Current owner pool. Only ever read or written while this task is
    /// known not to be running concurrently elsewhere: by the task itself
    /// (while executing, in `schedule`/the trampoline's completion path)
    /// or by whoever just dequeued it from a sleeper list it could only
    /// have been parked on while suspended.
    owner: Cell<Option<PoolPtr>>,
    /// Fixed for the task's life.
    origin: PoolPtr,
    waiting_link: LinkStorage,
    origin_link: LinkStorage,
}

/// A manually reference-counted pointer to a task, matching the source's
/// explicit `task_ref`/`task_unref` discipline.
///
/// `Copy`, like a raw C pointer: duplicating a `TaskPtr` does **not**
/// increment the refcount. Every owning copy must come from `.inc_ref()`
/// and be balanced by a `.dec_ref()`; this type is the intrusive-list/
/// internal-bookkeeping layer, not the safe user-facing handle (that's
/// `crate::Task`, built on top, which manages this via `Clone`/`Drop`).
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct TaskPtr(NonNull<TaskInner>);

unsafe impl Send for TaskPtr {}
unsafe impl Sync for TaskPtr {}

impl TaskPtr {
    pub(crate) fn inner(&self) -> &TaskInner {
        unsafe { self.0.as_ref() }
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner().id
    }

    pub(crate) fn origin(&self) -> PoolPtr {
        self.inner().origin
    }

    pub(crate) fn owner(&self) -> Option<PoolPtr> {
        self.inner().owner.get()
    }

    pub(crate) fn set_owner(&self, owner: Option<PoolPtr>) {
        self.inner().owner.set(owner);
    }

    pub(crate) fn waiting_link(&self) -> NonNull<Link> {
        self.inner().waiting_link.ptr()
    }

    pub(crate) fn origin_link(&self) -> NonNull<Link> {
        self.inner().origin_link.ptr()
    }

    pub(crate) fn from_waiting_link(link: NonNull<Link>) -> TaskPtr {
        let offset = std::mem::offset_of!(TaskInner, waiting_link);
        unsafe {
            let container = (link.as_ptr() as *mut u8).sub(offset) as *mut TaskInner;
            TaskPtr(NonNull::new_unchecked(container))
        }
    }

    pub(crate) fn from_origin_link(link: NonNull<Link>) -> TaskPtr {
        let offset = std::mem::offset_of!(TaskInner, origin_link);
        unsafe {
            let container = (link.as_ptr() as *mut u8).sub(offset) as *mut TaskInner;
            TaskPtr(NonNull::new_unchecked(container))
        }
    }

    /// Build a brand-new task, heap-allocated, with a reference count of
    /// one. Does not insert it into any pool; that is `pool::insert`'s
    /// job.
    fn allocate(origin: PoolPtr, entry: Entry, stack_size: usize) -> Result<TaskPtr> {
        let stack = DefaultStack::new(stack_size).map_err(|_| TaskError::OutOfMemory)?;
        let mut boxed = Box::new(TaskInner {
            id: next_task_id(),
            refcount: RefCount::new_heap(),
            body: SpinLock::new(Body { coroutine: None }),
            completion: SpinLock::new(Completion {
                done: false,
                result: None,
            }),
            completion_condvar: Condvar::new(),
            owner: Cell::new(None),
            origin,
            waiting_link: LinkStorage::new(),
            origin_link: LinkStorage::new(),
        });
        // Fix up the intrusive links' self-pointers now, while the
        // `TaskInner` still has its final heap address (Box::new already
        // placed it there; leaking below only transfers ownership).
        let waiting_ptr = boxed.waiting_link.ptr();
        let origin_ptr = boxed.origin_link.ptr();
        boxed.waiting_link.init(waiting_ptr);
        boxed.origin_link.init(origin_ptr);
        let ptr = TaskPtr(NonNull::from(Box::leak(boxed)));

        let coroutine = Coroutine::with_stack(stack, move |yielder, ()| {
            current::TASK_YIELDER.set(yielder, || run_trampoline(ptr, entry))
        });
        ptr.inner().body.lock().coroutine = Some(coroutine);
        Ok(ptr)
    }

    pub(crate) fn create(origin: PoolPtr, entry: Entry, stack_size: usize) -> Result<TaskPtr> {
        let task = Self::allocate(origin, entry, stack_size)?;
        log::logger().log(|| Event::TaskCreated { pool: origin.id() as usize });
        crate::pool::insert(origin, task);
        Ok(task)
    }

    pub(crate) fn inc_ref(&self) {
        self.inner().refcount.inc();
    }

    /// Drop one reference; finalizes and frees the task if it was the
    /// last one.
    pub(crate) fn dec_ref(self) {
        match self.inner().refcount.dec() {
            Decremented::Alive(_) => {}
            Decremented::Finalize { .. } => self.finalize(),
        }
    }

    /// Run the worker-side half of a resumption: lock the stack, install
    /// the thread-local current task, swap contexts, unwind the
    /// bookkeeping. Returns `true` if the task ran to completion this call.
    ///
    /// Takes a reference to the task and its owner pool for the duration of
    /// the swap, so neither can be destroyed while the task is running --
    /// a detached task (its `Task` handle dropped before completion) would
    /// otherwise have its last reference dropped from inside `pool::erase`
    /// while still executing on its own coroutine stack, finalizing (and
    /// freeing) the very `TaskInner` that stack belongs to.
    pub(crate) fn execute(self) -> bool {
        let owner = self.owner().expect("executing task must have an owner");
        self.inc_ref();
        owner.inc_ref();

        let mut guard = self.inner().body.lock();
        let finished = current::with_current_task(self, || {
            let coroutine = guard.coroutine.as_mut().expect("task body missing");
            match coroutine.resume(()) {
                CoroutineResult::Yield(()) => false,
                CoroutineResult::Return(_) => true,
            }
        });
        drop(guard);

        self.dec_ref();
        owner.dec_ref();
        finished
    }

    /// Suspend the running task, returning control to the worker that
    /// last resumed it.
    pub(crate) fn suspend() {
        current::suspend_current();
    }

    /// Block until the task completes. Callable from any context,
    /// idempotent.
    pub(crate) fn wait(self) {
        let mut guard = self.inner().completion.lock();
        while !guard.done {
            guard = self.inner().completion_condvar.wait(guard);
        }
    }

    pub(crate) fn result(self) -> Option<i32> {
        self.inner().completion.lock().result
    }

    /// Requires `owner == None`, both links unlinked, and that the
    /// caller is not the task itself.
    fn finalize(self) {
        debug_assert!(current::current_task() != Some(self), "a task cannot finalize itself");
        debug_assert!(self.owner().is_none());
        debug_assert!(!self.inner().waiting_link.is_linked());
        debug_assert!(!self.inner().origin_link.is_linked());
        unsafe {
            drop(Box::from_raw(self.0.as_ptr()));
        }
    }
}

/// A reference-counted handle to a task, the safe wrapper
/// around the internal [`TaskPtr`]. Cloning increments the refcount;
/// dropping the last handle finalizes the task, which requires it to
/// already have completed and been removed from both its origin and
/// owner pools (`TaskPtr::finalize`'s preconditions).
pub struct Task {
    pub(crate) ptr: TaskPtr,
}

impl Task {
    pub(crate) fn from_ptr(ptr: TaskPtr) -> Task {
        Task { ptr }
    }

    /// Block the calling thread or task until this task completes.
    /// Callable any number of times, from any number of waiters,
    /// concurrently; idempotent once the task has already finished.
    pub fn wait(&self) -> i32 {
        self.ptr.wait();
        self.ptr
            .result()
            .expect("wait returned but no completion result was recorded")
    }

    /// The result if this task has already completed, without
    /// blocking.
    pub fn try_result(&self) -> Option<i32> {
        self.ptr.result()
    }
}

impl Clone for Task {
    fn clone(&self) -> Task {
        self.ptr.inc_ref();
        Task { ptr: self.ptr }
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        self.ptr.dec_ref();
    }
}

unsafe impl Send for Task {}
unsafe impl Sync for Task {}

/// The body of every task: runs the user entry, then performs the
/// completion protocol (broadcast, erase from both pools) before
/// returning -- which, for a `corosensei` coroutine, *is* "suspend, never
/// to be resumed": a finished coroutine can never be `resume`d again.
fn run_trampoline(task: TaskPtr, entry: Entry) -> i32 {
    let result = entry();

    let mut guard = task.inner().completion.lock();
    guard.result = Some(result);
    guard.done = true;
    task.inner().completion_condvar.broadcast(&guard);
    drop(guard);
    log::logger().log(|| Event::TaskCompleted { task: task.id() as usize });

    crate::pool::erase(task);

    result
}
