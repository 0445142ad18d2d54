//! Task-pool: FIFO ready-queue plus the set of worker threads serving it,
//! ported from `libtask/task_pool.c` and `libtask/task_pool.h`.
//!
//! The "re-migrate to origin on completion" dialect is the one
//! implemented here: `erase` schedules the finishing task back onto its
//! origin pool before touching `task_set`, rather than erasing it from
//! whichever pool happens to own it at the moment the entry function
//! returns.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crate::condvar::Condvar;
use crate::current;
use crate::error::{Result, TaskError};
use crate::list::{Link, LinkStorage};
use crate::log::{self, Event};
use crate::refcount::{Decremented, RefCount};
use crate::spinlock::SpinLock;
use crate::task::TaskPtr;
use crate::unwind;

fn next_pool_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

fn next_worker_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// A handle identifying one worker registered with a particular pool,
/// returned by [`TaskPool::start`] and consumed by [`TaskPool::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

pub(crate) struct PoolState {
    ntasks: i32,
    /// Tasks originating here, linked via their origin link.
    task_set: LinkStorage,
    /// Runnable tasks, linked via their waiting link. Strict FIFO.
    ready_queue: LinkStorage,
    /// Ids of workers currently serving this pool. Presence is the
    /// worker's "stay running" signal.
    workers: Vec<u64>,
}

impl PoolState {
    fn task_set_head(&self) -> NonNull<Link> {
        self.task_set.ptr()
    }

    fn ready_queue_head(&self) -> NonNull<Link> {
        self.ready_queue.ptr()
    }
}

/// Everything [`TaskPoolBuilder`] configures that outlives `build()`:
/// worker thread naming/stack size plus the start/exit/panic hooks
/// invoked by every worker loop this pool runs, whether started via
/// [`TaskPool::start`] or driven via [`TaskPool::execute`]. Modeled on
/// rayon's `ThreadPoolBuilder` and the registry fields it feeds.
#[derive(Default)]
pub(crate) struct PoolConfig {
    pub(crate) stack_size: Option<usize>,
    pub(crate) thread_name: Option<Box<dyn Fn(u64) -> String + Send + Sync>>,
    pub(crate) start: Option<Box<dyn Fn(u64) + Send + Sync>>,
    pub(crate) exit: Option<Box<dyn Fn(u64) + Send + Sync>>,
    pub(crate) panic: Option<Box<dyn Fn(Box<dyn std::any::Any + Send>) + Send + Sync>>,
}

pub(crate) struct PoolInner {
    id: u64,
    refcount: RefCount,
    state: SpinLock<PoolState>,
    idle: Condvar,
    config: Arc<PoolConfig>,
}

/// A manually reference-counted pointer to a pool, the `TaskPtr` of this
/// module. Duplicating it does **not** increment the refcount; every
/// owning copy must come from `.inc_ref()` and be balanced by a
/// `.dec_ref()`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct PoolPtr(NonNull<PoolInner>);

unsafe impl Send for PoolPtr {}
unsafe impl Sync for PoolPtr {}

impl PoolPtr {
    fn inner(&self) -> &PoolInner {
        unsafe { self.0.as_ref() }
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner().id
    }

    fn state_lock(&self) -> crate::spinlock::SpinLockGuard<'_, PoolState> {
        self.inner().state.lock()
    }

    fn idle(&self) -> &Condvar {
        &self.inner().idle
    }

    fn config(&self) -> &Arc<PoolConfig> {
        &self.inner().config
    }

    pub(crate) fn allocate(config: PoolConfig) -> PoolPtr {
        let mut boxed = Box::new(PoolInner {
            id: next_pool_id(),
            refcount: RefCount::new_heap(),
            state: SpinLock::new(PoolState {
                ntasks: 0,
                task_set: LinkStorage::new(),
                ready_queue: LinkStorage::new(),
                workers: Vec::new(),
            }),
            idle: Condvar::new(),
            config: Arc::new(config),
        });
        let state = boxed.state.get_mut();
        let task_set_ptr = state.task_set.ptr();
        state.task_set.init(task_set_ptr);
        let ready_ptr = state.ready_queue.ptr();
        state.ready_queue.init(ready_ptr);
        PoolPtr(NonNull::from(Box::leak(boxed)))
    }

    pub(crate) fn inc_ref(&self) {
        self.inner().refcount.inc();
    }

    pub(crate) fn dec_ref(self) {
        match self.inner().refcount.dec() {
            Decremented::Alive(_) => {}
            Decremented::Finalize { .. } => self.finalize(),
        }
    }

    pub(crate) fn size(&self) -> i32 {
        self.state_lock().ntasks
    }

    fn finalize(self) {
        let state = self.state_lock();
        assert!(
            state.workers.is_empty(),
            "task-pool finalized while workers are still registered"
        );
        assert_eq!(
            state.ntasks, 0,
            "task-pool finalized while it still owns tasks"
        );
        assert!(
            Link::is_empty(state.ready_queue_head()),
            "task-pool finalized with runnable tasks still queued"
        );
        assert!(
            Link::is_empty(state.task_set_head()),
            "task-pool finalized while tasks still originate here"
        );
        drop(state);
        unsafe {
            drop(Box::from_raw(self.0.as_ptr()));
        }
    }
}

/// Associate a task with its origin pool for the first time. Called
/// exactly once, by `Task::create`. Increments `ntasks` exactly once --
/// some prior dialects of this logic double-incremented it, which this
/// one deliberately does not, to keep `ntasks == len(task_set)`.
pub(crate) fn insert(pool: PoolPtr, task: TaskPtr) {
    let mut state = pool.state_lock();
    unsafe { Link::push_back(state.task_set_head(), task.origin_link()) };
    state.ntasks += 1;
    task.inc_ref();
    pool.inc_ref();
    task.set_owner(Some(pool));
    pool.inc_ref();
    unsafe { Link::push_back(state.ready_queue_head(), task.waiting_link()) };
    pool.idle().signal(&state);
}

/// Remove the completed task from both its origin and owner pools.
/// Called once, from the trampoline, after completion has already been
/// latched and broadcast.
pub(crate) fn erase(task: TaskPtr) {
    let origin = task.origin();
    let owner = task.owner().expect("completing task has no owner");

    if owner != origin {
        // Migrate back to origin before touching task_set; this suspends
        // and is resumed later by one of the origin pool's workers.
        schedule_unconditional(origin);
    }
    // The task's owner is now `origin`, either because it already was or
    // because `schedule_unconditional` just migrated it there.
    debug_assert_eq!(task.owner(), Some(origin));

    let mut state = origin.state_lock();
    unsafe { Link::erase(task.origin_link()) };
    state.ntasks -= 1;
    drop(state);
    // Origin-side references: the one task_set held on the task, and
    // the one the task held on `origin` for the lifetime of its
    // `origin` field.
    task.dec_ref();
    origin.dec_ref();

    // Owner-side reference: the one the task held on `origin` via its
    // `owner` field -- a distinct reference unit from the one above even
    // though it is the same pool.
    origin.dec_ref();
    task.set_owner(None);
    // No explicit final suspend here: both links are now unlinked and
    // `owner` is `None`, so nothing will ever queue this task again.
    // Returning lets the trampoline's closure return too, which is this
    // crate's equivalent of "suspend, never to be resumed" -- the
    // coroutine finishes for good and its stack is reclaimed normally
    // instead of sitting forever parked.
}

/// Requeue a *sleeping* task (popped off a condvar or semaphore
/// wait-list by its waker) onto its owner pool's ready queue. Does not
/// suspend -- the caller is the waker, not the task itself.
pub(crate) fn requeue_on_owner(task: TaskPtr) {
    let owner = task.owner().expect("sleeping task must still have an owner");
    let mut state = owner.state_lock();
    unsafe { Link::push_back(state.ready_queue_head(), task.waiting_link()) };
    owner.idle().signal(&state);
}

/// Migrate the current task to `dest` and suspend, unconditionally
/// pushing it onto `dest`'s ready queue even if `dest` is already the
/// current owner. `yield_now` and `TaskPool::schedule` are both thin
/// wrappers around this plus their own precondition checks.
fn schedule_unconditional(dest: PoolPtr) {
    let task = current::current_task().expect("schedule_unconditional called outside a task");
    let current_owner = task.owner().expect("running task must have an owner");
    if current_owner != dest {
        current_owner.dec_ref();
        dest.inc_ref();
        task.set_owner(Some(dest));
        log::logger().log(|| Event::TaskMigrated {
            task: task.id() as usize,
            from: current_owner.id() as usize,
            to: dest.id() as usize,
        });
    }
    let mut state = dest.state_lock();
    unsafe { Link::push_back(state.ready_queue_head(), task.waiting_link()) };
    dest.idle().signal(&state);
    drop(state);
    TaskPtr::suspend();
}

/// Public `TaskPool::schedule`: requires a task context.
pub(crate) fn schedule(dest: PoolPtr) -> Result<()> {
    if current::current_task().is_none() {
        return Err(TaskError::InvalidArgument(
            "schedule called outside a task context",
        ));
    }
    schedule_unconditional(dest);
    Ok(())
}

/// `yield_now`: round-trip the current task through its own owner
/// pool's ready queue.
pub(crate) fn yield_now() -> Result<()> {
    let task = current::current_task().ok_or(TaskError::InvalidArgument(
        "yield_now called outside a task context",
    ))?;
    let owner = task.owner().expect("running task must have an owner");
    schedule_unconditional(owner);
    Ok(())
}

/// The worker loop body, shared by `start`'s spawned thread
/// and `execute`'s in-place run.
fn run_worker(pool: PoolPtr, worker_id: u64) {
    if let Some(start) = pool.config().start.as_ref() {
        start(worker_id);
    }

    current::with_current_worker(pool.id(), worker_id, || {
        let mut state = pool.state_lock();
        while state.workers.contains(&worker_id) {
            match unsafe { Link::pop_front(state.ready_queue_head()) } {
                Some(link) => {
                    drop(state);
                    let task = TaskPtr::from_waiting_link(link);
                    log::logger().log(|| Event::TaskScheduled {
                        worker: worker_id as usize,
                        task: task.id() as usize,
                    });
                    if let Err(panic) = unwind::halt_unwinding(|| {
                        task.execute();
                    }) {
                        if let Some(handler) = pool.config().panic.as_ref() {
                            let abort_guard = unwind::AbortIfPanic;
                            handler(panic);
                            std::mem::forget(abort_guard);
                        }
                    }
                    state = pool.state_lock();
                }
                None => {
                    log::logger().log(|| Event::WorkerParked {
                        pool: pool.id() as usize,
                        worker: worker_id as usize,
                    });
                    state = pool.idle().wait(state);
                    log::logger().log(|| Event::WorkerWoken {
                        pool: pool.id() as usize,
                        worker: worker_id as usize,
                    });
                }
            }
        }
    });

    log::logger().log(|| Event::WorkerStopped {
        pool: pool.id() as usize,
        worker: worker_id as usize,
    });
    if let Some(exit) = pool.config().exit.as_ref() {
        exit(worker_id);
    }
}

/// Spawn a native thread that joins this pool's worker registry and
/// runs the worker loop. Thread name and
/// stack size come from the pool's `PoolConfig`, set once at
/// `TaskPoolBuilder::build` time and shared by every worker spawned
/// afterward, whether at construction or by a later explicit `start()`.
pub(crate) fn start(pool: PoolPtr) -> WorkerId {
    let worker_id = next_worker_id();
    {
        let mut state = pool.state_lock();
        state.workers.push(worker_id);
    }
    pool.inc_ref();

    let mut builder = thread::Builder::new();
    if let Some(name_fn) = pool.config().thread_name.as_ref() {
        builder = builder.name(name_fn(worker_id));
    }
    if let Some(stack_size) = pool.config().stack_size {
        builder = builder.stack_size(stack_size);
    }

    builder
        .spawn(move || {
            run_worker(pool, worker_id);
            pool.dec_ref();
        })
        .expect("failed to spawn worker thread");

    WorkerId(worker_id)
}

/// Scan the worker registry for `id`, unlink it, and wake every idle
/// worker so the departing one observes it.
pub(crate) fn stop(pool: PoolPtr, id: WorkerId) -> Result<()> {
    if current::is_current_worker(pool.id(), id.0) {
        return Err(TaskError::InvalidArgument(
            "a worker cannot stop itself",
        ));
    }
    let mut state = pool.state_lock();
    let position = state
        .workers
        .iter()
        .position(|&w| w == id.0)
        .ok_or(TaskError::NotFound)?;
    state.workers.remove(position);
    pool.idle().broadcast(&state);
    Ok(())
}

/// Run the worker loop on the calling thread instead of spawning one.
/// `InvalidArgument` if called from inside a task.
pub(crate) fn execute(pool: PoolPtr) -> Result<()> {
    if current::current_task().is_some() {
        return Err(TaskError::InvalidArgument(
            "execute called from inside a task",
        ));
    }
    let worker_id = next_worker_id();
    {
        let mut state = pool.state_lock();
        state.workers.push(worker_id);
    }
    run_worker(pool, worker_id);
    Ok(())
}

/// A reference-counted handle to a task-pool, the safe
/// wrapper around the internal [`PoolPtr`]. Cloning increments the
/// underlying refcount; dropping the last handle tears the pool down --
/// which requires every worker to already be stopped and every task
/// it ever originated to have completed, exactly the `PoolPtr::finalize`
/// preconditions.
pub struct TaskPool {
    pub(crate) ptr: PoolPtr,
}

impl TaskPool {
    /// A pool with `num_cpus::get()` workers already running and no
    /// hooks configured, the same default shape as
    /// `rayon::ThreadPoolBuilder::new().build_global()`'s implicit pool.
    pub fn new() -> TaskPool {
        TaskPoolBuilder::new()
            .build()
            .expect("default task-pool construction cannot fail")
    }

    /// Start from a [`TaskPoolBuilder`] for anything beyond the default
    /// worker count and no hooks.
    pub fn builder() -> TaskPoolBuilder {
        TaskPoolBuilder::new()
    }

    pub(crate) fn from_ptr(ptr: PoolPtr) -> TaskPool {
        ptr.inc_ref();
        TaskPool { ptr }
    }

    /// Number of tasks currently originating here.
    pub fn size(&self) -> i32 {
        self.ptr.size()
    }

    /// Spawn a native worker thread and register it with this pool.
    /// Uses the thread name function and stack size configured on the
    /// `TaskPoolBuilder` this pool was built from, if any.
    pub fn start(&self) -> WorkerId {
        start(self.ptr)
    }

    /// Deregister worker `id` and wake every idle worker so it notices.
    /// `InvalidArgument` if the calling thread *is* worker `id` -- a
    /// worker cannot stop itself. `NotFound` if `id` is not currently
    /// registered.
    pub fn stop(&self, id: WorkerId) -> Result<()> {
        stop(self.ptr, id)
    }

    /// Run the worker loop on the calling thread instead of spawning
    /// one. `InvalidArgument` if called from inside a task.
    pub fn execute(&self) -> Result<()> {
        execute(self.ptr)
    }

    /// Migrate the currently running task onto this pool and suspend.
    /// `InvalidArgument` if called outside a task context.
    pub fn schedule(&self) -> Result<()> {
        schedule(self.ptr)
    }

    /// Create a new task, originating on this pool, running `entry` to
    /// completion on a worker. `stack_size` is the task's own coroutine
    /// stack, unrelated to any worker's OS-thread stack size.
    pub fn spawn<F>(&self, stack_size: usize, entry: F) -> Result<crate::Task>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        crate::task::TaskPtr::create(self.ptr, Box::new(entry), stack_size)
            .map(crate::Task::from_ptr)
    }
}

impl Clone for TaskPool {
    fn clone(&self) -> TaskPool {
        TaskPool::from_ptr(self.ptr)
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.ptr.dec_ref();
    }
}

impl Default for TaskPool {
    fn default() -> Self {
        TaskPool::new()
    }
}

unsafe impl Send for TaskPool {}
unsafe impl Sync for TaskPool {}

/// Configures and creates a [`TaskPool`], modeled directly on
/// `rayon::ThreadPoolBuilder`.
#[derive(Default)]
pub struct TaskPoolBuilder {
    num_workers: Option<usize>,
    config: PoolConfig,
}

impl TaskPoolBuilder {
    pub fn new() -> TaskPoolBuilder {
        TaskPoolBuilder {
            num_workers: None,
            config: PoolConfig::default(),
        }
    }

    /// Number of workers to start immediately in `build()`. Defaults to
    /// `num_cpus::get()`.
    pub fn num_workers(mut self, num_workers: usize) -> TaskPoolBuilder {
        self.num_workers = Some(num_workers);
        self
    }

    /// OS-thread stack size for every worker this pool ever starts
    /// (including ones started later via `TaskPool::start`). Distinct
    /// from the per-task coroutine stack size passed to `spawn`.
    pub fn worker_stack_size(mut self, bytes: usize) -> TaskPoolBuilder {
        self.config.stack_size = Some(bytes);
        self
    }

    /// Name a worker thread from its worker id, the way
    /// `ThreadPoolBuilder::thread_name` names rayon's workers.
    pub fn thread_name<F>(mut self, closure: F) -> TaskPoolBuilder
    where
        F: Fn(u64) -> String + Send + Sync + 'static,
    {
        self.config.thread_name = Some(Box::new(closure));
        self
    }

    /// Invoked on a worker's own thread just before it starts serving
    /// the ready queue.
    pub fn start_handler<F>(mut self, closure: F) -> TaskPoolBuilder
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.config.start = Some(Box::new(closure));
        self
    }

    /// Invoked on a worker's own thread just after it stops serving the
    /// ready queue (it has been `stop`ped).
    pub fn exit_handler<F>(mut self, closure: F) -> TaskPoolBuilder
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.config.exit = Some(Box::new(closure));
        self
    }

    /// Invoked with a task's panic payload whenever `halt_unwinding`
    /// catches one, instead of letting it escape the worker loop.
    pub fn panic_handler<F>(mut self, closure: F) -> TaskPoolBuilder
    where
        F: Fn(Box<dyn std::any::Any + Send>) + Send + Sync + 'static,
    {
        self.config.panic = Some(Box::new(closure));
        self
    }

    /// Build the pool and start `num_workers` workers on it.
    pub fn build(self) -> Result<TaskPool> {
        let ptr = PoolPtr::allocate(self.config);
        let num_workers = self.num_workers.unwrap_or_else(num_cpus::get);
        for _ in 0..num_workers {
            start(ptr);
        }
        // `allocate` leaves the pool at a refcount of one, owned by this
        // function; hand that reference to the `TaskPool` instead of
        // taking a fresh one and leaking the first.
        Ok(TaskPool { ptr })
    }
}
