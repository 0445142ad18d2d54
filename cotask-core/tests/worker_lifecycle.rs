//! Pool/worker lifecycle edge cases: stopping an idle (parked) worker,
//! the two `stop` preconditions, `TaskPool::size`, and `Task::wait`
//! being safe to call from many waiters at once.

use std::sync::Arc;
use std::thread;

use cotask_core::{current_pool, TaskError, TaskPool};

const TASK_STACK_SIZE: usize = 16 * 1024;

#[test]
fn stopping_an_idle_worker_wakes_it_and_it_exits() {
    let pool = TaskPool::builder().num_workers(0).build().unwrap();
    let worker = pool.start();
    // Give the worker a moment to park on the idle condvar with nothing
    // in the ready queue before we ask it to stop.
    thread::sleep(std::time::Duration::from_millis(20));
    pool.stop(worker).unwrap();
}

#[test]
fn stop_rejects_an_unregistered_worker_id() {
    let pool = TaskPool::builder().num_workers(0).build().unwrap();
    let worker = pool.start();
    pool.stop(worker).unwrap();
    assert_eq!(pool.stop(worker), Err(TaskError::NotFound));
}

#[test]
fn a_worker_cannot_stop_itself() {
    let pool = TaskPool::builder().num_workers(0).build().unwrap();
    let worker = pool.start();

    let task = pool
        .spawn(TASK_STACK_SIZE, move || {
            let here = current_pool().expect("running inside a task");
            match here.stop(worker) {
                Err(TaskError::InvalidArgument(_)) => 0,
                other => panic!("expected InvalidArgument, got {other:?}"),
            }
        })
        .unwrap();

    assert_eq!(task.wait(), 0);
    pool.stop(worker).unwrap();
}

#[test]
fn pool_size_tracks_originating_tasks() {
    let pool = TaskPool::builder().num_workers(0).build().unwrap();
    let worker = pool.start();
    assert_eq!(pool.size(), 0);

    let task = pool.spawn(TASK_STACK_SIZE, || 0).unwrap();
    assert_eq!(task.wait(), 0);
    assert_eq!(pool.size(), 0);

    pool.stop(worker).unwrap();
}

#[test]
fn task_wait_is_idempotent_across_many_concurrent_waiters() {
    let pool = TaskPool::builder().num_workers(2).build().unwrap();
    let task = Arc::new(pool.spawn(TASK_STACK_SIZE, || 7).unwrap());

    let waiters: Vec<_> = (0..16)
        .map(|_| {
            let task = Arc::clone(&task);
            thread::spawn(move || task.wait())
        })
        .collect();

    for waiter in waiters {
        assert_eq!(waiter.join().unwrap(), 7);
    }
    assert_eq!(task.wait(), 7);
}
