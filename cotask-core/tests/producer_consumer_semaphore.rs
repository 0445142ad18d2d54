//! Ported from `producer_consumer_semaphore_test.c`: the same bounded
//! ring buffer as the condvar test, but synchronized with a pair of
//! counting semaphores (`free_slots`/`available`) instead of condvars,
//! exercising the complementary wakeup path.
//!
//! The index a producer/consumer claims into the ring buffer is
//! assigned under the spinlock, after the matching semaphore `down`
//! returns -- mirroring the source exactly. Claiming the index first and
//! only then waiting on the semaphore would let two producers' writes
//! land in the buffer out of index order (the semaphore only balances
//! counts, it does not order waiters by the index they happen to hold),
//! which would make the final `produced[i] == consumed[i]` check flaky
//! under genuine thread parallelism.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cotask_core::{Semaphore, SpinLock, TaskPool};

const NITEMS: usize = 1000;
const MAXITEMS: usize = 5;
const NPRODUCERS: usize = 6;
const NCONSUMERS: usize = 8;
const NWORKERS: usize = 6;
const TASK_STACK_SIZE: usize = 64 * 1024;

struct RingState {
    buffer: [i32; MAXITEMS],
    producer_next: usize,
    consumer_next: usize,
}

struct Shared {
    ring: SpinLock<RingState>,
    free_slots: Semaphore,
    available: Semaphore,
    produced: SpinLock<Vec<i32>>,
    consumed: SpinLock<Vec<i32>>,
    produced_count: AtomicUsize,
    consumed_count: AtomicUsize,
}

#[test]
fn producer_consumer_via_semaphore_preserves_order() {
    let shared = Arc::new(Shared {
        ring: SpinLock::new(RingState {
            buffer: [0; MAXITEMS],
            producer_next: 0,
            consumer_next: 0,
        }),
        free_slots: Semaphore::new(MAXITEMS as i64),
        available: Semaphore::new(0),
        produced: SpinLock::new(vec![0; NITEMS]),
        consumed: SpinLock::new(vec![0; NITEMS]),
        produced_count: AtomicUsize::new(0),
        consumed_count: AtomicUsize::new(0),
    });

    let pool = TaskPool::builder().num_workers(0).build().unwrap();
    let workers: Vec<_> = (0..NWORKERS).map(|_| pool.start()).collect();

    let mut tasks = Vec::new();
    for seed in 0..NPRODUCERS {
        let shared = Arc::clone(&shared);
        tasks.push(
            pool.spawn(TASK_STACK_SIZE, move || loop {
                if shared.produced_count.fetch_add(1, Ordering::SeqCst) >= NITEMS {
                    return 0;
                }

                shared.free_slots.down();
                let mut guard = shared.ring.lock();
                let index = guard.producer_next;
                guard.producer_next += 1;
                let value = (index as i32) * 31 + seed as i32;
                guard.buffer[index % MAXITEMS] = value;
                drop(guard);

                shared.produced.lock()[index] = value;
                shared.available.up();
            })
            .unwrap(),
        );
    }
    for _ in 0..NCONSUMERS {
        let shared = Arc::clone(&shared);
        tasks.push(
            pool.spawn(TASK_STACK_SIZE, move || loop {
                if shared.consumed_count.fetch_add(1, Ordering::SeqCst) >= NITEMS {
                    return 0;
                }

                shared.available.down();
                let mut guard = shared.ring.lock();
                let index = guard.consumer_next;
                guard.consumer_next += 1;
                let value = guard.buffer[index % MAXITEMS];
                drop(guard);

                shared.consumed.lock()[index] = value;
                shared.free_slots.up();
            })
            .unwrap(),
        );
    }

    for task in &tasks {
        assert_eq!(task.wait(), 0);
    }

    let produced = shared.produced.lock();
    let consumed = shared.consumed.lock();
    for i in 0..NITEMS {
        assert_eq!(produced[i], consumed[i]);
    }
    drop(produced);
    drop(consumed);

    for id in workers {
        pool.stop(id).unwrap();
    }
}
