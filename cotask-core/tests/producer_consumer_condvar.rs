//! Ported from `producer_consumer_condition_test.c`: a bounded ring
//! buffer shared by several producer and consumer tasks on one pool,
//! synchronized with a spinlock plus two condvars (`full`/`empty`).
//! Consumers must observe exactly the values producers wrote, in the
//! same relative order per slot index.

use std::sync::Arc;

use cotask_core::{Condvar, SpinLock, TaskPool};

const NITEMS: usize = 2000;
const MAXITEMS: usize = 5;
const NPRODUCERS: usize = 6;
const NCONSUMERS: usize = 8;
const NWORKERS: usize = 6;
const TASK_STACK_SIZE: usize = 64 * 1024;

struct State {
    buffer: [i32; MAXITEMS],
    size: usize,
    producer_next: usize,
    consumer_next: usize,
    produced: Vec<i32>,
    consumed: Vec<i32>,
}

struct Shared {
    state: SpinLock<State>,
    full: Condvar,
    empty: Condvar,
}

#[test]
fn producer_consumer_via_condvar_preserves_order() {
    let shared = Arc::new(Shared {
        state: SpinLock::new(State {
            buffer: [0; MAXITEMS],
            size: 0,
            producer_next: 0,
            consumer_next: 0,
            produced: vec![0; NITEMS],
            consumed: vec![0; NITEMS],
        }),
        full: Condvar::new(),
        empty: Condvar::new(),
    });

    let pool = TaskPool::builder().num_workers(0).build().unwrap();
    let workers: Vec<_> = (0..NWORKERS).map(|_| pool.start()).collect();

    let mut tasks = Vec::new();
    for seed in 0..NPRODUCERS {
        let shared = Arc::clone(&shared);
        tasks.push(
            pool.spawn(TASK_STACK_SIZE, move || {
                loop {
                    let mut guard = shared.state.lock();
                    loop {
                        if guard.producer_next >= NITEMS {
                            return 0;
                        }
                        if guard.size == 0 {
                            shared.empty.broadcast(&guard);
                        }
                        if guard.size < MAXITEMS {
                            let index = guard.producer_next;
                            guard.producer_next += 1;
                            let value = (index as i32) * 31 + seed as i32;
                            guard.produced[index] = value;
                            guard.buffer[index % MAXITEMS] = value;
                            guard.size += 1;
                            break;
                        }
                        guard = shared.full.wait(guard);
                    }
                }
            })
            .unwrap(),
        );
    }
    for _ in 0..NCONSUMERS {
        let shared = Arc::clone(&shared);
        tasks.push(
            pool.spawn(TASK_STACK_SIZE, move || {
                loop {
                    let mut guard = shared.state.lock();
                    loop {
                        if guard.consumer_next >= NITEMS {
                            return 0;
                        }
                        if guard.size == MAXITEMS {
                            shared.full.broadcast(&guard);
                        }
                        if guard.size > 0 {
                            let index = guard.consumer_next;
                            guard.consumer_next += 1;
                            let value = guard.buffer[index % MAXITEMS];
                            guard.consumed[index] = value;
                            guard.size -= 1;
                            break;
                        }
                        guard = shared.empty.wait(guard);
                    }
                }
            })
            .unwrap(),
        );
    }

    for task in &tasks {
        assert_eq!(task.wait(), 0);
    }

    let final_state = shared.state.lock();
    for i in 0..NITEMS {
        assert_eq!(final_state.produced[i], final_state.consumed[i]);
    }
    drop(final_state);

    for id in workers {
        pool.stop(id).unwrap();
    }
}
