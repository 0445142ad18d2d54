//! Exercises the scheduling shape of `c10k_test.c` -- one acceptor task
//! handing off each "connection" to a worker task on a separate CPU
//! pool -- without any socket or epoll involvement, which is a
//! separate application concern layered on top of this runtime, not
//! part of it. The acceptor originates on the
//! `io_pool` and spawns one short-lived task per simulated client onto
//! `cpu_pool`, then waits for all of them, verifying every request got
//! exactly the reply its own index implies.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use cotask_core::TaskPool;

const NCLIENTS: i32 = 500;
const TASK_STACK_SIZE: usize = 32 * 1024;

#[test]
fn acceptor_hands_off_every_client_to_the_cpu_pool() {
    let io_pool = TaskPool::builder().num_workers(0).build().unwrap();
    let cpu_pool = TaskPool::builder().num_workers(0).build().unwrap();
    let io_worker = io_pool.start();
    let cpu_workers: Vec<_> = (0..4).map(|_| cpu_pool.start()).collect();

    let replies_received = Arc::new(AtomicI32::new(0));

    let cpu_pool_in_acceptor = cpu_pool.clone();
    let replies_received_in_acceptor = Arc::clone(&replies_received);
    let acceptor = io_pool
        .spawn(TASK_STACK_SIZE, move || {
            let mut clients = Vec::with_capacity(NCLIENTS as usize);
            for id in 0..NCLIENTS {
                let replies_received = Arc::clone(&replies_received_in_acceptor);
                let client = cpu_pool_in_acceptor
                    .spawn(TASK_STACK_SIZE, move || {
                        replies_received.fetch_add(1, Ordering::SeqCst);
                        id * id
                    })
                    .unwrap();
                clients.push((id, client));
            }
            for (id, client) in clients {
                assert_eq!(client.wait(), id * id);
            }
            0
        })
        .unwrap();

    assert_eq!(acceptor.wait(), 0);
    assert_eq!(replies_received.load(Ordering::SeqCst), NCLIENTS);

    io_pool.stop(io_worker).unwrap();
    for id in cpu_workers {
        cpu_pool.stop(id).unwrap();
    }
}
