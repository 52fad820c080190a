//! Tests specifically for miri

#![cfg(miri)]

use parloop::prelude::*;
use tracing::info;

#[test]
fn reduce_small_range() {
    static COMPUTE: ThreadPool = ThreadPool::new();
    COMPUTE.resize_to(2);

    info!("Work beginning");
    let range = IndexRange::to(64).with_chunk(4).unwrap();
    let sum = COMPUTE.reduce_with(range, |i| i, |a, b| a + b);
    assert_eq!(sum, Some(2016));
    info!("Work completed");

    COMPUTE.depopulate();
}

#[test]
fn nested_loop() {
    static COMPUTE: ThreadPool = ThreadPool::new();
    COMPUTE.resize_to(2);

    let total = std::sync::atomic::AtomicI64::new(0);
    COMPUTE.for_each(0..4, |i| {
        COMPUTE.for_each(0..4, |j| {
            total.fetch_add(i * 4 + j, std::sync::atomic::Ordering::Relaxed);
        });
    });
    assert_eq!(total.into_inner(), 120);

    COMPUTE.depopulate();
}

#[test]
fn join_reclaims_or_waits() {
    static COMPUTE: ThreadPool = ThreadPool::new();
    COMPUTE.resize_to(2);

    let data = vec![1_u64; 32];
    fn sum(slice: &[u64], worker: &Worker) -> u64 {
        if slice.len() <= 2 {
            return slice.iter().sum();
        }
        let (left, right) = slice.split_at(slice.len() / 2);
        let (a, b) = worker.join(|w| sum(left, w), |w| sum(right, w));
        a + b
    }

    let total = COMPUTE.in_worker(|worker| sum(&data, worker));
    assert_eq!(total, 32);

    COMPUTE.depopulate();
}
