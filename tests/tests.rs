//! Integration tests for parallel loops and reductions.

#![cfg(not(loom))]

use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::panic::panic_any;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::thread;
use std::thread::available_parallelism;

use parloop::LoopTask;
use parloop::RangeError;
use parloop::prelude::*;
use tracing::Level;
use tracing::info;
use tracing_subscriber::fmt::Subscriber;

// -----------------------------------------------------------------------------
// Infrastructure

/// Runs the closure with a subscriber that prints everything logged on the
/// test thread.
fn trace<F>(f: F)
where
    F: FnOnce(),
{
    let subscriber = Subscriber::builder()
        .compact()
        .with_max_level(Level::TRACE)
        .without_time()
        .with_test_writer()
        .finish();

    tracing::subscriber::with_default(subscriber, f);
}

/// Counts how many times each index of `[begin, end)` was visited.
struct Visits {
    begin: i64,
    counts: Vec<AtomicUsize>,
}

impl Visits {
    fn new(begin: i64, end: i64) -> Visits {
        let counts = (begin..end).map(|_| AtomicUsize::new(0)).collect();
        Visits { begin, counts }
    }

    fn visit(&self, index: i64) {
        self.counts[(index - self.begin) as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Asserts that every index reachable by `step` was visited exactly once,
    /// and every other index never.
    fn assert_exactly_once(&self, step: i64) {
        for (offset, count) in self.counts.iter().enumerate() {
            let expected = usize::from(offset as i64 % step == 0);
            assert_eq!(
                count.load(Ordering::Relaxed),
                expected,
                "index {} with step {}",
                self.begin + offset as i64,
                step
            );
        }
    }
}

#[derive(Debug, PartialEq)]
struct Failure(i64);

// -----------------------------------------------------------------------------
// Pool management

#[test]
fn resize_pool() {
    static THREAD_POOL: ThreadPool = ThreadPool::new();

    trace(|| {
        assert_eq!(THREAD_POOL.num_threads(), 0);
        assert_eq!(THREAD_POOL.resize_to(3), 3);
        assert_eq!(THREAD_POOL.grow(2), 5);
        assert_eq!(THREAD_POOL.shrink(4), 1);
        assert_eq!(THREAD_POOL.populate(), 1);
        assert_eq!(THREAD_POOL.depopulate(), 0);
        assert_eq!(THREAD_POOL.shrink(1), 0);

        let cores = available_parallelism().map_or(1, |n| n.get());
        assert_eq!(THREAD_POOL.resize_to_available(), cores);
        assert_eq!(THREAD_POOL.resize_per_core(2), cores * 2);
        assert_eq!(THREAD_POOL.num_threads(), cores * 2);
        assert_eq!(THREAD_POOL.depopulate(), 0);
    });
}

#[test]
fn empty_pool_starts_a_worker() {
    static THREAD_POOL: ThreadPool = ThreadPool::new();

    let sum = THREAD_POOL.reduce_with(0..100, |i| i, |a, b| a + b);
    assert_eq!(sum, Some(4950));
    assert_eq!(THREAD_POOL.num_threads(), 1);
    THREAD_POOL.depopulate();
}

#[test]
fn global_pool_is_populated() {
    let pool = parloop::global_pool();
    assert!(pool.is(&parloop::THREAD_POOL));
    assert!(pool.num_threads() > 0);
}

// -----------------------------------------------------------------------------
// Loops

#[test]
fn loop_visits_every_index_once() {
    static POOL_1: ThreadPool = ThreadPool::new();
    static POOL_2: ThreadPool = ThreadPool::new();
    static POOL_4: ThreadPool = ThreadPool::new();

    trace(|| {
        for (pool, size) in [(&POOL_1, 1), (&POOL_2, 2), (&POOL_4, 4)] {
            pool.resize_to(size);
            for step in [1, 2, 3, 7, 64] {
                for chunk in [1, 3, 16, 1000] {
                    info!("pool of {}, step {}, chunk {}", size, step, chunk);
                    let visits = Visits::new(-50, 200);
                    let range = IndexRange::try_new(-50, 200, step, chunk).unwrap();
                    pool.for_each(range, |i| visits.visit(i));
                    visits.assert_exactly_once(step);
                }
            }
            pool.depopulate();
        }
    });
}

#[test]
fn loop_on_global_pool() {
    let visits = Visits::new(0, 10_000);
    parloop::for_each(0..10_000, |i| visits.visit(i));
    visits.assert_exactly_once(1);
}

#[test]
fn empty_loop_does_nothing() {
    let calls = AtomicUsize::new(0);
    for range in [IndexRange::new(5, 5), IndexRange::new(10, 0), IndexRange::to(-3)] {
        parloop::for_each(range, |_| {
            calls.fetch_add(1, Ordering::Relaxed);
        });
    }
    assert_eq!(calls.load(Ordering::Relaxed), 0);
}

#[test]
fn nested_loops() {
    static THREAD_POOL: ThreadPool = ThreadPool::new();

    // With one worker, an inner loop that waited for a free worker would never
    // start.
    for size in [1, 3] {
        THREAD_POOL.resize_to(size);
        let visits = Visits::new(0, 8 * 50);
        THREAD_POOL.for_each(0..8, |i| {
            assert!(Worker::is_worker_thread());
            THREAD_POOL.for_each(0..50, |j| visits.visit(i * 50 + j));
        });
        visits.assert_exactly_once(1);
    }
    THREAD_POOL.depopulate();
}

#[test]
fn nested_reduce_on_global_pool() {
    let total = parloop::reduce_with(
        0..20,
        |i| parloop::reduce_with(0..i, |j| j, |a, b| a + b).unwrap_or(0),
        |a, b| a + b,
    );
    // Sum over i of i * (i - 1) / 2.
    let expected: i64 = (0..20).map(|i| i * (i - 1) / 2).sum();
    assert_eq!(total, Some(expected));
}

#[test]
fn loop_through_worker() {
    static THREAD_POOL: ThreadPool = ThreadPool::new();
    THREAD_POOL.resize_to(2);

    let total = AtomicI64::new(0);
    THREAD_POOL.in_worker(|worker| {
        worker.for_each(IndexRange::new(0, 100).with_step(10).unwrap(), |i| {
            total.fetch_add(i, Ordering::Relaxed);
        });
    });
    assert_eq!(total.load(Ordering::Relaxed), 450);

    THREAD_POOL.depopulate();
}

#[test]
fn custom_loop_body() {
    static THREAD_POOL: ThreadPool = ThreadPool::new();
    THREAD_POOL.resize_to(2);

    struct Record<'a>(&'a Visits);

    impl LoopBody for Record<'_> {
        fn compute(&self, index: i64) {
            self.0.visit(index);
        }
    }

    let visits = Visits::new(0, 500);
    let body = Record(&visits);
    let range = IndexRange::try_new(0, 500, 5, 4).unwrap();
    THREAD_POOL.in_worker(|worker| LoopTask::new(range, &body).execute(worker));
    visits.assert_exactly_once(5);

    THREAD_POOL.depopulate();
}

// -----------------------------------------------------------------------------
// Reductions

#[test]
fn sum_is_independent_of_chunk() {
    static THREAD_POOL: ThreadPool = ThreadPool::new();
    THREAD_POOL.resize_to(4);

    for chunk in [1, 7, 1000] {
        let range = IndexRange::to(1000).with_chunk(chunk).unwrap();
        assert_eq!(THREAD_POOL.reduce_with(range, |i| i, |a, b| a + b), Some(499_500));
        assert_eq!(parloop::reduce_with(range, |i| i, |a, b| a + b), Some(499_500));
    }

    THREAD_POOL.depopulate();
}

#[test]
fn sum_of_squares() {
    let range = IndexRange::try_new(0, 8, 1, 2).unwrap();
    let body = ReduceFn::new(|i| i * i, |a, b| a + b);
    assert_eq!(parloop::reduce(range, body), Some(140));
}

#[test]
fn stepped_sum() {
    let range = IndexRange::try_new(-10, 91, 4, 3).unwrap();
    let expected: i64 = (-10..91).step_by(4).sum();
    assert_eq!(parloop::reduce_with(range, |i| i, |a, b| a + b), Some(expected));
}

#[test]
fn custom_reduce_body() {
    /// Spells out the indices, separated by commas.
    struct Spell;

    impl ReduceBody<String> for Spell {
        fn compute(&self, index: i64) -> String {
            index.to_string()
        }

        fn combine(&self, left: String, right: String) -> String {
            format!("{left},{right}")
        }
    }

    let range = IndexRange::try_new(1, 12, 2, 2).unwrap();
    assert_eq!(parloop::reduce(range, Spell).as_deref(), Some("1,3,5,7,9,11"));
}

#[test]
fn empty_reduce_is_none() {
    let calls = AtomicUsize::new(0);
    let result = parloop::reduce_with(
        IndexRange::new(3, 3),
        |i| {
            calls.fetch_add(1, Ordering::Relaxed);
            i
        },
        |a, b| {
            calls.fetch_add(1, Ordering::Relaxed);
            a + b
        },
    );
    assert_eq!(result, None);
    assert_eq!(calls.load(Ordering::Relaxed), 0);
}

#[test]
fn empty_ranges_leave_pool_empty() {
    static THREAD_POOL: ThreadPool = ThreadPool::new();

    for range in [IndexRange::new(5, 5), IndexRange::new(10, 0)] {
        THREAD_POOL.for_each(range, |_| panic!("visited an empty range"));
        assert_eq!(THREAD_POOL.try_for_each(range, |i| Err(Failure(i))), Ok(()));
        assert_eq!(THREAD_POOL.reduce_with(range, |i| i, |a, b| a + b), None);
        let result = THREAD_POOL.try_reduce(range, |i| Err(Failure(i)), |a: i64, b| a + b);
        assert_eq!(result, Ok(None));
    }

    assert_eq!(THREAD_POOL.num_threads(), 0);
}

#[test]
fn reduce_preserves_index_order() {
    static THREAD_POOL: ThreadPool = ThreadPool::new();
    THREAD_POOL.resize_to(4);

    for chunk in [1, 3, 50] {
        let range = IndexRange::to(300).with_chunk(chunk).unwrap();
        let concatenated = THREAD_POOL.reduce_with(
            range,
            |i| vec![i],
            |mut left, right| {
                left.extend(right);
                left
            },
        );
        assert_eq!(concatenated, Some((0..300).collect::<Vec<_>>()));
    }

    THREAD_POOL.depopulate();
}

#[test]
fn float_sum_is_reproducible_across_pool_sizes() {
    static POOL_1: ThreadPool = ThreadPool::new();
    static POOL_4: ThreadPool = ThreadPool::new();
    POOL_1.resize_to(1);
    POOL_4.resize_to(4);

    let range = IndexRange::to(10_000).with_chunk(10).unwrap();
    let harmonic = |i: i64| 1.0 / (i as f64 + 1.0);
    let a = POOL_1.reduce_with(range, harmonic, |a, b| a + b).unwrap();
    let b = POOL_4.reduce_with(range, harmonic, |a, b| a + b).unwrap();
    assert_eq!(a.to_bits(), b.to_bits());

    POOL_1.depopulate();
    POOL_4.depopulate();
}

#[test]
fn reduce_through_worker() {
    static THREAD_POOL: ThreadPool = ThreadPool::new();
    THREAD_POOL.resize_to(2);

    let (sum, max) = THREAD_POOL.join(
        |worker| worker.reduce_with(0..100, |i| i, |a, b| a + b),
        |worker| worker.reduce(0..100, ReduceFn::new(|i| (i * 37) % 101, i64::max)),
    );
    assert_eq!(sum, Some(4950));
    assert_eq!(max, Some(100));

    THREAD_POOL.depopulate();
}

// -----------------------------------------------------------------------------
// Failures

#[test]
fn loop_panic_reaches_caller() {
    static THREAD_POOL: ThreadPool = ThreadPool::new();
    THREAD_POOL.resize_to(4);

    let result = catch_unwind(AssertUnwindSafe(|| {
        THREAD_POOL.for_each(0..1000, |i| {
            if i == 617 {
                panic!("failed at index {i}");
            }
        });
    }));
    let payload = result.unwrap_err();
    assert_eq!(payload.downcast_ref::<String>().unwrap(), "failed at index 617");

    // The pool is still usable.
    let sum = THREAD_POOL.reduce_with(0..1000, |i| i, |a, b| a + b);
    assert_eq!(sum, Some(499_500));

    THREAD_POOL.depopulate();
}

#[test]
fn reduce_panic_keeps_payload() {
    static THREAD_POOL: ThreadPool = ThreadPool::new();
    THREAD_POOL.resize_to(3);

    let result = catch_unwind(AssertUnwindSafe(|| {
        THREAD_POOL.reduce_with(
            0..500,
            |i| {
                if i == 42 {
                    panic_any(Failure(i));
                }
                i
            },
            |a, b| a + b,
        )
    }));
    let payload = result.unwrap_err();
    assert_eq!(payload.downcast_ref::<Failure>(), Some(&Failure(42)));

    THREAD_POOL.depopulate();
}

#[test]
fn join_panic_reaches_caller() {
    static THREAD_POOL: ThreadPool = ThreadPool::new();
    THREAD_POOL.resize_to(2);

    let result = catch_unwind(AssertUnwindSafe(|| {
        THREAD_POOL.join(|_| 1, |_| -> i32 { panic_any(Failure(2)) })
    }));
    assert_eq!(result.unwrap_err().downcast_ref::<Failure>(), Some(&Failure(2)));

    assert_eq!(THREAD_POOL.join(|_| 1, |_| 2), (1, 2));

    THREAD_POOL.depopulate();
}

#[test]
fn try_for_each_returns_lowest_error() {
    let visits = Visits::new(0, 100);
    let result = parloop::try_for_each(0..100, |i| {
        visits.visit(i);
        if i % 30 == 29 { Err(Failure(i)) } else { Ok(()) }
    });
    assert_eq!(result, Err(Failure(29)));
    visits.assert_exactly_once(1);

    assert_eq!(parloop::try_for_each(0..100, |_| Ok::<(), Failure>(())), Ok(()));
    assert_eq!(parloop::try_for_each(0..0, |i| Err(Failure(i))), Ok(()));
}

#[test]
fn try_reduce_returns_lowest_error() {
    static THREAD_POOL: ThreadPool = ThreadPool::new();
    THREAD_POOL.resize_to(4);

    let result = THREAD_POOL.try_reduce(
        IndexRange::to(200).with_chunk(5).unwrap(),
        |i| if i >= 120 { Err(Failure(i)) } else { Ok(i) },
        |a, b| a + b,
    );
    assert_eq!(result, Err(Failure(120)));

    let result = THREAD_POOL.try_reduce(0..200, Ok::<i64, Failure>, |a, b| a + b);
    assert_eq!(result, Ok(Some(19_900)));

    let result = parloop::try_reduce(0..0, Ok::<i64, Failure>, |a, b| a + b);
    assert_eq!(result, Ok(None));

    THREAD_POOL.depopulate();
}

#[test]
fn invalid_ranges_are_rejected() {
    let range = IndexRange::to(10);
    assert_eq!(range.with_step(0), Err(RangeError::NonPositiveStep(0)));
    assert_eq!(range.with_chunk(-4), Err(RangeError::NonPositiveChunk(-4)));
    assert_eq!(
        RangeError::NonPositiveStep(0).to_string(),
        "range step must be positive, got 0"
    );
}

// -----------------------------------------------------------------------------
// Concurrent callers

#[test]
fn concurrent_external_callers() {
    static THREAD_POOL: ThreadPool = ThreadPool::new();
    THREAD_POOL.resize_to(2);

    thread::scope(|scope| {
        let handles: Vec<_> = (1..=8_i64)
            .map(|n| {
                scope.spawn(move || {
                    let end = n * 1000;
                    let range = IndexRange::to(end).with_chunk(n).unwrap();
                    let sum = THREAD_POOL.reduce_with(range, |i| i, |a, b| a + b);
                    (sum, end * (end - 1) / 2)
                })
            })
            .collect();

        for handle in handles {
            let (sum, expected) = handle.join().unwrap();
            assert_eq!(sum, Some(expected));
        }
    });

    THREAD_POOL.depopulate();
}

#[test]
fn worker_identity() {
    static THREAD_POOL: ThreadPool = ThreadPool::new();
    THREAD_POOL.resize_to(2);

    assert!(!Worker::is_worker_thread());
    assert_eq!(Worker::map_current(|worker| worker.index()), None);

    let (on_pool, index) = THREAD_POOL.in_worker(|worker| {
        let on_pool = Worker::map_current(|current| current.thread_pool().is(&THREAD_POOL));
        (on_pool, worker.index())
    });
    assert_eq!(on_pool, Some(true));
    assert!(index < 2);

    THREAD_POOL.depopulate();
}
