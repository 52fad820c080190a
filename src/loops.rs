//! Parallel loops: run a body once for every index of a range.

use crate::range::IndexRange;
use crate::range::Split;
use crate::reduce::ReduceBody;
use crate::reduce::ReduceTask;
use crate::thread_pool::ThreadPool;
use crate::thread_pool::Worker;
#[cfg(not(loom))]
use crate::thread_pool::global_pool;

// -----------------------------------------------------------------------------
// Loop bodies

/// The work done for a single index of a parallel loop.
///
/// The body is shared by every worker taking part in the loop, hence the
/// `Sync` bound. It must not depend on the order in which indices are visited,
/// nor write to state that another index writes to: the pool provides no
/// locking around it.
///
/// Every `Fn(i64) + Sync` closure is a loop body; the entry points such as
/// [`for_each`] take closures directly. Other implementors are run through
/// [`LoopTask`].
pub trait LoopBody: Sync {
    /// Runs the body for one index.
    fn compute(&self, index: i64);
}

impl<F> LoopBody for F
where
    F: Fn(i64) + Sync,
{
    #[inline(always)]
    fn compute(&self, index: i64) {
        self(index);
    }
}

// -----------------------------------------------------------------------------
// Loop task

/// A sub-range of a loop, together with the body it runs.
///
/// Executing a task either runs the whole sub-range on the current worker, or
/// cuts it in two, makes the upper half available to other workers and runs
/// the lower half itself. The call returns once both halves are done.
pub struct LoopTask<'b, B: ?Sized> {
    range: IndexRange,
    body: &'b B,
}

impl<'b, B> LoopTask<'b, B>
where
    B: LoopBody + ?Sized,
{
    /// Creates a task covering `range`.
    #[inline]
    pub fn new(range: IndexRange, body: &'b B) -> LoopTask<'b, B> {
        LoopTask { range, body }
    }

    /// Runs the task to completion on `worker`, forking as needed.
    ///
    /// If the body panics, the panic is resumed here once every half that was
    /// already handed to another worker has finished.
    pub fn execute(self, worker: &Worker) {
        let LoopTask { range, body } = self;
        match range.split() {
            Split::Serial => {
                for index in range.iter() {
                    body.compute(index);
                }
            }
            Split::Halves(left, None) => LoopTask::new(left, body).execute(worker),
            Split::Halves(left, Some(right)) => {
                worker.join(
                    |worker| LoopTask::new(left, body).execute(worker),
                    |worker| LoopTask::new(right, body).execute(worker),
                );
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Fallible loops

/// Runs a fallible body as a reduction that keeps the leftmost error.
struct TryLoop<F> {
    body: F,
}

impl<F, E> ReduceBody<Result<(), E>> for TryLoop<F>
where
    F: Fn(i64) -> Result<(), E> + Sync,
{
    #[inline]
    fn compute(&self, index: i64) -> Result<(), E> {
        (self.body)(index)
    }

    #[inline]
    fn combine(&self, left: Result<(), E>, right: Result<(), E>) -> Result<(), E> {
        left.and(right)
    }
}

// -----------------------------------------------------------------------------
// Entry points

impl Worker {
    /// Runs `body` for every index of `range`, on this worker and any other
    /// worker of its pool that is idle.
    ///
    /// Use this from inside a job that already holds a `&Worker`; elsewhere,
    /// see [`ThreadPool::for_each`] and [`for_each`].
    pub fn for_each<F>(&self, range: impl Into<IndexRange>, body: F)
    where
        F: Fn(i64) + Sync,
    {
        LoopTask::new(range.into(), &body).execute(self);
    }

    /// Runs a fallible body for every index of `range`.
    ///
    /// Every index is visited even if some fail. If any index fails, one of the
    /// errors is returned: the one belonging to the lowest index among those
    /// that failed.
    pub fn try_for_each<F, E>(&self, range: impl Into<IndexRange>, body: F) -> Result<(), E>
    where
        F: Fn(i64) -> Result<(), E> + Sync,
        E: Send,
    {
        let body = TryLoop { body };
        let result: Option<Result<(), E>> = ReduceTask::new(range.into(), &body).execute(self);
        result.unwrap_or(Ok(()))
    }
}

impl ThreadPool {
    /// Runs `body` for every index of `range` on this pool, blocking until
    /// every index is done.
    ///
    /// When called from one of this pool's workers, the loop runs inline on
    /// that worker instead of being queued behind the work that is already
    /// running. An empty range returns right away and never starts a worker.
    ///
    /// ```
    /// use core::sync::atomic::{AtomicI64, Ordering};
    /// use parloop::{IndexRange, ThreadPool};
    ///
    /// static THREAD_POOL: ThreadPool = ThreadPool::new();
    /// THREAD_POOL.resize_to(2);
    ///
    /// let total = AtomicI64::new(0);
    /// THREAD_POOL.for_each(0..100, |i| {
    ///     total.fetch_add(i, Ordering::Relaxed);
    /// });
    /// assert_eq!(total.into_inner(), 4950);
    ///
    /// THREAD_POOL.depopulate();
    /// ```
    pub fn for_each<F>(&'static self, range: impl Into<IndexRange>, body: F)
    where
        F: Fn(i64) + Sync,
    {
        let range = range.into();
        if range.is_empty() {
            return;
        }
        self.in_worker(|worker| LoopTask::new(range, &body).execute(worker));
    }

    /// Runs a fallible body for every index of `range` on this pool.
    ///
    /// See [`Worker::try_for_each`].
    pub fn try_for_each<F, E>(&'static self, range: impl Into<IndexRange>, body: F) -> Result<(), E>
    where
        F: Fn(i64) -> Result<(), E> + Sync,
        E: Send,
    {
        let range = range.into();
        if range.is_empty() {
            return Ok(());
        }
        self.in_worker(|worker| worker.try_for_each(range, &body))
    }
}

/// Runs `body` for every index of `range` on the global thread pool.
///
/// An empty range returns right away, without starting the pool.
///
/// See [`ThreadPool::for_each`].
#[cfg(not(loom))]
pub fn for_each<F>(range: impl Into<IndexRange>, body: F)
where
    F: Fn(i64) + Sync,
{
    let range = range.into();
    if range.is_empty() {
        return;
    }
    global_pool().for_each(range, body);
}

/// Runs a fallible body for every index of `range` on the global thread pool.
///
/// See [`Worker::try_for_each`].
#[cfg(not(loom))]
pub fn try_for_each<F, E>(range: impl Into<IndexRange>, body: F) -> Result<(), E>
where
    F: Fn(i64) -> Result<(), E> + Sync,
    E: Send,
{
    let range = range.into();
    if range.is_empty() {
        return Ok(());
    }
    global_pool().try_for_each(range, body)
}
