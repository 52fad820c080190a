//! Parallel reductions: compute a value for every index of a range and combine
//! the values into one.

use crate::range::IndexRange;
use crate::range::Split;
use crate::thread_pool::ThreadPool;
use crate::thread_pool::Worker;
#[cfg(not(loom))]
use crate::thread_pool::global_pool;

// -----------------------------------------------------------------------------
// Reduce bodies

/// The two halves of a reduction: a value per index, and a way to merge two
/// values.
///
/// `combine` must be associative. Values are merged following the binary tree
/// of range splits, so the grouping of the calls depends on the chunk size,
/// but the order never changes: the `left` operand always covers lower indices
/// than the `right` one. An associative combiner that is not commutative, such
/// as concatenation, therefore produces the same value as a serial left fold.
/// A combiner that is only approximately associative, such as floating point
/// addition, may give results that differ with the chunk size.
///
/// ```
/// use parloop::{IndexRange, ReduceFn};
///
/// let range = IndexRange::new(0, 8).with_chunk(2).unwrap();
/// let body = ReduceFn::new(|i| i * i, |a, b| a + b);
/// assert_eq!(parloop::reduce(range, body), Some(140));
/// ```
pub trait ReduceBody<V>: Sync {
    /// Computes the value of one index.
    fn compute(&self, index: i64) -> V;

    /// Merges the values of two adjacent sub-ranges, `left` covering the lower
    /// indices.
    fn combine(&self, left: V, right: V) -> V;
}

/// A [`ReduceBody`] made of two closures.
pub struct ReduceFn<C, M> {
    compute: C,
    combine: M,
}

impl<C, M> ReduceFn<C, M> {
    /// Pairs a per-index closure with a combining closure.
    pub fn new<V>(compute: C, combine: M) -> ReduceFn<C, M>
    where
        C: Fn(i64) -> V + Sync,
        M: Fn(V, V) -> V + Sync,
    {
        ReduceFn { compute, combine }
    }
}

impl<V, C, M> ReduceBody<V> for ReduceFn<C, M>
where
    C: Fn(i64) -> V + Sync,
    M: Fn(V, V) -> V + Sync,
{
    #[inline(always)]
    fn compute(&self, index: i64) -> V {
        (self.compute)(index)
    }

    #[inline(always)]
    fn combine(&self, left: V, right: V) -> V {
        (self.combine)(left, right)
    }
}

/// A reduction whose per-index computation can fail. The error of the lowest
/// failed index wins.
struct TryReduce<C, M> {
    compute: C,
    combine: M,
}

impl<V, E, C, M> ReduceBody<Result<V, E>> for TryReduce<C, M>
where
    C: Fn(i64) -> Result<V, E> + Sync,
    M: Fn(V, V) -> V + Sync,
{
    #[inline]
    fn compute(&self, index: i64) -> Result<V, E> {
        (self.compute)(index)
    }

    #[inline]
    fn combine(&self, left: Result<V, E>, right: Result<V, E>) -> Result<V, E> {
        Ok((self.combine)(left?, right?))
    }
}

// -----------------------------------------------------------------------------
// Reduce task

/// A sub-range of a reduction, together with the body it runs.
///
/// The value of the sub-range is the return value of [`ReduceTask::execute`],
/// so each half's result travels back through the join that awaited it.
pub struct ReduceTask<'b, B: ?Sized> {
    range: IndexRange,
    body: &'b B,
}

impl<'b, B: ?Sized> ReduceTask<'b, B> {
    /// Creates a task covering `range`.
    #[inline]
    pub fn new(range: IndexRange, body: &'b B) -> ReduceTask<'b, B> {
        ReduceTask { range, body }
    }

    /// Runs the task to completion on `worker` and returns the combined value
    /// of its sub-range, or `None` if the sub-range is empty.
    pub fn execute<V>(self, worker: &Worker) -> Option<V>
    where
        B: ReduceBody<V>,
        V: Send,
    {
        let ReduceTask { range, body } = self;
        match range.split() {
            Split::Serial => range
                .iter()
                .map(|index| body.compute(index))
                .reduce(|left, right| body.combine(left, right)),
            Split::Halves(left, None) => ReduceTask::new(left, body).execute(worker),
            Split::Halves(left, Some(right)) => {
                let (left, right): (Option<V>, Option<V>) = worker.join(
                    |worker| ReduceTask::new(left, body).execute(worker),
                    |worker| ReduceTask::new(right, body).execute(worker),
                );
                match (left, right) {
                    (Some(left), Some(right)) => Some(body.combine(left, right)),
                    (left, None) => left,
                    (None, right) => right,
                }
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Entry points

impl Worker {
    /// Reduces `range` with `body` on this worker and any idle worker of its
    /// pool. Returns `None` if the range is empty, since no value can be
    /// produced without an index.
    pub fn reduce<V, B>(&self, range: impl Into<IndexRange>, body: B) -> Option<V>
    where
        B: ReduceBody<V>,
        V: Send,
    {
        ReduceTask::new(range.into(), &body).execute(self)
    }

    /// Reduces `range` using a pair of closures. See [`Worker::reduce`].
    pub fn reduce_with<V, C, M>(
        &self,
        range: impl Into<IndexRange>,
        compute: C,
        combine: M,
    ) -> Option<V>
    where
        C: Fn(i64) -> V + Sync,
        M: Fn(V, V) -> V + Sync,
        V: Send,
    {
        self.reduce(range, ReduceFn::new(compute, combine))
    }

    /// Reduces `range` with a per-index computation that can fail.
    ///
    /// Every index is computed even if some fail. If any index fails, the
    /// error of the lowest failed index is returned.
    pub fn try_reduce<V, E, C, M>(
        &self,
        range: impl Into<IndexRange>,
        compute: C,
        combine: M,
    ) -> Result<Option<V>, E>
    where
        C: Fn(i64) -> Result<V, E> + Sync,
        M: Fn(V, V) -> V + Sync,
        V: Send,
        E: Send,
    {
        let result: Option<Result<V, E>> = self.reduce(range, TryReduce { compute, combine });
        result.transpose()
    }
}

impl ThreadPool {
    /// Reduces `range` with `body` on this pool, blocking until the value is
    /// known. Returns `None` if the range is empty.
    ///
    /// When called from one of this pool's workers, the reduction runs inline
    /// on that worker. An empty range returns `None` without starting a
    /// worker.
    pub fn reduce<V, B>(&'static self, range: impl Into<IndexRange>, body: B) -> Option<V>
    where
        B: ReduceBody<V>,
        V: Send,
    {
        let range = range.into();
        if range.is_empty() {
            return None;
        }
        self.in_worker(|worker| ReduceTask::new(range, &body).execute(worker))
    }

    /// Reduces `range` using a pair of closures. See [`ThreadPool::reduce`].
    pub fn reduce_with<V, C, M>(
        &'static self,
        range: impl Into<IndexRange>,
        compute: C,
        combine: M,
    ) -> Option<V>
    where
        C: Fn(i64) -> V + Sync,
        M: Fn(V, V) -> V + Sync,
        V: Send,
    {
        self.reduce(range, ReduceFn::new(compute, combine))
    }

    /// Reduces `range` with a per-index computation that can fail. See
    /// [`Worker::try_reduce`].
    pub fn try_reduce<V, E, C, M>(
        &'static self,
        range: impl Into<IndexRange>,
        compute: C,
        combine: M,
    ) -> Result<Option<V>, E>
    where
        C: Fn(i64) -> Result<V, E> + Sync,
        M: Fn(V, V) -> V + Sync,
        V: Send,
        E: Send,
    {
        let result: Option<Result<V, E>> = self.reduce(range, TryReduce { compute, combine });
        result.transpose()
    }
}

/// Reduces `range` with `body` on the global thread pool. Returns `None` if
/// the range is empty.
///
/// See [`ThreadPool::reduce`].
#[cfg(not(loom))]
pub fn reduce<V, B>(range: impl Into<IndexRange>, body: B) -> Option<V>
where
    B: ReduceBody<V>,
    V: Send,
{
    let range = range.into();
    if range.is_empty() {
        return None;
    }
    global_pool().reduce(range, body)
}

/// Reduces `range` with a pair of closures on the global thread pool.
///
/// ```
/// let total = parloop::reduce_with(0..1000, |i| i, |a, b| a + b);
/// assert_eq!(total, Some(499_500));
/// ```
#[cfg(not(loom))]
pub fn reduce_with<V, C, M>(range: impl Into<IndexRange>, compute: C, combine: M) -> Option<V>
where
    C: Fn(i64) -> V + Sync,
    M: Fn(V, V) -> V + Sync,
    V: Send,
{
    reduce(range, ReduceFn::new(compute, combine))
}

/// Reduces `range` with a fallible per-index computation on the global thread
/// pool. See [`Worker::try_reduce`].
#[cfg(not(loom))]
pub fn try_reduce<V, E, C, M>(
    range: impl Into<IndexRange>,
    compute: C,
    combine: M,
) -> Result<Option<V>, E>
where
    C: Fn(i64) -> Result<V, E> + Sync,
    M: Fn(V, V) -> V + Sync,
    V: Send,
    E: Send,
{
    let result: Option<Result<V, E>> = reduce(range, TryReduce { compute, combine });
    result.transpose()
}
