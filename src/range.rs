//! Stepped index ranges, and the rule used to cut them in two.

use core::ops::Range;

use crate::error::RangeError;

// -----------------------------------------------------------------------------
// Index range

/// A half-open range of indices `begin, begin + step, ...` strictly below
/// `end`, together with the serial threshold used when it is split.
///
/// A range whose `begin` is not below its `end` is empty; it is legal, and
/// loops and reductions over it do nothing.
///
/// `chunk` counts steps: a range covering at most `chunk` steps is processed
/// serially by one worker, a longer one is split in two.
///
/// ```
/// use parloop::IndexRange;
///
/// let range = IndexRange::new(0, 10).with_step(3).unwrap();
/// assert_eq!(range.iter().collect::<Vec<_>>(), [0, 3, 6, 9]);
/// assert_eq!(range.len(), 4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexRange {
    begin: i64,
    end: i64,
    step: i64,
    chunk: u64,
}

impl IndexRange {
    /// Creates the range `[begin, end)` with a step of one and a chunk size of
    /// one.
    #[inline]
    pub const fn new(begin: i64, end: i64) -> IndexRange {
        IndexRange {
            begin,
            end,
            step: 1,
            chunk: 1,
        }
    }

    /// Creates the range `[0, end)`.
    #[inline]
    pub const fn to(end: i64) -> IndexRange {
        IndexRange::new(0, end)
    }

    /// Creates a range with every parameter given at once.
    pub const fn try_new(
        begin: i64,
        end: i64,
        step: i64,
        chunk: i64,
    ) -> Result<IndexRange, RangeError> {
        if step <= 0 {
            return Err(RangeError::NonPositiveStep(step));
        }
        if chunk <= 0 {
            return Err(RangeError::NonPositiveChunk(chunk));
        }
        Ok(IndexRange {
            begin,
            end,
            step,
            chunk: chunk as u64,
        })
    }

    /// Returns the same range with a different step.
    pub const fn with_step(self, step: i64) -> Result<IndexRange, RangeError> {
        IndexRange::try_new(self.begin, self.end, step, self.chunk as i64)
    }

    /// Returns the same range with a different chunk size.
    pub const fn with_chunk(self, chunk: i64) -> Result<IndexRange, RangeError> {
        if chunk <= 0 {
            return Err(RangeError::NonPositiveChunk(chunk));
        }
        Ok(IndexRange {
            chunk: chunk as u64,
            ..self
        })
    }

    /// The first index of the range, if it is not empty.
    #[inline]
    pub const fn begin(&self) -> i64 {
        self.begin
    }

    /// The exclusive upper bound.
    #[inline]
    pub const fn end(&self) -> i64 {
        self.end
    }

    /// The distance between consecutive indices.
    #[inline]
    pub const fn step(&self) -> i64 {
        self.step
    }

    /// The number of steps at or below which the range is not split.
    #[inline]
    pub const fn chunk(&self) -> u64 {
        self.chunk
    }

    /// Returns true if the range contains no index.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    /// Distance from `begin` to `end`, zero for an empty range.
    #[inline]
    const fn span(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.end.abs_diff(self.begin)
        }
    }

    /// Returns the number of indices in the range.
    #[inline]
    pub const fn len(&self) -> u64 {
        self.span().div_ceil(self.step as u64)
    }

    /// Iterates over the indices of the range in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = i64> + use<> {
        let begin = self.begin;
        let step = self.step as u64;
        // `k * step` stays below the span, so it can not overflow.
        (0..self.len()).map(move |k| begin.wrapping_add_unsigned(k * step))
    }

    /// Decides whether the range is processed serially or cut in two.
    ///
    /// The left half is never empty. The right half is `None` when the split
    /// point lands on `end`, which happens when `step` is large compared to
    /// the range.
    pub fn split(&self) -> Split {
        let span = self.span();
        if span <= self.chunk.saturating_mul(self.step as u64) {
            return Split::Serial;
        }

        let mid = middle(self.begin, self.end, self.step);
        let left = IndexRange { end: mid, ..*self };
        let right = IndexRange { begin: mid, ..*self };
        Split::Halves(left, (!right.is_empty()).then_some(right))
    }
}

impl From<Range<i64>> for IndexRange {
    fn from(range: Range<i64>) -> Self {
        IndexRange::new(range.start, range.end)
    }
}

// -----------------------------------------------------------------------------
// Splitting

/// The outcome of [`IndexRange::split`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    /// Small enough to run on one worker.
    Serial,
    /// The range `[begin, mid)` and, unless it is empty, `[mid, end)`.
    Halves(IndexRange, Option<IndexRange>),
}

/// Returns the split point of a non-empty range: the first index past the
/// middle of the range that is reachable from `begin` by whole steps, or `end`
/// if that lies past the range.
///
/// This is `begin + step + floor(floor((end - begin - 1) / 2) / step) * step`,
/// computed so that it can not overflow. The left half `[begin, mid)` always
/// holds at least the index `begin`.
///
/// # Panics
///
/// Panics if the range is empty (`begin >= end`) or if `step` is not positive.
/// [`IndexRange::split`] never calls it with such arguments.
pub fn middle(begin: i64, end: i64, step: i64) -> i64 {
    assert!(begin < end, "cannot split the empty range [{begin}, {end})");
    assert!(step > 0, "range step must be positive, got {step}");
    let span = end.abs_diff(begin);
    let step = step as u64;
    // Both terms are at most `span`, which is below `2^64`.
    let offset = step.saturating_add((span - 1) / 2 / step * step);
    if offset >= span {
        end
    } else {
        begin.wrapping_add_unsigned(offset)
    }
}
