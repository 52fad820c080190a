//! Errors reported before any work is scheduled.

use thiserror::Error;

/// An index range that can not be iterated, rejected when it is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RangeError {
    /// The distance between consecutive indices must be positive.
    #[error("range step must be positive, got {0}")]
    NonPositiveStep(i64),
    /// The serial threshold must be at least one step.
    #[error("range chunk size must be positive, got {0}")]
    NonPositiveChunk(i64),
}
