//! Error types for `SegmentVec` and the engines it runs on.
//!
//! Every failure is surfaced to the immediate caller. Partial multi-segment
//! updates are never repaired here: the enclosing scope's abort path restores
//! whatever was registered before the failure.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by container operations and engine scopes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Bounds-checked access outside `[0, len)`.
    #[error("index {index} out of range for length {len}")]
    OutOfRange {
        /// Requested index (or end of the requested range)
        index: usize,
        /// Length of the container at the time of the call
        len: usize,
    },

    /// A requested size or capacity exceeds `max_size`.
    #[error("requested length {requested} exceeds max size {max}")]
    Length {
        /// Requested element count
        requested: usize,
        /// Hard ceiling for this policy, directory, and engine
        max: usize,
    },

    /// The durable allocator could not satisfy a request.
    #[error("durable allocation of {size} bytes failed")]
    Allocation {
        /// Size of the failed request in bytes
        size: usize,
    },

    /// A mutating operation ran without an active atomic-update scope.
    #[error("no active transaction: {0}")]
    Scope(&'static str),

    /// Two containers backed by different engines were combined.
    #[error("containers belong to different pools")]
    PoolMismatch,

    /// Internal consistency check failed.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// The caller asked for the enclosing scope to be rolled back.
    #[error("transaction aborted: {0}")]
    Aborted(String),
}

impl Error {
    /// Builds an `Aborted` error; returning it from a scope body rolls the scope back.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Error::Aborted(reason.into())
    }

    pub(crate) fn out_of_range(index: usize, len: usize) -> Self {
        Error::OutOfRange { index, len }
    }

    pub(crate) fn length(requested: usize, max: usize) -> Self {
        Error::Length { requested, max }
    }

    /// Returns `true` for errors that indicate a caller bug rather than a
    /// resource or engine condition.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Error::OutOfRange { .. } | Error::Scope(_) | Error::PoolMismatch
        )
    }
}
