//! Error types returned by [`Memoizer`](crate::Memoizer) lookups.
//!
//! A lookup either yields a value or fails with exactly one of two kinds:
//!
//! | Variant | Meaning |
//! |---------|---------|
//! | [`MemoError::Computation`] | The computation ran and returned its own error |
//! | [`MemoError::Cancelled`] | No value was produced because someone gave up early |
//!
//! Neither kind is ever cached: the failed entry is removed before waiters are
//! released, so the next lookup for the same key starts a fresh computation.

use std::sync::Arc;

use thiserror::Error;

/// Why a lookup ended without a value.
///
/// `Aborted` and `Abandoned` describe the shared computation and are observed by
/// every caller waiting on it. `Interrupted` and `TimedOut` describe a single
/// caller's wait and are only ever returned to that caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Cancellation {
    /// The computation was aborted by [`Memoizer::cancel`](crate::Memoizer::cancel)
    /// or by the owning caller's [`CancelToken`](crate::CancelToken).
    #[error("computation was aborted")]
    Aborted,
    /// The owning caller unwound before publishing an outcome.
    #[error("computation was abandoned by its owner")]
    Abandoned,
    /// The caller's own token was cancelled while it waited.
    #[error("wait was interrupted")]
    Interrupted,
    /// The caller's deadline passed while it waited.
    #[error("wait timed out")]
    TimedOut,
}

/// The error returned by [`Memoizer`](crate::Memoizer) lookups.
///
/// The computation's error is shared behind an [`Arc`] so that every caller
/// waiting on the same computation receives the very same error.
#[derive(Debug, Error)]
pub enum MemoError<E> {
    /// The computation failed with a domain error.
    #[error("computation failed")]
    Computation(#[source] Arc<E>),
    /// The computation, or this caller's wait for it, was cancelled.
    #[error("cancelled: {0}")]
    Cancelled(Cancellation),
}

impl<E> MemoError<E> {
    /// Returns the computation's error, if this is a [`MemoError::Computation`].
    pub fn computation_error(&self) -> Option<&E> {
        match self {
            MemoError::Computation(err) => Some(err),
            MemoError::Cancelled(_) => None,
        }
    }

    /// Returns the cancellation reason, if this is a [`MemoError::Cancelled`].
    pub fn cancellation(&self) -> Option<Cancellation> {
        match self {
            MemoError::Computation(_) => None,
            MemoError::Cancelled(reason) => Some(*reason),
        }
    }

    /// Returns `true` if no value was produced because of a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MemoError::Cancelled(_))
    }
}

// Not derived: deriving would require `E: Clone`.
impl<E> Clone for MemoError<E> {
    fn clone(&self) -> Self {
        match self {
            MemoError::Computation(err) => MemoError::Computation(Arc::clone(err)),
            MemoError::Cancelled(reason) => MemoError::Cancelled(*reason),
        }
    }
}

impl<E> From<Cancellation> for MemoError<E> {
    fn from(reason: Cancellation) -> Self {
        MemoError::Cancelled(reason)
    }
}
