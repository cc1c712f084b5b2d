//! The computation contract consumed by [`Memoizer`](crate::Memoizer).
//!
//! A computation maps a key to a value and may fail or block for an arbitrary
//! time. It is supplied by the user of the memoizer; the memoizer only decides
//! *who* runs it and *when*.
//!
//! Implement [`Computable`] directly, or wrap a closure with [`from_fn`] or
//! [`from_scoped_fn`]:
//!
//! ```rust
//! use memo_rs::computation::from_fn;
//! use std::convert::Infallible;
//!
//! let square = from_fn(|n: &u64| Ok::<_, Infallible>(n * n));
//! # let _ = &square;
//! ```
//!
//! # Blocking Resources
//!
//! A computation that blocks on an external resource (a socket, a pipe, a child
//! process) should register an abort hook that releases that resource, so that
//! [`Memoizer::cancel`](crate::Memoizer::cancel) can unblock it:
//!
//! ```rust,no_run
//! use memo_rs::computation::from_scoped_fn;
//! use memo_rs::ComputeScope;
//! use std::io::Read;
//! use std::net::{Shutdown, TcpStream};
//!
//! let fetch = from_scoped_fn(|addr: &String, scope: &ComputeScope| {
//!     let mut stream = TcpStream::connect(addr.as_str())?;
//!     let closer = stream.try_clone()?;
//!     scope.on_abort(move || {
//!         let _ = closer.shutdown(Shutdown::Both);
//!     });
//!     let mut body = Vec::new();
//!     stream.read_to_end(&mut body)?;
//!     Ok::<_, std::io::Error>(body)
//! });
//! # let _ = &fetch;
//! ```

use core::fmt;
use core::marker::PhantomData;
use std::sync::Arc;

use crate::cancel::AbortSignal;

/// A keyed computation whose results a [`Memoizer`](crate::Memoizer) caches.
///
/// `compute` must not call back into the memoizer for the same key: such a
/// re-entrant lookup waits on its own unfinished computation and deadlocks.
pub trait Computable<K>: Send + Sync {
    /// The value produced for a key. Every caller receives a clone of it.
    type Output: Clone + Send + Sync + 'static;

    /// The domain error the computation may fail with.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Computes the value for `key`.
    ///
    /// `scope` reports whether the run was aborted and accepts abort hooks.
    fn compute(&self, key: &K, scope: &ComputeScope) -> Result<Self::Output, Self::Error>;
}

/// Per-run handle given to a [`Computable`].
///
/// Lets a computation observe an abort request and register hooks that release
/// the resources it is blocked on.
pub struct ComputeScope {
    signal: Arc<AbortSignal>,
}

impl ComputeScope {
    pub(crate) fn new(signal: Arc<AbortSignal>) -> Self {
        Self { signal }
    }

    /// Returns `true` once the computation has been aborted.
    ///
    /// Long-running computations can poll this between steps.
    pub fn is_aborted(&self) -> bool {
        self.signal.is_aborted()
    }

    /// Registers a hook that runs when the computation is aborted.
    ///
    /// Hooks run exactly once, on the aborting thread, before the computation's
    /// entry is marked as failed. If the computation was already aborted, `hook`
    /// runs immediately. Hooks registered on a run that completes normally never
    /// run.
    pub fn on_abort<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.signal.push_hook(Box::new(hook));
    }
}

impl fmt::Debug for ComputeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeScope")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

/// A [`Computable`] built from a closure that ignores its [`ComputeScope`].
///
/// Created by [`from_fn`].
pub struct FnComputation<F, V, E> {
    f: F,
    _marker: PhantomData<fn() -> (V, E)>,
}

/// Wraps `f` as a [`Computable`].
pub fn from_fn<K, V, E, F>(f: F) -> FnComputation<F, V, E>
where
    F: Fn(&K) -> Result<V, E> + Send + Sync,
{
    FnComputation {
        f,
        _marker: PhantomData,
    }
}

impl<K, V, E, F> Computable<K> for FnComputation<F, V, E>
where
    F: Fn(&K) -> Result<V, E> + Send + Sync,
    V: Clone + Send + Sync + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    type Output = V;
    type Error = E;

    fn compute(&self, key: &K, _scope: &ComputeScope) -> Result<V, E> {
        (self.f)(key)
    }
}

impl<F, V, E> fmt::Debug for FnComputation<F, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnComputation").finish_non_exhaustive()
    }
}

/// A [`Computable`] built from a closure that receives its [`ComputeScope`].
///
/// Created by [`from_scoped_fn`].
pub struct ScopedFnComputation<F, V, E> {
    f: F,
    _marker: PhantomData<fn() -> (V, E)>,
}

/// Wraps `f` as a [`Computable`] that can register abort hooks.
pub fn from_scoped_fn<K, V, E, F>(f: F) -> ScopedFnComputation<F, V, E>
where
    F: Fn(&K, &ComputeScope) -> Result<V, E> + Send + Sync,
{
    ScopedFnComputation {
        f,
        _marker: PhantomData,
    }
}

impl<K, V, E, F> Computable<K> for ScopedFnComputation<F, V, E>
where
    F: Fn(&K, &ComputeScope) -> Result<V, E> + Send + Sync,
    V: Clone + Send + Sync + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    type Output = V;
    type Error = E;

    fn compute(&self, key: &K, scope: &ComputeScope) -> Result<V, E> {
        (self.f)(key, scope)
    }
}

impl<F, V, E> fmt::Debug for ScopedFnComputation<F, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedFnComputation").finish_non_exhaustive()
    }
}
