//! The placeholder a [`Memoizer`](crate::Memoizer) installs for one key.
//!
//! A cell is published into the map *before* its computation starts, so that
//! every caller arriving later finds it and waits instead of computing again.
//!
//! ```text
//!             start()            complete(v)
//!   Pending ──────────▶ Running ─────────────▶ Completed(v)   (kept)
//!      │                   │
//!      └───────────────────┴──── fail(err) ──▶ Failed(err)    (removed)
//! ```
//!
//! Both terminal transitions happen under the state lock and only from a
//! non-terminal state, so exactly one of them ever succeeds. Waiters block on a
//! condition variable and are all released by the winning transition.

use core::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::cancel::{AbortSignal, CancelToken, Wake};
use crate::error::{Cancellation, MemoError};

/// Observable status of a key's entry.
///
/// Failed entries are never observable: they are removed from the map before
/// anyone can see them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellStatus {
    /// Installed, computation not started yet.
    Pending,
    /// Computation in progress.
    Running,
    /// Computation finished with a value.
    Completed,
}

pub(crate) enum CellState<V, E> {
    Pending,
    Running,
    Completed(V),
    Failed(MemoError<E>),
}

impl<V, E> CellState<V, E> {
    fn is_terminal(&self) -> bool {
        matches!(self, CellState::Completed(_) | CellState::Failed(_))
    }
}

pub(crate) struct Cell<V, E> {
    state: Mutex<CellState<V, E>>,
    ready: Condvar,
    signal: Arc<AbortSignal>,
}

impl<V: Clone, E> Cell<V, E> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(CellState::Pending),
            ready: Condvar::new(),
            signal: Arc::new(AbortSignal::new()),
        }
    }

    pub(crate) fn signal(&self) -> &Arc<AbortSignal> {
        &self.signal
    }

    /// Marks the computation as started. No-op unless `Pending`.
    pub(crate) fn start(&self) {
        let mut state = self.state.lock();
        if matches!(*state, CellState::Pending) {
            *state = CellState::Running;
        }
    }

    pub(crate) fn status(&self) -> Option<CellStatus> {
        match *self.state.lock() {
            CellState::Pending => Some(CellStatus::Pending),
            CellState::Running => Some(CellStatus::Running),
            CellState::Completed(_) => Some(CellStatus::Completed),
            CellState::Failed(_) => None,
        }
    }

    /// Returns the value if the cell has completed.
    pub(crate) fn value(&self) -> Option<V> {
        match &*self.state.lock() {
            CellState::Completed(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Returns the terminal outcome, or `None` while still in flight.
    pub(crate) fn outcome(&self) -> Option<Result<V, MemoError<E>>> {
        Self::read_outcome(&self.state.lock())
    }

    fn read_outcome(state: &CellState<V, E>) -> Option<Result<V, MemoError<E>>> {
        match state {
            CellState::Completed(value) => Some(Ok(value.clone())),
            CellState::Failed(err) => Some(Err(err.clone())),
            CellState::Pending | CellState::Running => None,
        }
    }

    /// Publishes a value and releases all waiters.
    ///
    /// Returns `false` if the cell already reached a terminal state.
    pub(crate) fn complete(&self, value: V) -> bool {
        let mut state = self.state.lock();
        if state.is_terminal() {
            return false;
        }
        *state = CellState::Completed(value);
        drop(state);
        self.ready.notify_all();
        true
    }

    /// Locks the state for a failure transition.
    ///
    /// Returns `None` if the cell is already terminal. The caller removes the
    /// cell from its map while holding the returned guard and then calls
    /// [`FailGuard::fail`].
    pub(crate) fn begin_fail(&self) -> Option<FailGuard<'_, V, E>> {
        let state = self.state.lock();
        if state.is_terminal() {
            return None;
        }
        Some(FailGuard { cell: self, state })
    }

    /// Blocks until the cell resolves, `token` is cancelled, or `deadline` passes.
    pub(crate) fn wait(
        self: &Arc<Self>,
        token: Option<&CancelToken>,
        deadline: Option<Instant>,
    ) -> Result<V, MemoError<E>>
    where
        V: Send + 'static,
        E: Send + Sync + 'static,
    {
        let _registration = token.map(|token| {
            let weak: Weak<dyn Wake> = Arc::downgrade(self) as Weak<dyn Wake>;
            token.register(weak)
        });

        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = Self::read_outcome(&state) {
                return outcome;
            }
            if token.is_some_and(CancelToken::is_cancelled) {
                return Err(MemoError::Cancelled(Cancellation::Interrupted));
            }
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut state, deadline).timed_out() {
                        if let Some(outcome) = Self::read_outcome(&state) {
                            return outcome;
                        }
                        return Err(MemoError::Cancelled(Cancellation::TimedOut));
                    }
                }
                None => self.ready.wait(&mut state),
            }
        }
    }
}

/// Holds a cell's state lock between deciding to fail it and failing it.
pub(crate) struct FailGuard<'a, V, E> {
    cell: &'a Cell<V, E>,
    state: MutexGuard<'a, CellState<V, E>>,
}

impl<V, E> FailGuard<'_, V, E> {
    /// Moves the cell to `Failed(err)` and releases all waiters.
    pub(crate) fn fail(mut self, err: MemoError<E>) {
        *self.state = CellState::Failed(err);
        let FailGuard { cell, state } = self;
        drop(state);
        cell.ready.notify_all();
    }
}

impl<V, E> Wake for Cell<V, E>
where
    V: Send,
    E: Send + Sync,
{
    fn wake(&self) {
        // Taking the lock orders this notification after any waiter's check
        // of its token, so the wakeup cannot be lost.
        let _state = self.state.lock();
        self.ready.notify_all();
    }
}

impl<V, E> fmt::Debug for Cell<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match *self.state.lock() {
            CellState::Pending => "Pending",
            CellState::Running => "Running",
            CellState::Completed(_) => "Completed",
            CellState::Failed(_) => "Failed",
        };
        f.debug_struct("Cell")
            .field("status", &status)
            .field("aborted", &self.signal.is_aborted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("boom")]
    struct Boom;

    type TestCell = Cell<u32, Boom>;

    #[test]
    fn test_lifecycle_to_completed() {
        let cell = TestCell::new();
        assert_eq!(cell.status(), Some(CellStatus::Pending));
        cell.start();
        assert_eq!(cell.status(), Some(CellStatus::Running));
        assert!(cell.complete(7));
        assert_eq!(cell.status(), Some(CellStatus::Completed));
        assert_eq!(cell.value(), Some(7));
    }

    #[test]
    fn test_completed_is_write_once() {
        let cell = TestCell::new();
        assert!(cell.complete(1));
        assert!(!cell.complete(2));
        assert!(cell.begin_fail().is_none());
        assert_eq!(cell.value(), Some(1));
    }

    #[test]
    fn test_failed_blocks_completion() {
        let cell = TestCell::new();
        cell.start();
        cell.begin_fail()
            .unwrap()
            .fail(MemoError::Cancelled(Cancellation::Aborted));
        assert!(!cell.complete(3));
        assert_eq!(cell.status(), None);
        match cell.outcome() {
            Some(Err(MemoError::Cancelled(Cancellation::Aborted))) => {}
            other => panic!("unexpected outcome: {:?}", other.map(|r| r.is_ok())),
        }
    }

    #[test]
    fn test_waiters_all_released_with_value() {
        let cell = Arc::new(TestCell::new());
        cell.start();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cell = Arc::clone(&cell);
                thread::spawn(move || cell.wait(None, None).unwrap())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        cell.complete(99);

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 99);
        }
    }

    #[test]
    fn test_wait_times_out() {
        let cell = Arc::new(TestCell::new());
        cell.start();
        let deadline = Instant::now() + Duration::from_millis(20);
        match cell.wait(None, Some(deadline)) {
            Err(MemoError::Cancelled(Cancellation::TimedOut)) => {}
            other => panic!("expected timeout, got ok={:?}", other.is_ok()),
        }
        // The cell itself is unaffected.
        assert_eq!(cell.status(), Some(CellStatus::Running));
    }

    #[test]
    fn test_wait_interrupted_by_token() {
        let cell = Arc::new(TestCell::new());
        cell.start();
        let token = CancelToken::new();

        let waiter = {
            let cell = Arc::clone(&cell);
            let token = token.clone();
            thread::spawn(move || cell.wait(Some(&token), None))
        };

        thread::sleep(Duration::from_millis(20));
        token.cancel();

        match waiter.join().unwrap() {
            Err(MemoError::Cancelled(Cancellation::Interrupted)) => {}
            other => panic!("expected interruption, got ok={:?}", other.is_ok()),
        }
        assert_eq!(cell.status(), Some(CellStatus::Running));
        assert!(!cell.signal().is_aborted());
        assert_eq!(token.watcher_count(), 0);
    }

    #[test]
    fn test_wait_unregisters_from_token() {
        let token = CancelToken::new();
        for value in 0..100 {
            let cell = Arc::new(TestCell::new());
            cell.complete(value);
            assert_eq!(cell.wait(Some(&token), None).unwrap(), value);
        }
        assert_eq!(token.watcher_count(), 0);
    }

    #[test]
    fn test_wait_with_cancelled_token_returns_value_if_ready() {
        let cell = Arc::new(TestCell::new());
        cell.complete(5);
        let token = CancelToken::new();
        token.cancel();
        assert_eq!(cell.wait(Some(&token), None).unwrap(), 5);
    }
}
