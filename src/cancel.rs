//! Cancellation primitives.
//!
//! Two distinct signals exist, mirroring the two sides of a lookup:
//!
//! - [`CancelToken`] belongs to a **caller**. Cancelling it ends that caller's
//!   wait. If the caller happens to own the computation, it also aborts the
//!   computation.
//! - [`AbortSignal`] belongs to a **computation**. Triggering it runs the abort
//!   hooks the computation registered through
//!   [`ComputeScope::on_abort`](crate::ComputeScope::on_abort), releasing the
//!   resource the computation is blocked on.
//!
//! ```text
//!   CancelToken ──cancel()──▶ wakes every registered watcher
//!                               ├── Cell      (waiter stops waiting)
//!                               └── AbortSignal (owner's computation aborts)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Something a [`CancelToken`] notifies when it is cancelled.
pub(crate) trait Wake: Send + Sync {
    fn wake(&self);
}

/// A caller-side cancellation flag.
///
/// Clones share the same flag. A token can be handed to
/// [`Memoizer::get_with_token`](crate::Memoizer::get_with_token) and cancelled
/// from any other thread.
///
/// # Example
///
/// ```rust
/// use memo_rs::CancelToken;
///
/// let token = CancelToken::new();
/// let remote = token.clone();
/// assert!(!token.is_cancelled());
/// remote.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    watchers: Mutex<Watchers>,
}

#[derive(Default)]
struct Watchers {
    next_id: u64,
    slots: Vec<(u64, Weak<dyn Wake>)>,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token and wakes everything waiting on it.
    ///
    /// Cancelling an already cancelled token does nothing.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let slots = core::mem::take(&mut self.inner.watchers.lock().slots);
        for watcher in slots.iter().filter_map(|(_, w)| w.upgrade()) {
            watcher.wake();
        }
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Registers `watcher` to be woken on cancellation until the returned
    /// registration is dropped.
    ///
    /// Callers must check [`is_cancelled`](Self::is_cancelled) after
    /// registering, since a cancellation that happened earlier wakes nobody.
    pub(crate) fn register(&self, watcher: Weak<dyn Wake>) -> Registration<'_> {
        let mut watchers = self.inner.watchers.lock();
        let id = watchers.next_id;
        watchers.next_id += 1;
        watchers.slots.push((id, watcher));
        Registration { token: self, id }
    }

    #[cfg(test)]
    pub(crate) fn watcher_count(&self) -> usize {
        self.inner.watchers.lock().slots.len()
    }
}

/// Keeps a watcher registered with a [`CancelToken`] while alive.
pub(crate) struct Registration<'a> {
    token: &'a CancelToken,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut watchers = self.token.inner.watchers.lock();
        if let Some(pos) = watchers.slots.iter().position(|(id, _)| *id == self.id) {
            watchers.slots.swap_remove(pos);
        }
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

type AbortHook = Box<dyn FnOnce() + Send>;

/// The abort state of one computation run.
///
/// Hooks run at most once each. A hook registered after the signal fired runs
/// immediately on the registering thread. Once the run is finished, pending
/// hooks are dropped and the signal can no longer fire.
#[derive(Default)]
pub(crate) struct AbortSignal {
    aborted: AtomicBool,
    hooks: Mutex<HookState>,
}

#[derive(Default)]
struct HookState {
    pending: Vec<AbortHook>,
    finished: bool,
}

impl AbortSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Fires the signal, running all registered hooks outside the hook lock.
    ///
    /// Returns `false` if the signal had already fired or the run is finished.
    pub(crate) fn trigger(&self) -> bool {
        let hooks = {
            let mut state = self.hooks.lock();
            if state.finished || self.aborted.swap(true, Ordering::SeqCst) {
                return false;
            }
            core::mem::take(&mut state.pending)
        };
        for hook in hooks {
            hook();
        }
        true
    }

    /// Marks the run as finished and drops hooks that never ran.
    ///
    /// Returns `false` if the signal fired first; the run must then be treated
    /// as aborted.
    pub(crate) fn finish(&self) -> bool {
        let mut state = self.hooks.lock();
        if self.aborted.load(Ordering::SeqCst) {
            return false;
        }
        state.finished = true;
        state.pending.clear();
        true
    }

    pub(crate) fn push_hook(&self, hook: AbortHook) {
        {
            let mut state = self.hooks.lock();
            if state.finished {
                return;
            }
            if !self.aborted.load(Ordering::SeqCst) {
                state.pending.push(hook);
                return;
            }
        }
        hook();
    }
}

impl Wake for AbortSignal {
    fn wake(&self) {
        if self.trigger() {
            tracing::debug!("computation aborted by its owner's cancel token");
        }
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .field("hooks", &self.hooks.lock().pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter(AtomicUsize);

    impl Wake for Counter {
        fn wake(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_cancel_wakes_watchers_once() {
        let token = CancelToken::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let weak: Weak<dyn Wake> = Arc::downgrade(&counter) as Weak<dyn Wake>;
        let _registration = token.register(weak);

        token.cancel();
        token.cancel();

        assert!(token.is_cancelled());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_watchers_are_skipped() {
        let token = CancelToken::new();
        {
            let counter = Arc::new(Counter(AtomicUsize::new(0)));
            let registration = token.register(Arc::downgrade(&counter) as Weak<dyn Wake>);
            std::mem::forget(registration);
        }
        // Must not panic on a dangling watcher.
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_abort_runs_hooks_once() {
        let signal = AbortSignal::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let r = Arc::clone(&runs);
        signal.push_hook(Box::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(signal.trigger());
        assert!(!signal.trigger());
        assert!(signal.is_aborted());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_late_hook_runs_immediately() {
        let signal = AbortSignal::new();
        signal.trigger();

        let runs = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&runs);
        signal.push_hook(Box::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_finished_signal_never_fires() {
        let signal = AbortSignal::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&runs);
        signal.push_hook(Box::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(signal.finish());
        assert!(!signal.trigger());
        assert!(!signal.is_aborted());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_token_aborts_signal() {
        let token = CancelToken::new();
        let signal = Arc::new(AbortSignal::new());
        let _registration = token.register(Arc::downgrade(&signal) as Weak<dyn Wake>);

        token.cancel();
        assert!(signal.is_aborted());
    }

    #[test]
    fn test_dropped_registration_unregisters() {
        let token = CancelToken::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        for _ in 0..1_000 {
            let _registration = token.register(Arc::downgrade(&counter) as Weak<dyn Wake>);
        }
        assert_eq!(token.watcher_count(), 0);

        token.cancel();
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_registration_outlives_cancel() {
        let token = CancelToken::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let registration = token.register(Arc::downgrade(&counter) as Weak<dyn Wake>);
        token.cancel();
        drop(registration);

        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(token.watcher_count(), 0);
    }

    #[test]
    fn test_aborted_signal_cannot_finish() {
        let signal = AbortSignal::new();
        assert!(signal.trigger());
        assert!(!signal.finish());
        assert!(signal.is_aborted());
    }
}
