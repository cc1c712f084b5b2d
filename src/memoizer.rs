//! Single-Flight Memoizer Implementation
//!
//! A thread-safe memoizing cache that runs each key's computation exactly once,
//! even when many callers ask for the same uncached key at the same time.
//!
//! # How It Works
//!
//! The key space is partitioned across independent segments, each with its own
//! lock, as in a lock-striped concurrent cache. A segment maps keys to *cells*:
//! placeholders that stand for a computation that is pending, running, or done.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           Memoizer                                   │
//! │                                                                      │
//! │  hash(key) % N  ──▶  Segment Selection                               │
//! │                                                                      │
//! │  ┌──────────────┐ ┌──────────────┐     ┌──────────────┐              │
//! │  │  Segment 0   │ │  Segment 1   │ ... │  Segment N-1 │              │
//! │  │   [Mutex]    │ │   [Mutex]    │     │   [Mutex]    │              │
//! │  │ key ─▶ Cell  │ │ key ─▶ Cell  │     │ key ─▶ Cell  │              │
//! │  └──────────────┘ └──────────────┘     └──────────────┘              │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lookup Protocol
//!
//! 1. Look the key up. A completed cell answers immediately.
//! 2. An in-flight cell is joined: the caller blocks until it resolves.
//! 3. On a miss, a fresh cell is built and installed with an atomic
//!    insert-if-absent. The *returned previous cell* decides the winner:
//!    - nothing was there: this caller owns the cell and runs the computation,
//!      outside of every lock;
//!    - another caller got there first: the fresh cell is discarded unused and
//!      this caller joins the installed one.
//! 4. Success publishes the value into the cell, which stays cached.
//!    Failure or cancellation first removes the cell from its segment and then
//!    releases the waiters with the error, so the next lookup retries.
//!
//! Segment locks are held only for lookups, installs and failure removals; a
//! cell's own lock is always taken after its segment's lock, never before.
//!
//! # Usage Constraints
//!
//! A computation must not look up its own key through the same memoizer: the
//! nested lookup joins the computation it is part of and never returns.
//!
//! # Example
//!
//! ```rust
//! use memo_rs::computation::from_fn;
//! use memo_rs::Memoizer;
//! use std::convert::Infallible;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let memo = Arc::new(Memoizer::new(from_fn(|n: &u64| {
//!     Ok::<_, Infallible>((1..=*n).product::<u64>())
//! })));
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|_| {
//!         let memo = Arc::clone(&memo);
//!         thread::spawn(move || memo.get(&7).unwrap())
//!     })
//!     .collect();
//!
//! for handle in handles {
//!     assert_eq!(handle.join().unwrap(), 5040);
//! }
//! ```

use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[cfg(feature = "hashbrown")]
use hashbrown::hash_map::{Entry, HashMap};
#[cfg(feature = "hashbrown")]
use hashbrown::DefaultHashBuilder;

#[cfg(not(feature = "hashbrown"))]
use std::collections::hash_map::{Entry, HashMap, RandomState as DefaultHashBuilder};

use crate::cancel::{CancelToken, Wake};
use crate::cell::{Cell, CellStatus};
use crate::computation::{Computable, ComputeScope};
use crate::config::MemoizerConfig;
use crate::error::{Cancellation, MemoError};
use crate::metrics::{CacheMetrics, MemoMetrics};

type CellRef<V, E> = Arc<Cell<V, E>>;

/// One lock-striped shard of the key space.
struct MemoSegment<K, V, E, S> {
    entries: HashMap<K, CellRef<V, E>, S>,
    metrics: MemoMetrics,
}

impl<K, V, E, S> MemoSegment<K, V, E, S> {
    fn with_hasher(hash_builder: S) -> Self {
        Self {
            entries: HashMap::with_hasher(hash_builder),
            metrics: MemoMetrics::new(),
        }
    }
}

/// Runs a closure when dropped unless disarmed first.
struct CallOnDrop<F: FnOnce()> {
    f: Option<F>,
}

impl<F: FnOnce()> CallOnDrop<F> {
    fn new(f: F) -> Self {
        Self { f: Some(f) }
    }

    fn disarm(mut self) {
        self.f = None;
    }
}

impl<F: FnOnce()> Drop for CallOnDrop<F> {
    fn drop(&mut self) {
        if let Some(f) = self.f.take() {
            f();
        }
    }
}

/// A thread-safe, single-flight memoizing cache.
///
/// Keys are partitioned across multiple segments using hash-based sharding.
/// Each segment has its own lock, and no lock is held while a computation runs,
/// so computations for different keys proceed fully in parallel.
///
/// # Type Parameters
///
/// - `K`: Key type. Must implement `Hash + Eq + Clone`.
/// - `C`: The [`Computable`] producing values for keys.
/// - `S`: Hash builder type. Defaults to `DefaultHashBuilder`.
///
/// # Guarantees
///
/// - Concurrent lookups of one uncached key run the computation once and all
///   receive the same outcome.
/// - A completed value never changes until it is invalidated.
/// - A failed or cancelled computation leaves no entry behind.
pub struct Memoizer<K, C, S = DefaultHashBuilder>
where
    C: Computable<K>,
{
    segments: Box<[Mutex<MemoSegment<K, C::Output, C::Error, S>>]>,
    hash_builder: S,
    computation: C,
    name: &'static str,
}

impl<K, C> Memoizer<K, C, DefaultHashBuilder>
where
    K: Hash + Eq + Clone,
    C: Computable<K>,
{
    /// Creates a memoizer with the default configuration.
    pub fn new(computation: C) -> Self {
        Self::init(MemoizerConfig::default(), computation)
    }

    /// Creates a memoizer from a configuration.
    ///
    /// This is the **recommended** way to create a memoizer.
    ///
    /// # Example
    ///
    /// ```rust
    /// use memo_rs::computation::from_fn;
    /// use memo_rs::config::MemoizerConfig;
    /// use memo_rs::Memoizer;
    /// use std::convert::Infallible;
    ///
    /// let config = MemoizerConfig {
    ///     name: "lengths",
    ///     segments: 8,
    /// };
    /// let memo = Memoizer::init(config, from_fn(|s: &String| Ok::<_, Infallible>(s.len())));
    /// assert_eq!(memo.segment_count(), 8);
    /// assert_eq!(memo.get(&"four".to_string()).unwrap(), 4);
    /// ```
    pub fn init(config: MemoizerConfig, computation: C) -> Self {
        Self::init_with_hasher(config, computation, DefaultHashBuilder::default())
    }
}

impl<K, C, S> Memoizer<K, C, S>
where
    K: Hash + Eq + Clone,
    C: Computable<K>,
    S: BuildHasher + Clone,
{
    /// Creates a memoizer with a custom hash builder.
    ///
    /// Use this for deterministic hashing or DoS-resistant hashers.
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration specifying name and segments
    /// * `computation` - The computation whose results are memoized
    /// * `hash_builder` - Custom hash builder (will be cloned for each segment)
    pub fn init_with_hasher(config: MemoizerConfig, computation: C, hash_builder: S) -> Self {
        let segments: Vec<_> = (0..config.segment_count())
            .map(|_| Mutex::new(MemoSegment::with_hasher(hash_builder.clone())))
            .collect();

        Self {
            segments: segments.into_boxed_slice(),
            hash_builder,
            computation,
            name: config.name,
        }
    }

    /// Returns the segment index for the given key.
    #[inline]
    fn segment_index<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
    {
        (self.hash_builder.hash_one(key) as usize) % self.segments.len()
    }

    /// Returns the value for `key`, computing it if no caller has yet.
    ///
    /// - A completed entry is returned immediately.
    /// - If another caller is computing the value, this call blocks until it
    ///   resolves and shares its outcome.
    /// - Otherwise this caller runs the computation itself.
    ///
    /// # Errors
    ///
    /// - [`MemoError::Computation`] if the computation failed
    /// - [`MemoError::Cancelled`] if the computation was aborted or abandoned
    pub fn get(&self, key: &K) -> Result<C::Output, MemoError<C::Error>> {
        self.lookup(key, None, None)
    }

    /// Like [`get`](Self::get), but stops waiting when `token` is cancelled.
    ///
    /// Cancelling the token while waiting on another caller's computation
    /// returns [`Cancellation::Interrupted`] to this caller only; the computation
    /// keeps running for everyone else. If this caller owns the computation,
    /// cancelling the token aborts it, as [`cancel`](Self::cancel) would.
    pub fn get_with_token(
        &self,
        key: &K,
        token: &CancelToken,
    ) -> Result<C::Output, MemoError<C::Error>> {
        self.lookup(key, Some(token), None)
    }

    /// Like [`get`](Self::get), but waits at most `timeout` for another caller's
    /// computation.
    ///
    /// An expired wait returns [`Cancellation::TimedOut`] to this caller only.
    /// The timeout does not bound a computation this caller runs itself.
    pub fn get_timeout(
        &self,
        key: &K,
        timeout: Duration,
    ) -> Result<C::Output, MemoError<C::Error>> {
        self.lookup(key, None, Instant::now().checked_add(timeout))
    }

    fn lookup(
        &self,
        key: &K,
        token: Option<&CancelToken>,
        deadline: Option<Instant>,
    ) -> Result<C::Output, MemoError<C::Error>> {
        let idx = self.segment_index(key);

        let existing = {
            let mut segment = self.segments[idx].lock();
            let existing = segment.entries.get(key).cloned();
            if let Some(cell) = &existing {
                if let Some(value) = cell.value() {
                    segment.metrics.record_hit();
                    tracing::trace!(memoizer = self.name, segment = idx, "hit");
                    return Ok(value);
                }
                segment.metrics.record_join();
            }
            existing
        };

        if let Some(cell) = existing {
            tracing::trace!(
                memoizer = self.name,
                segment = idx,
                "joining in-flight computation"
            );
            return cell.wait(token, deadline);
        }

        let candidate = Arc::new(Cell::new());
        match self.insert_if_absent(idx, key, &candidate) {
            None => self.run_owned(idx, key, &candidate, token),
            Some(installed) => {
                tracing::trace!(
                    memoizer = self.name,
                    segment = idx,
                    "lost install race, joining winner"
                );
                installed.wait(token, deadline)
            }
        }
    }

    /// Installs `candidate` unless the key already has a cell.
    ///
    /// Returns the previously installed cell, or `None` if `candidate` won.
    fn insert_if_absent(
        &self,
        idx: usize,
        key: &K,
        candidate: &CellRef<C::Output, C::Error>,
    ) -> Option<CellRef<C::Output, C::Error>> {
        let mut guard = self.segments[idx].lock();
        let segment = &mut *guard;
        match segment.entries.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                segment.metrics.record_race_loss();
                Some(Arc::clone(occupied.get()))
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(candidate));
                segment.metrics.record_computation();
                None
            }
        }
    }

    /// Runs the computation for a cell this caller installed and publishes the
    /// outcome.
    fn run_owned(
        &self,
        idx: usize,
        key: &K,
        cell: &CellRef<C::Output, C::Error>,
        token: Option<&CancelToken>,
    ) -> Result<C::Output, MemoError<C::Error>> {
        let signal = cell.signal();
        let _registration = token.map(|token| {
            let weak = Arc::downgrade(signal) as Weak<dyn Wake>;
            let registration = token.register(weak);
            if token.is_cancelled() {
                signal.trigger();
            }
            registration
        });

        // Unwinding out of the computation must not strand the waiters.
        let abandon = CallOnDrop::new(|| {
            if self.evict(idx, key, cell, Cancellation::Abandoned.into()) {
                tracing::warn!(
                    memoizer = self.name,
                    segment = idx,
                    "computation abandoned by its owner"
                );
            }
        });

        cell.start();
        let started = Instant::now();
        let result = if signal.is_aborted() {
            None
        } else {
            tracing::debug!(memoizer = self.name, segment = idx, "computation started");
            let scope = ComputeScope::new(Arc::clone(signal));
            Some(self.computation.compute(key, &scope))
        };
        abandon.disarm();

        // The run settles against its signal before publishing; once finished,
        // its hooks can no longer fire.
        match result.filter(|_| signal.finish()) {
            Some(Ok(value)) => {
                if cell.complete(value) {
                    self.segments[idx].lock().metrics.record_completion();
                    tracing::debug!(
                        memoizer = self.name,
                        segment = idx,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "computation completed"
                    );
                }
            }
            Some(Err(err)) => {
                if self.evict(idx, key, cell, MemoError::Computation(Arc::new(err))) {
                    tracing::debug!(
                        memoizer = self.name,
                        segment = idx,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "computation failed, entry evicted"
                    );
                }
            }
            // Whatever an aborted run produced, the abort came first.
            None => {
                if self.evict(idx, key, cell, Cancellation::Aborted.into()) {
                    tracing::debug!(
                        memoizer = self.name,
                        segment = idx,
                        "aborted computation evicted"
                    );
                }
            }
        }

        cell.outcome()
            .unwrap_or(Err(MemoError::Cancelled(Cancellation::Abandoned)))
    }

    /// Removes `cell` from its segment and fails it with `err`.
    ///
    /// The removal happens before waiters are released. Returns `false` if the
    /// cell had already reached a terminal state, in which case nothing changes.
    fn evict<Q>(
        &self,
        idx: usize,
        key: &Q,
        cell: &CellRef<C::Output, C::Error>,
        err: MemoError<C::Error>,
    ) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let mut segment = self.segments[idx].lock();
        let Some(failing) = cell.begin_fail() else {
            return false;
        };
        if segment
            .entries
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, cell))
        {
            segment.entries.remove(key);
        }
        match err {
            MemoError::Computation(_) => segment.metrics.record_failure(),
            MemoError::Cancelled(_) => segment.metrics.record_cancellation(),
        }
        failing.fail(err);
        true
    }

    /// Aborts the in-flight computation for `key`.
    ///
    /// Abort hooks registered by the computation run first, releasing whatever
    /// it is blocked on; then the entry is removed and every waiter, the owner
    /// included, receives [`Cancellation::Aborted`].
    ///
    /// Returns `true` if this call aborted a computation, `false` if there was
    /// none in flight, it finished first, or it was already aborted.
    pub fn cancel<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let idx = self.segment_index(key);
        let Some(cell) = self.segments[idx].lock().entries.get(key).cloned() else {
            return false;
        };
        if cell.status() == Some(CellStatus::Completed) {
            return false;
        }

        // A finished run is publishing its value; an aborted one is being
        // evicted by whoever aborted it.
        if !cell.signal().trigger() {
            return false;
        }
        let cancelled = self.evict(idx, key, &cell, Cancellation::Aborted.into());
        if cancelled {
            tracing::debug!(
                memoizer = self.name,
                segment = idx,
                "computation cancelled"
            );
        }
        cancelled
    }

    /// Returns the completed value for `key` without computing or waiting.
    pub fn peek<Q>(&self, key: &Q) -> Option<C::Output>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let idx = self.segment_index(key);
        let segment = self.segments[idx].lock();
        segment.entries.get(key).and_then(|cell| cell.value())
    }

    /// Returns the status of `key`'s entry, or `None` if it has none.
    pub fn status<Q>(&self, key: &Q) -> Option<CellStatus>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let idx = self.segment_index(key);
        let segment = self.segments[idx].lock();
        segment.entries.get(key).and_then(|cell| cell.status())
    }

    /// Removes a completed entry, returning its value.
    ///
    /// In-flight computations are left alone. This is the hook for an external
    /// eviction policy.
    pub fn invalidate<Q>(&self, key: &Q) -> Option<C::Output>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let idx = self.segment_index(key);
        let mut segment = self.segments[idx].lock();
        let value = segment.entries.get(key)?.value()?;
        segment.entries.remove(key);
        segment.metrics.record_invalidations(1);
        Some(value)
    }

    /// Removes every completed entry.
    ///
    /// In-flight computations keep running and still publish their values.
    /// Acquires locks on each segment sequentially.
    pub fn clear(&self) {
        for segment in self.segments.iter() {
            let mut segment = segment.lock();
            let before = segment.entries.len();
            segment
                .entries
                .retain(|_, cell| cell.status() != Some(CellStatus::Completed));
            let removed = (before - segment.entries.len()) as u64;
            segment.metrics.record_invalidations(removed);
        }
    }
}

impl<K, C, S> Memoizer<K, C, S>
where
    C: Computable<K>,
{
    /// Returns the number of entries, completed and in flight.
    ///
    /// Note: This acquires a lock on each segment sequentially, so the
    /// returned value may be slightly stale in high-concurrency scenarios.
    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.lock().entries.len()).sum()
    }

    /// Returns `true` if the memoizer holds no entries.
    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.lock().entries.is_empty())
    }

    /// Returns the number of computations currently pending or running.
    pub fn in_flight(&self) -> usize {
        self.segments
            .iter()
            .map(|s| {
                s.lock()
                    .entries
                    .values()
                    .filter(|cell| {
                        matches!(
                            cell.status(),
                            Some(CellStatus::Pending | CellStatus::Running)
                        )
                    })
                    .count()
            })
            .sum()
    }

    /// Returns the number of segments.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Returns the configured name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the computation whose results are memoized.
    pub fn computation(&self) -> &C {
        &self.computation
    }

    /// Returns the counters summed over all segments.
    pub fn memo_metrics(&self) -> MemoMetrics {
        let mut total = MemoMetrics::new();
        for segment in self.segments.iter() {
            total.merge(&segment.lock().metrics);
        }
        total
    }
}

impl<K, C, S> CacheMetrics for Memoizer<K, C, S>
where
    C: Computable<K>,
{
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.memo_metrics().to_btreemap()
    }

    fn algorithm_name(&self) -> &'static str {
        "SingleFlight"
    }
}

impl<K, C, S> fmt::Debug for Memoizer<K, C, S>
where
    C: Computable<K>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoizer")
            .field("name", &self.name)
            .field("segment_count", &self.segments.len())
            .field("total_len", &self.len())
            .finish()
    }
}
