//! Memoizer Metrics System
//!
//! Provides BTreeMap-based metrics reporting for memoizers. Each segment keeps
//! its own [`MemoMetrics`], updated under the segment lock; the memoizer sums
//! them when [`CacheMetrics::metrics`] is called.
//!
//! # Why BTreeMap over HashMap?
//!
//! BTreeMap is used instead of HashMap for:
//! - **Deterministic ordering**: Metrics always appear in consistent order
//! - **Reproducible output**: Essential for testing and benchmarking comparisons
//! - **Better debugging**: Consistent output makes logs more readable
//!
//! # Counters
//!
//! ```text
//! requests = hits + joins + race_losses + computations
//! computations = completions + failures + cancellations (once all have finished)
//! ```

use std::collections::BTreeMap;

/// Counters tracked by each memoizer segment.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoMetrics {
    /// Total number of lookups made against the memoizer
    pub requests: u64,

    /// Lookups answered by an already completed entry
    pub hits: u64,

    /// Lookups that found an in-flight computation and waited on it
    pub joins: u64,

    /// Lookups that observed a miss but lost the install race to another caller
    pub race_losses: u64,

    /// Lookups that won the install race and ran the computation
    pub computations: u64,

    /// Computations that published a value
    pub completions: u64,

    /// Computations that returned a domain error
    pub failures: u64,

    /// Computations that were aborted or abandoned
    pub cancellations: u64,

    /// Completed entries removed through invalidation
    pub invalidations: u64,
}

impl MemoMetrics {
    /// Creates an empty set of counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a lookup answered from a completed entry.
    pub fn record_hit(&mut self) {
        self.requests += 1;
        self.hits += 1;
    }

    /// Records a lookup that waits on an in-flight computation.
    pub fn record_join(&mut self) {
        self.requests += 1;
        self.joins += 1;
    }

    /// Records a lookup that lost the install race and becomes a waiter.
    pub fn record_race_loss(&mut self) {
        self.requests += 1;
        self.race_losses += 1;
    }

    /// Records a lookup that installed a new entry and owns its computation.
    pub fn record_computation(&mut self) {
        self.requests += 1;
        self.computations += 1;
    }

    /// Records a computation that published a value.
    pub fn record_completion(&mut self) {
        self.completions += 1;
    }

    /// Records a computation that failed with a domain error.
    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    /// Records a computation that was aborted or abandoned.
    pub fn record_cancellation(&mut self) {
        self.cancellations += 1;
    }

    /// Records the removal of `count` completed entries.
    pub fn record_invalidations(&mut self, count: u64) {
        self.invalidations += count;
    }

    /// Adds another segment's counters to these.
    pub fn merge(&mut self, other: &MemoMetrics) {
        self.requests += other.requests;
        self.hits += other.hits;
        self.joins += other.joins;
        self.race_losses += other.race_losses;
        self.computations += other.computations;
        self.completions += other.completions;
        self.failures += other.failures;
        self.cancellations += other.cancellations;
        self.invalidations += other.invalidations;
    }

    /// Fraction of lookups answered without computing or waiting, in `0.0..=1.0`.
    pub fn hit_rate(&self) -> f64 {
        if self.requests > 0 {
            self.hits as f64 / self.requests as f64
        } else {
            0.0
        }
    }

    /// Fraction of lookups that were not immediate hits, in `0.0..=1.0`.
    pub fn miss_rate(&self) -> f64 {
        if self.requests > 0 {
            (self.requests - self.hits) as f64 / self.requests as f64
        } else {
            0.0
        }
    }

    /// Converts the counters to a BTreeMap for reporting.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();

        metrics.insert("requests".to_string(), self.requests as f64);
        metrics.insert("hits".to_string(), self.hits as f64);
        metrics.insert("joins".to_string(), self.joins as f64);
        metrics.insert("race_losses".to_string(), self.race_losses as f64);
        metrics.insert("computations".to_string(), self.computations as f64);
        metrics.insert("completions".to_string(), self.completions as f64);
        metrics.insert("failures".to_string(), self.failures as f64);
        metrics.insert("cancellations".to_string(), self.cancellations as f64);
        metrics.insert("invalidations".to_string(), self.invalidations as f64);

        // Rates (0.0 to 1.0)
        metrics.insert("hit_rate".to_string(), self.hit_rate());
        metrics.insert("miss_rate".to_string(), self.miss_rate());

        metrics
    }
}

/// Uniform metrics reporting interface.
///
/// The returned BTreeMap keeps keys sorted for reproducible output.
pub trait CacheMetrics {
    /// Returns all metrics as key-value pairs in deterministic order
    fn metrics(&self) -> BTreeMap<String, f64>;

    /// Algorithm name for identification
    fn algorithm_name(&self) -> &'static str;
}

impl CacheMetrics for MemoMetrics {
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.to_btreemap()
    }

    fn algorithm_name(&self) -> &'static str {
        "SingleFlight"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_with_no_requests() {
        let metrics = MemoMetrics::new();
        assert_eq!(metrics.hit_rate(), 0.0);
        assert_eq!(metrics.miss_rate(), 0.0);
    }

    #[test]
    fn test_record_and_rates() {
        let mut metrics = MemoMetrics::new();
        metrics.record_computation();
        metrics.record_completion();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_join();

        assert_eq!(metrics.requests, 4);
        assert_eq!(metrics.hits, 2);
        assert_eq!(metrics.hit_rate(), 0.5);
        assert_eq!(metrics.miss_rate(), 0.5);
    }

    #[test]
    fn test_merge_sums_counters() {
        let mut a = MemoMetrics::new();
        a.record_hit();
        a.record_failure();
        let mut b = MemoMetrics::new();
        b.record_race_loss();
        b.record_cancellation();
        b.record_invalidations(3);

        a.merge(&b);
        assert_eq!(a.requests, 2);
        assert_eq!(a.race_losses, 1);
        assert_eq!(a.failures, 1);
        assert_eq!(a.cancellations, 1);
        assert_eq!(a.invalidations, 3);
    }

    #[test]
    fn test_btreemap_keys_sorted() {
        let metrics = MemoMetrics::new().to_btreemap();
        let keys: Vec<_> = metrics.keys().cloned().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert!(metrics.contains_key("race_losses"));
        assert!(metrics.contains_key("hit_rate"));
    }
}
