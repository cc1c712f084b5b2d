#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Code Reference
//!
//! This section provides quick code examples and API references for the memoizer.
//!
//! ## Lookup Outcomes
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                         What does get(key) do?                              │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                                                                             │
//! │  ┌─────────────────┐                                                        │
//! │  │ Entry present?  │──No──▶ insert-if-absent ──won──▶ compute (no locks)    │
//! │  └────────┬────────┘               │                      │                 │
//! │          Yes                      lost                Ok / Err              │
//! │           │                        │                  ▼      ▼              │
//! │           ▼                        ▼              publish  evict + fail     │
//! │  ┌─────────────────┐        ┌──────────────┐                                │
//! │  │   Completed?    │──No──▶ │ wait on cell │ ◀── token / deadline           │
//! │  └────────┬────────┘        └──────────────┘                                │
//! │          Yes                                                                │
//! │           ▼                                                                 │
//! │     return value                                                            │
//! │                                                                             │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Reference
//!
//! | Operation | Blocks? | Description |
//! |-----------|---------|-------------|
//! | [`Memoizer::get`] | Yes | Cached value, or compute it once for everyone |
//! | [`Memoizer::get_with_token`] | Yes | As `get`, stops waiting on cancellation |
//! | [`Memoizer::get_timeout`] | Yes | As `get`, stops waiting after a duration |
//! | [`Memoizer::cancel`] | No | Abort an in-flight computation |
//! | [`Memoizer::peek`] | No | Completed value only, never computes |
//! | [`Memoizer::invalidate`] | No | Drop one completed value |
//! | [`Memoizer::clear`] | No | Drop every completed value |
//!
//! ## Code Examples
//!
//! ### Sharing One Computation
//!
//! ```rust
//! use memo_rs::computation::from_fn;
//! use memo_rs::Memoizer;
//! use std::convert::Infallible;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let calls = AtomicUsize::new(0);
//! let memo = Memoizer::new(from_fn(|n: &u64| {
//!     calls.fetch_add(1, Ordering::SeqCst);
//!     Ok::<_, Infallible>((1..=*n).product::<u64>())
//! }));
//!
//! assert_eq!(memo.get(&7).unwrap(), 5040);
//! assert_eq!(memo.get(&7).unwrap(), 5040);
//! assert_eq!(calls.load(Ordering::SeqCst), 1);
//! ```
//!
//! ### Failures Are Retried
//!
//! ```rust
//! use memo_rs::computation::from_fn;
//! use memo_rs::Memoizer;
//! use std::sync::atomic::{AtomicBool, Ordering};
//!
//! #[derive(Debug, thiserror::Error)]
//! #[error("network down")]
//! struct NetworkDown;
//!
//! let online = AtomicBool::new(false);
//! let memo = Memoizer::new(from_fn(|_: &&str| {
//!     if online.swap(true, Ordering::SeqCst) { Ok(1) } else { Err(NetworkDown) }
//! }));
//!
//! assert!(memo.get(&"x").is_err());
//! assert_eq!(memo.get(&"x").unwrap(), 1);
//! ```
//!
//! ### Giving Up On A Wait
//!
//! ```rust
//! use memo_rs::computation::from_fn;
//! use memo_rs::{Cancellation, Memoizer};
//! use std::convert::Infallible;
//! use std::sync::Arc;
//! use std::thread;
//! use std::time::Duration;
//!
//! let memo = Arc::new(Memoizer::new(from_fn(|n: &u32| {
//!     thread::sleep(Duration::from_millis(200));
//!     Ok::<_, Infallible>(*n)
//! })));
//!
//! let owner = {
//!     let memo = Arc::clone(&memo);
//!     thread::spawn(move || memo.get(&1))
//! };
//! while memo.status(&1).is_none() {
//!     thread::yield_now();
//! }
//!
//! let err = memo.get_timeout(&1, Duration::from_millis(10)).unwrap_err();
//! assert_eq!(err.cancellation(), Some(Cancellation::TimedOut));
//! assert_eq!(owner.join().unwrap().unwrap(), 1);
//! ```
//!
//! ## Modules
//!
//! - [`computation`]: The [`Computable`] contract and closure adapters
//! - [`config`]: Configuration for the memoizer
//! - [`error`]: Lookup errors and cancellation reasons
//! - [`metrics`]: Metrics collection for memoizer monitoring

#[cfg(test)]
extern crate scoped_threadpool;

/// Cancellation tokens and abort signals.
mod cancel;

/// Per-key placeholder cells and their state machine.
mod cell;

/// The computation contract.
///
/// Provides the [`Computable`] trait, the [`ComputeScope`] handed to each run,
/// and adapters that turn closures into computations.
pub mod computation;

/// Memoizer configuration.
pub mod config;

/// Error types.
pub mod error;

/// Memoizer metrics system.
///
/// Provides counters per segment and a uniform BTreeMap-based reporting trait.
pub mod metrics;

/// The single-flight memoizer.
mod memoizer;

pub use cancel::CancelToken;
pub use cell::CellStatus;
pub use computation::{from_fn, from_scoped_fn, Computable, ComputeScope};
pub use config::MemoizerConfig;
pub use error::{Cancellation, MemoError};
pub use memoizer::Memoizer;
pub use metrics::{CacheMetrics, MemoMetrics};
