//! Memoizer Configuration Module
//!
//! This module provides the configuration structure for [`Memoizer`](crate::Memoizer).
//!
//! # Design Philosophy
//!
//! The configuration struct has all public fields for simple instantiation:
//!
//! - **Simple**: Just create the struct with all fields set, or start from `Default`
//! - **Type safety**: All parameters are plain values checked at construction
//! - **No boilerplate**: No builder methods needed
//!
//! # Sizing Guidelines
//!
//! ## Understanding `segments`
//!
//! The key space is partitioned across `segments` independent maps, each behind
//! its own lock. The lock is only held to look up a key, install a placeholder
//! for a new computation, or remove a failed one, never while computing. More
//! segments reduce contention between callers whose keys happen to share a
//! segment; each segment costs one `Mutex` and one (initially empty) map.
//!
//! ```text
//! segments = hardware threads, clamped to 4..=64 (the default)
//! ```
//!
//! # Examples
//!
//! ```
//! use memo_rs::config::MemoizerConfig;
//!
//! let config = MemoizerConfig {
//!     name: "thumbnails",
//!     segments: 32,
//! };
//! assert_eq!(config.segments, 32);
//!
//! let config = MemoizerConfig::default();
//! assert_eq!(config.name, "memoizer");
//! assert!(config.segments >= 4 && config.segments <= 64);
//! ```

use core::fmt;

/// Returns the default number of segments based on available parallelism.
pub fn default_segment_count() -> usize {
    // Use available parallelism, clamped to reasonable bounds
    std::thread::available_parallelism()
        .map(|p: std::num::NonZeroUsize| p.get())
        .unwrap_or(16)
        .clamp(4, 64)
}

/// Configuration for a [`Memoizer`](crate::Memoizer).
///
/// # Fields
///
/// - `name`: Identifies the memoizer in log events and metrics output
/// - `segments`: Number of independent lock-striped segments. A value of `0`
///   is treated as `1`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MemoizerConfig {
    /// Name attached to every log event emitted by the memoizer.
    pub name: &'static str,
    /// Number of segments for sharding (more segments = less contention)
    pub segments: usize,
}

impl MemoizerConfig {
    /// Returns the effective segment count, never less than one.
    pub(crate) fn segment_count(&self) -> usize {
        self.segments.max(1)
    }
}

impl Default for MemoizerConfig {
    fn default() -> Self {
        Self {
            name: "memoizer",
            segments: default_segment_count(),
        }
    }
}

impl fmt::Debug for MemoizerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoizerConfig")
            .field("name", &self.name)
            .field("segments", &self.segments)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MemoizerConfig::default();
        assert_eq!(config.name, "memoizer");
        assert!(config.segments >= 4);
        assert!(config.segments <= 64);
    }

    #[test]
    fn test_default_matches_available_parallelism() {
        let expected = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(16)
            .clamp(4, 64);
        assert_eq!(default_segment_count(), expected);
        assert_eq!(MemoizerConfig::default().segments, expected);
    }

    #[test]
    fn test_zero_segments_is_one() {
        let config = MemoizerConfig {
            name: "test",
            segments: 0,
        };
        assert_eq!(config.segment_count(), 1);
    }

    #[test]
    fn test_debug_output() {
        let config = MemoizerConfig {
            name: "dbg",
            segments: 8,
        };
        let debug = format!("{:?}", config);
        assert!(debug.contains("MemoizerConfig"));
        assert!(debug.contains("dbg"));
        assert!(debug.contains('8'));
    }
}
