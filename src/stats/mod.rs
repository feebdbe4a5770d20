//! Statistics collection and reporting module
//!
//! This module provides:
//! - The per-session [`RateAggregator`], the only writer of [`SessionStats`]
//! - A decayed moving-average hash rate and share counters
//! - Log reporting of session events and periodic summaries
//!

/// Hash-rate average and share accounting
///
/// Updates are serialized per session; snapshots are lock-free reads.
pub mod aggregator;

/// Log output driven by session events
pub mod reporter;

// Re-export main components
pub use aggregator::{ConnectionState, RateAggregator, SessionStats};
pub use reporter::{EventReporter, format_hash_rate, summary_line};
