// src/utils/mod.rs
//! Utilities shared across the supervisor
//!
//! Error types, logging setup and the retry backoff used by the work feed.

/// Error types and handling utilities
///
/// Contains [`MinerError`] for the public API plus the [`PoolError`] and
/// [`BackendError`] taxonomies that drive retry decisions.
pub mod error;

/// Logging configuration for the binary
pub mod logging;

/// Exponential backoff with jitter
pub mod backoff;

// Re-export for easier access
pub use backoff::Backoff;
pub use error::{BackendError, MinerError, PoolError};
pub use logging::{init_logging, init_verbose_logging};
