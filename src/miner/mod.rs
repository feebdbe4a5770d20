// src/miner/mod.rs
//! Hashing backend side of a session
//!
//! This module contains everything between the supervisor and the external
//! hashing executables:
//! - Work units and the book that decides which one is live
//! - Parsing of backend output into structured events
//! - Launching, feeding and stopping backend processes

/// Work units, results and share outcomes
pub mod work;

/// Backend output grammar
pub mod output;

/// Backend process lifecycle
pub mod backend;

// Re-export main components for cleaner imports
pub use self::backend::{BackendHandle, BackendLauncher, BackendProcess, LaunchedBackend, ProcessLauncher};
pub use self::output::{BackendEvent, OutputParser, ProgressSample, Termination};
pub use self::work::{ShareOutcome, WorkBook, WorkId, WorkOrigin, WorkResult, WorkUnit};
