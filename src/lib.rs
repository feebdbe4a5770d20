//! Bitcoin mining session supervisor
//!
//! This crate runs external hashing backends (OpenCL, CUDA or CPU) against a
//! `getwork` pool or a local node, with support for:
//! - Several independent sessions managed through one [`SessionManager`]
//! - Long polling alongside fixed-interval polling
//! - Backend crash and watchdog recovery within a restart budget
//! - Decayed moving-average hash rate and share accounting

#![warn(missing_docs)]
#![forbid(unsafe_code)]

/// Backend side: work units, output parsing and process supervision
pub mod miner;

/// Network communication components for pool and node connections
pub mod network;

/// Statistics collection and reporting functionality
pub mod stats;

/// Sessions, their state machine and the session manager
pub mod session;

/// Utility functions and error handling
pub mod utils;

/// Command-line interface definitions
pub mod cli;

/// Configuration management
pub mod config;

/// Shared type definitions
pub mod types;

// Core exports
pub use cli::Commands;
pub use config::{Config, SessionConfig};
pub use miner::{BackendProcess, ShareOutcome, WorkResult, WorkUnit};
pub use network::{PoolClient, WorkSource};
pub use session::{SessionEvent, SessionEventKind, SessionId, SessionManager, SessionState};
pub use stats::{ConnectionState, RateAggregator, SessionStats};
pub use types::{BackendKind, ConnectionMode};
pub use utils::{MinerError, init_logging};
