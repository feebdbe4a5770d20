// src/network/mod.rs
//! Network communication components
//!
//! This module handles all interaction with work providers:
//! - `PoolClient`: `getwork` JSON-RPC client for pools and local nodes
//! - `WorkFeed`: background polling and long polling with retry policy
//! - Solo-mode credential lookup from the node's configuration file

/// `getwork` client and the `WorkSource` seam sessions depend on
pub mod pool;

/// Polling tasks feeding work units to a session
pub mod feed;

/// Local node credentials for solo mining
pub mod node;

// Re-export main components for cleaner imports
pub use feed::{FeedEvent, WorkFeed};
pub use node::NodeCredentials;
pub use pool::{PoolClient, WorkSource};
