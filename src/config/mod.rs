// src/config/mod.rs
//! Configuration management for the supervisor
//!
//! This module handles:
//! - Loading and validating the TOML configuration file
//! - Session profiles ([`SessionConfig`])
//! - Timeouts, ceilings and backend executables shared by all sessions
//! - Generating a commented template

/// Top-level configuration file
pub mod config;

/// Per-session configuration
pub mod session;

/// Tuning sections and backend table
pub mod settings;

// Re-export key items for easy access
pub use config::Config;
pub use session::SessionConfig;
pub use settings::{
    BackendCommand, BackendPaths, BackendSettings, PoolSettings, RetrySettings, SoloSettings,
    SupervisorSettings,
};

use crate::utils::error::MinerError;
use std::path::PathBuf;

/// Loads supervisor configuration from a TOML file
///
/// # Arguments
/// * `path` - Path to the configuration file (anything convertible to PathBuf)
pub fn load(path: impl Into<PathBuf>) -> Result<Config, MinerError> {
    Config::load(path)
}

/// Generates a commented configuration template
pub fn generate_template() -> String {
    Config::generate_template()
}
