// src/network/node.rs
//! Local node ("solo") credentials
//!
//! Solo sessions use the same `getwork` client pointed at the local node.
//! The node's RPC credentials live in its `bitcoin.conf`; when a solo
//! session leaves username or password empty they are read from there.

use crate::config::{SessionConfig, SoloSettings};
use crate::types::ConnectionMode;
use crate::utils::error::MinerError;
use std::path::{Path, PathBuf};

/// RPC credentials read from a node configuration file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeCredentials {
    /// `rpcuser`
    pub user: String,
    /// `rpcpassword`
    pub password: String,
}

impl NodeCredentials {
    /// Parses `key=value` lines, ignoring comments and sections
    ///
    /// # Returns
    /// * `Some(NodeCredentials)` if both `rpcuser` and `rpcpassword` are set
    /// * `None` otherwise
    pub fn parse(text: &str) -> Option<Self> {
        let mut user = None;
        let mut password = None;

        for line in text.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key.trim() {
                "rpcuser" => user = Some(value.trim().to_string()),
                "rpcpassword" => password = Some(value.trim().to_string()),
                _ => {}
            }
        }

        Some(NodeCredentials {
            user: user?,
            password: password?,
        })
    }

    /// Reads credentials from a `bitcoin.conf`
    ///
    /// # Errors
    /// Returns `MinerError::ConfigError` if the file is unreadable or lacks
    /// `rpcuser`/`rpcpassword`
    pub fn load(path: &Path) -> Result<Self, MinerError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            MinerError::ConfigError(format!(
                "Failed to read node config at {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&text).ok_or_else(|| {
            MinerError::ConfigError(format!(
                "{} does not set rpcuser and rpcpassword",
                path.display()
            ))
        })
    }
}

/// Platform default location of `bitcoin.conf`
pub fn default_conf_path() -> Option<PathBuf> {
    let data_dir = if cfg!(any(target_os = "windows", target_os = "macos")) {
        dirs::config_dir().map(|dir| dir.join("Bitcoin"))
    } else {
        dirs::home_dir().map(|dir| dir.join(".bitcoin"))
    };
    data_dir.map(|dir| dir.join("bitcoin.conf"))
}

/// Fills in missing solo-mode credentials from the node configuration
///
/// Pool sessions, and solo sessions with both credentials set, are returned
/// unchanged.
pub fn resolve_credentials(
    config: &SessionConfig,
    solo: &SoloSettings,
) -> Result<SessionConfig, MinerError> {
    let mut resolved = config.clone();
    if config.mode != ConnectionMode::Solo
        || (!config.username.is_empty() && !config.password.is_empty())
    {
        return Ok(resolved);
    }

    let path = solo
        .node_conf
        .clone()
        .or_else(default_conf_path)
        .ok_or_else(|| MinerError::ConfigError("Cannot locate bitcoin.conf".into()))?;
    let credentials = NodeCredentials::load(&path)?;
    log::debug!("Using RPC credentials from {}", path.display());

    if resolved.username.is_empty() {
        resolved.username = credentials.user;
    }
    if resolved.password.is_empty() {
        resolved.password = credentials.password;
    }
    Ok(resolved)
}
