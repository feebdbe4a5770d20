// src/config/session.rs
use crate::types::{BackendKind, ConnectionMode};
use crate::utils::error::MinerError;
use serde::{Deserialize, Serialize};

/// One mining "tab": which backend to run and where to get work
///
/// Created by the presentation or persistence layer and handed to the
/// session manager. A running session never sees changes to it; edits take
/// effect by removing and recreating the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Display name, used in log lines
    #[serde(default = "default_name")]
    pub name: String,

    /// Backend executable family
    pub backend: BackendKind,

    /// Pool or local node
    #[serde(default = "default_mode")]
    pub mode: ConnectionMode,

    /// Endpoint host name or URL; solo mode defaults to localhost
    #[serde(default)]
    pub host: String,

    /// Endpoint port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Worker name or RPC user
    #[serde(default)]
    pub username: String,

    /// Worker or RPC password
    #[serde(default)]
    pub password: String,

    /// Device index for GPU backends
    #[serde(default)]
    pub device: Option<u32>,

    /// Free-form flags passed through to the backend
    #[serde(default)]
    pub flags: String,

    /// Start this session when the supervisor starts
    #[serde(default)]
    pub autostart: bool,
}

fn default_name() -> String {
    "Miner".into()
}

fn default_mode() -> ConnectionMode {
    ConnectionMode::Pool
}

fn default_port() -> u16 {
    8332
}

impl SessionConfig {
    /// Creates a pool-mode configuration with defaults for the rest
    pub fn pool(
        backend: BackendKind,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        SessionConfig {
            name: default_name(),
            backend,
            mode: ConnectionMode::Pool,
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            device: None,
            flags: String::new(),
            autostart: false,
        }
    }

    /// Creates a solo-mode configuration against the local node
    pub fn solo(backend: BackendKind) -> Self {
        SessionConfig {
            mode: ConnectionMode::Solo,
            ..SessionConfig::pool(backend, "", default_port(), "", "")
        }
    }

    /// Host to connect to, applying the solo default
    pub fn effective_host(&self) -> &str {
        if self.host.trim().is_empty() && self.mode == ConnectionMode::Solo {
            "localhost"
        } else {
            self.host.trim()
        }
    }

    /// Checks the fields the supervisor relies on
    pub fn validate(&self) -> Result<(), MinerError> {
        if self.effective_host().is_empty() {
            return Err(MinerError::ConfigError(format!(
                "Session '{}' has no host",
                self.name
            )));
        }
        if self.port == 0 {
            return Err(MinerError::ConfigError(format!(
                "Session '{}' has port 0",
                self.name
            )));
        }
        Ok(())
    }
}
