// src/config/config.rs
use crate::config::session::SessionConfig;
use crate::config::settings::{BackendPaths, SoloSettings, SupervisorSettings};
use crate::utils::error::MinerError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Main configuration structure for the supervisor
///
/// Holds the shared tuning sections, the backend executable table, solo
/// node settings and the list of saved session profiles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Timeouts, ceilings and intervals shared by all sessions
    #[serde(flatten)]
    pub settings: SupervisorSettings,

    /// Executables per backend kind
    #[serde(default)]
    pub backends: BackendPaths,

    /// Local node settings
    #[serde(default)]
    pub solo: SoloSettings,

    /// Saved session profiles
    #[serde(default)]
    pub profiles: Vec<SessionConfig>,
}

impl Config {
    /// Loads configuration from a file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file (TOML format)
    ///
    /// # Returns
    /// * `Ok(Config)` - Successfully loaded and validated configuration
    /// * `Err(MinerError)` - If the file couldn't be read, parsed or validated
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, MinerError> {
        let path = path.into();
        let config_str = std::fs::read_to_string(&path).map_err(|e| {
            MinerError::ConfigError(format!(
                "Failed to read config at {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::parse(&config_str)
    }

    /// Parses and validates configuration text
    pub fn parse(text: &str) -> Result<Self, MinerError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks profiles for missing endpoints and duplicate names
    pub fn validate(&self) -> Result<(), MinerError> {
        let mut names = HashSet::new();
        for profile in &self.profiles {
            profile.validate()?;
            if !names.insert(profile.name.as_str()) {
                return Err(MinerError::ConfigError(format!(
                    "Duplicate profile name '{}'",
                    profile.name
                )));
            }
        }
        Ok(())
    }

    /// Looks up a profile by name
    pub fn profile(&self, name: &str) -> Option<&SessionConfig> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// Profiles flagged to start with the supervisor
    pub fn autostart_profiles(&self) -> impl Iterator<Item = &SessionConfig> {
        self.profiles.iter().filter(|p| p.autostart)
    }

    /// Generates a configuration template string
    ///
    /// # Returns
    /// String containing a commented TOML configuration template
    pub fn generate_template() -> String {
        let mut template = String::new();
        template.push_str("# Miner supervisor configuration\n\n");

        template.push_str("[pool]\n");
        template.push_str("# Seconds between getwork polls\n");
        template.push_str("poll_interval_secs = 5\n");
        template.push_str("rpc_timeout_secs = 10\n");
        template.push_str("submit_timeout_secs = 30\n");
        template.push_str("long_poll_timeout_secs = 600\n");
        template.push_str("# Work older than this is treated as stale\n");
        template.push_str("work_ttl_secs = 120\n");
        template.push_str("long_poll = true\n\n");

        template.push_str("[retry]\n");
        template.push_str("initial_delay_ms = 1000\n");
        template.push_str("max_delay_ms = 30000\n");
        template.push_str("jitter = 0.2\n");
        template.push_str("# Uncomment to give up after this many failed fetches in a row\n");
        template.push_str("# max_fetch_failures = 20\n");
        template.push_str("max_protocol_errors = 5\n");
        template.push_str("max_backend_restarts = 5\n");
        template.push_str("crash_reset_secs = 600\n\n");

        template.push_str("[backend]\n");
        template.push_str("# Seconds without progress output before a backend counts as hung\n");
        template.push_str("watchdog_secs = 60\n");
        template.push_str("stop_grace_secs = 5\n");
        template.push_str("stats_interval_ms = 1000\n");
        template.push_str("report_interval_secs = 60\n");
        template.push_str("rate_half_life_secs = 30\n\n");

        template.push_str("[backends.opencl]\n");
        template.push_str("executable = \"poclbm\"\n");
        template.push_str("[backends.cuda]\n");
        template.push_str("executable = \"rpcminer-cuda\"\n");
        template.push_str("[backends.cpu]\n");
        template.push_str("executable = \"rpcminer-cpu\"\n");
        template.push_str("feeds_work = true\n\n");

        template.push_str("[solo]\n");
        template.push_str("# Defaults to the node's data directory\n");
        template.push_str("# node_conf = \"/home/user/.bitcoin/bitcoin.conf\"\n\n");

        template.push_str("# Pool mining profile\n");
        template.push_str("[[profiles]]\n");
        template.push_str("name = \"pool\"\n");
        template.push_str("backend = \"opencl\"\n");
        template.push_str("mode = \"pool\"\n");
        template.push_str("host = \"pool.example.com\"\n");
        template.push_str("port = 8332\n");
        template.push_str("username = \"worker\"\n");
        template.push_str("password = \"x\"\n");
        template.push_str("device = 0\n");
        template.push_str("flags = \"-v -w128\"\n");
        template.push_str("autostart = true\n\n");

        template.push_str("# Solo mining profile; credentials come from bitcoin.conf\n");
        template.push_str("[[profiles]]\n");
        template.push_str("name = \"solo\"\n");
        template.push_str("backend = \"cpu\"\n");
        template.push_str("mode = \"solo\"\n");
        template.push_str("port = 8332\n");

        template
    }
}
