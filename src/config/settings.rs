// src/config/settings.rs
//! Tuning sections of the configuration file
//!
//! Every timeout and ceiling the supervisor uses lives here so it can be
//! set per installation. Values are plain integers in the TOML file and are
//! exposed as [`Duration`]s to the rest of the crate.

use crate::types::BackendKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Settings shared by every session of one supervisor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupervisorSettings {
    /// Pool RPC timing
    #[serde(default)]
    pub pool: PoolSettings,

    /// Retry and restart ceilings
    #[serde(default)]
    pub retry: RetrySettings,

    /// Backend supervision timing
    #[serde(default)]
    pub backend: BackendSettings,
}

/// Pool RPC timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Seconds between short-poll `getwork` requests
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Timeout for a `getwork` fetch
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,

    /// Timeout for a share submission
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_secs: u64,

    /// Timeout for a held-open long-poll request
    #[serde(default = "default_long_poll_timeout")]
    pub long_poll_timeout_secs: u64,

    /// Age after which an unsuperseded work unit is considered stale
    #[serde(default = "default_work_ttl")]
    pub work_ttl_secs: u64,

    /// Use long polling when the endpoint advertises it
    #[serde(default = "default_true")]
    pub long_poll: bool,
}

fn default_poll_interval() -> u64 {
    5
}

fn default_rpc_timeout() -> u64 {
    10
}

fn default_submit_timeout() -> u64 {
    30
}

fn default_long_poll_timeout() -> u64 {
    600
}

fn default_work_ttl() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

impl Default for PoolSettings {
    fn default() -> Self {
        PoolSettings {
            poll_interval_secs: default_poll_interval(),
            rpc_timeout_secs: default_rpc_timeout(),
            submit_timeout_secs: default_submit_timeout(),
            long_poll_timeout_secs: default_long_poll_timeout(),
            work_ttl_secs: default_work_ttl(),
            long_poll: true,
        }
    }
}

impl PoolSettings {
    /// Delay between short polls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// Timeout of one `getwork` fetch
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs.max(1))
    }

    /// Timeout of one share submission
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs.max(1))
    }

    /// How long a long-poll request may stay open
    pub fn long_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.long_poll_timeout_secs.max(1))
    }

    /// Age after which unrefreshed work counts as stale
    pub fn work_ttl(&self) -> Duration {
        Duration::from_secs(self.work_ttl_secs.max(1))
    }
}

/// Retry and restart ceilings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// First reconnect delay
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Reconnect delay cap
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Maximum fraction of jitter added to each delay
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Consecutive fetch failures before the session fails (unbounded if absent)
    #[serde(default)]
    pub max_fetch_failures: Option<u32>,

    /// Consecutive malformed responses before the session fails
    #[serde(default = "default_max_protocol_errors")]
    pub max_protocol_errors: u32,

    /// Backend crashes tolerated before the session fails
    #[serde(default = "default_max_backend_restarts")]
    pub max_backend_restarts: u32,

    /// A backend that ran this long before crashing resets the crash budget
    #[serde(default = "default_crash_reset")]
    pub crash_reset_secs: u64,
}

fn default_initial_delay() -> u64 {
    1_000
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_jitter() -> f64 {
    0.2
}

fn default_max_protocol_errors() -> u32 {
    5
}

fn default_max_backend_restarts() -> u32 {
    5
}

fn default_crash_reset() -> u64 {
    600
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            jitter: default_jitter(),
            max_fetch_failures: None,
            max_protocol_errors: default_max_protocol_errors(),
            max_backend_restarts: default_max_backend_restarts(),
            crash_reset_secs: default_crash_reset(),
        }
    }
}

impl RetrySettings {
    /// First retry delay
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Retry delay cap
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Uptime after which a backend's crash count starts over
    pub fn crash_reset(&self) -> Duration {
        Duration::from_secs(self.crash_reset_secs)
    }
}

/// Backend supervision timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Seconds without any progress output before the backend counts as hung
    #[serde(default = "default_watchdog")]
    pub watchdog_secs: u64,

    /// Seconds a stopping backend gets before it is killed
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,

    /// Milliseconds between statistics events to observers
    #[serde(default = "default_stats_interval")]
    pub stats_interval_ms: u64,

    /// Seconds between summary log lines per session
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,

    /// Half-life of the hash-rate moving average
    #[serde(default = "default_rate_half_life")]
    pub rate_half_life_secs: u64,
}

fn default_watchdog() -> u64 {
    60
}

fn default_stop_grace() -> u64 {
    5
}

fn default_stats_interval() -> u64 {
    1_000
}

fn default_report_interval() -> u64 {
    60
}

fn default_rate_half_life() -> u64 {
    30
}

impl Default for BackendSettings {
    fn default() -> Self {
        BackendSettings {
            watchdog_secs: default_watchdog(),
            stop_grace_secs: default_stop_grace(),
            stats_interval_ms: default_stats_interval(),
            report_interval_secs: default_report_interval(),
            rate_half_life_secs: default_rate_half_life(),
        }
    }
}

impl BackendSettings {
    /// Silence after which a backend counts as hung
    pub fn watchdog(&self) -> Duration {
        Duration::from_secs(self.watchdog_secs.max(1))
    }

    /// Time a backend gets to exit before it is killed
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    /// Interval between statistics events
    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms.max(10))
    }

    /// Interval between logged summaries
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs.max(1))
    }

    /// Half-life of the hash-rate average
    pub fn rate_half_life(&self) -> Duration {
        Duration::from_secs(self.rate_half_life_secs.max(1))
    }
}

/// How to launch one backend kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendCommand {
    /// Program to run
    pub executable: PathBuf,

    /// Directory to run it in
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Whether the backend reads superseding work units from stdin.
    /// When false, new work requires a stop and relaunch.
    #[serde(default = "default_true")]
    pub feeds_work: bool,
}

impl BackendCommand {
    fn named(executable: &str) -> Self {
        BackendCommand {
            executable: PathBuf::from(executable),
            working_dir: None,
            feeds_work: true,
        }
    }
}

/// Executable table keyed by backend kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendPaths {
    /// OpenCL backend (`poclbm`)
    #[serde(default = "default_opencl")]
    pub opencl: BackendCommand,

    /// CUDA backend
    #[serde(default = "default_cuda")]
    pub cuda: BackendCommand,

    /// CPU backend
    #[serde(default = "default_cpu")]
    pub cpu: BackendCommand,
}

fn default_opencl() -> BackendCommand {
    BackendCommand::named("poclbm")
}

fn default_cuda() -> BackendCommand {
    BackendCommand::named("rpcminer-cuda")
}

fn default_cpu() -> BackendCommand {
    BackendCommand::named("rpcminer-cpu")
}

impl Default for BackendPaths {
    fn default() -> Self {
        BackendPaths {
            opencl: default_opencl(),
            cuda: default_cuda(),
            cpu: default_cpu(),
        }
    }
}

impl BackendPaths {
    /// Command for the given kind
    pub fn command(&self, kind: BackendKind) -> &BackendCommand {
        match kind {
            BackendKind::OpenCl => &self.opencl,
            BackendKind::Cuda => &self.cuda,
            BackendKind::Cpu => &self.cpu,
        }
    }
}

/// Local node settings for solo mining
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SoloSettings {
    /// Path to the node's `bitcoin.conf`; platform default when absent
    #[serde(default)]
    pub node_conf: Option<PathBuf>,
}
