// src/utils/error.rs
use crate::session::SessionId;
use std::io;
use thiserror::Error;

/// Main error type for the supervisor
///
/// This enum represents the error conditions surfaced by the public API:
/// configuration problems, I/O, and failures bubbling up from the pool
/// client or the backend process layer.
#[derive(Error, Debug)]
pub enum MinerError {
    /// Configuration file or parameter errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Standard I/O operation errors
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// URL parsing errors
    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    /// HTTP client construction errors
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Pool protocol errors
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Backend process errors
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// The session identifier is not (or no longer) registered
    #[error("Unknown session {0}")]
    UnknownSession(SessionId),

    /// Async runtime or task errors
    #[error("Task execution error: {0}")]
    TaskError(String),
}

/// Failures of a single pool RPC
///
/// The variant decides the retry policy: network and protocol failures are
/// transient, authentication failures are terminal for the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Connection refused, reset, or timed out
    #[error("network error: {0}")]
    Network(String),

    /// Credentials rejected by the server
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Malformed or unexpected response
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl PoolError {
    /// Whether the failure may be retried with backoff
    pub fn is_transient(&self) -> bool {
        !matches!(self, PoolError::Auth(_))
    }
}

/// Converts reqwest transport errors into pool errors
///
/// Decode failures mean the server answered with something we cannot read,
/// everything else is a transport problem.
impl From<reqwest::Error> for PoolError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            PoolError::Protocol(format!("undecodable response: {}", e))
        } else if e.is_timeout() {
            PoolError::Network(format!("request timed out: {}", e))
        } else {
            PoolError::Network(e.to_string())
        }
    }
}

/// Errors raised while launching or driving a backend process
#[derive(Error, Debug)]
pub enum BackendError {
    /// The executable could not be started
    #[error("failed to launch {executable}: {source}")]
    Spawn {
        /// Program that was attempted
        executable: String,
        /// Underlying OS error
        source: io::Error,
    },

    /// Extra flags contain characters that cannot be passed through
    #[error("invalid backend flags: {0}")]
    InvalidFlags(String),

    /// The backend cannot take a new work unit without a restart
    #[error("backend does not accept work while running")]
    FeedUnsupported,

    /// Pipe I/O with the backend failed
    #[error("backend I/O error: {0}")]
    Io(#[from] io::Error),

    /// The backend exited unexpectedly or went silent
    #[error("backend crashed: {0}")]
    Crashed(String),
}

/// Converts async task join errors into MinerError
impl From<tokio::task::JoinError> for MinerError {
    fn from(e: tokio::task::JoinError) -> Self {
        MinerError::TaskError(format!("Async task failed: {}", e))
    }
}

/// Converts TOML parse errors into configuration errors
impl From<toml::de::Error> for MinerError {
    fn from(e: toml::de::Error) -> Self {
        MinerError::ConfigError(format!("Invalid config format: {}", e))
    }
}
