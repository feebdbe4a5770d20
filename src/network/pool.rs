// src/network/pool.rs

//! Mining pool client implementation
//!
//! Speaks the `getwork` JSON-RPC protocol over HTTP with basic-auth
//! credentials. The same client serves pools and a local node in solo mode.
//! Responses are classified into the [`PoolError`] taxonomy so the work feed
//! can decide between retrying and giving up.
use crate::config::{PoolSettings, SessionConfig};
use crate::miner::work::{ShareOutcome, WorkOrigin, WorkResult, WorkUnit};
use crate::utils::error::{MinerError, PoolError};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use url::Url;

/// Header advertising the long-poll path
pub const LONG_POLL_HEADER: &str = "X-Long-Polling";

/// Header carrying the reason a share was rejected
pub const REJECT_REASON_HEADER: &str = "X-Reject-Reason";

/// Target implied when a server omits one (difficulty 1, little endian)
const DIFF1_TARGET: &str = "ffffffffffffffffffffffffffffffffffffffffffffffffffffffff00000000";

/// Source of work units and sink for solutions
///
/// Implemented by [`PoolClient`]; sessions only depend on this trait.
#[async_trait]
pub trait WorkSource: Send + Sync {
    /// Requests a new work unit
    async fn fetch_work(&self) -> Result<WorkUnit, PoolError>;

    /// Submits a solution for `unit`
    ///
    /// `superseded` tells the classifier that newer work already replaced
    /// the unit, which turns an unexplained rejection into a stale share.
    async fn submit_work(
        &self,
        unit: &WorkUnit,
        result: &WorkResult,
        superseded: bool,
    ) -> Result<ShareOutcome, PoolError>;

    /// Whether the endpoint advertised long polling
    fn supports_long_poll(&self) -> bool;

    /// Waits on the long-poll path for the next work unit
    async fn long_poll(&self) -> Result<WorkUnit, PoolError>;
}

/// JSON-RPC response envelope
#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default, rename = "reject-reason")]
    reject_reason: Option<String>,
}

/// `getwork` result fields
#[derive(Debug, Deserialize)]
struct GetworkResult {
    data: String,
    #[serde(default)]
    target: Option<String>,
}

/// Client for one pool or node endpoint
pub struct PoolClient {
    endpoint: Url,
    username: String,
    password: String,
    client: Client,
    settings: PoolSettings,
    next_work_id: AtomicU64,
    next_rpc_id: AtomicU64,
    long_poll_url: ArcSwapOption<Url>,
}

/// Builds the endpoint URL from a host field and port
///
/// Hosts given as bare names get `http://`; hosts given as URLs keep their
/// scheme and path and take the configured port.
pub fn endpoint_url(host: &str, port: u16) -> Result<Url, MinerError> {
    let host = host.trim();
    let mut url = if host.contains("://") {
        Url::parse(host)?
    } else {
        Url::parse(&format!("http://{}/", host))?
    };
    url.set_port(Some(port))
        .map_err(|_| MinerError::ConfigError(format!("Cannot set port on '{}'", host)))?;
    Ok(url)
}

/// Maps a submission reply to a share outcome
pub fn classify_submission(accepted: bool, reason: Option<&str>, superseded: bool) -> ShareOutcome {
    if accepted {
        return ShareOutcome::Accepted;
    }
    match reason.map(str::to_lowercase) {
        Some(r) if r.contains("duplicate") => ShareOutcome::Duplicate,
        Some(r) if r.contains("stale") => ShareOutcome::Stale,
        Some(_) => ShareOutcome::Invalid,
        None if superseded => ShareOutcome::Stale,
        None => ShareOutcome::Invalid,
    }
}

impl PoolClient {
    /// Creates a client for `endpoint`
    ///
    /// # Errors
    /// Returns `MinerError` if the HTTP client cannot be built
    pub fn new(
        endpoint: Url,
        username: impl Into<String>,
        password: impl Into<String>,
        settings: PoolSettings,
    ) -> Result<Self, MinerError> {
        let client = Client::builder()
            .connect_timeout(settings.rpc_timeout())
            .user_agent(format!("miner-supervisor/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(PoolClient {
            endpoint,
            username: username.into(),
            password: password.into(),
            client,
            settings,
            next_work_id: AtomicU64::new(0),
            next_rpc_id: AtomicU64::new(0),
            long_poll_url: ArcSwapOption::empty(),
        })
    }

    /// Creates a client for the endpoint and credentials of a session
    pub fn for_session(config: &SessionConfig, settings: PoolSettings) -> Result<Self, MinerError> {
        let endpoint = endpoint_url(config.effective_host(), config.port)?;
        Self::new(endpoint, &config.username, &config.password, settings)
    }

    /// URL fetches are sent to
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Long-poll URL advertised by the server, if any
    pub fn long_poll_url(&self) -> Option<Url> {
        self.long_poll_url.load_full().map(|url| (*url).clone())
    }

    /// Issues one `getwork` call
    async fn rpc(
        &self,
        url: &Url,
        params: Value,
        timeout: Duration,
    ) -> Result<(HeaderMap, RpcResponse), PoolError> {
        let id = self.next_rpc_id.fetch_add(1, Ordering::Relaxed);
        let response = self
            .client
            .post(url.clone())
            .basic_auth(&self.username, Some(&self.password))
            .timeout(timeout)
            .json(&json!({
                "method": "getwork",
                "params": params,
                "id": id
            }))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(PoolError::Auth(format!(
                "{} refused credentials for '{}' ({})",
                url.host_str().unwrap_or_default(),
                self.username,
                status
            )));
        }

        let headers = response.headers().clone();
        let body = response.text().await?;
        let parsed = serde_json::from_str::<RpcResponse>(&body);

        if !status.is_success() {
            return Err(match parsed {
                Ok(RpcResponse {
                    error: Some(error), ..
                }) => PoolError::Protocol(format!("server error: {}", error)),
                _ if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS => {
                    PoolError::Network(format!("HTTP {}", status))
                }
                _ => PoolError::Protocol(format!("unexpected HTTP status {}", status)),
            });
        }

        let rpc = parsed.map_err(|e| PoolError::Protocol(format!("malformed response: {}", e)))?;
        if let Some(error) = &rpc.error {
            return Err(PoolError::Protocol(format!("server error: {}", error)));
        }
        Ok((headers, rpc))
    }

    /// Remembers the long-poll path from response headers
    fn note_long_poll(&self, headers: &HeaderMap) {
        if !self.settings.long_poll {
            return;
        }
        let Some(path) = headers.get(LONG_POLL_HEADER).and_then(|v| v.to_str().ok()) else {
            return;
        };
        match self.endpoint.join(path.trim()) {
            Ok(url) => {
                if self.long_poll_url().as_ref() != Some(&url) {
                    log::info!("Long polling available at {}", url);
                    self.long_poll_url.store(Some(Arc::new(url)));
                }
            }
            Err(e) => log::warn!("Ignoring long-poll path '{}': {}", path, e),
        }
    }

    /// Converts a `getwork` result into a numbered work unit
    fn parse_work(&self, result: Value, origin: WorkOrigin) -> Result<WorkUnit, PoolError> {
        let work: GetworkResult = serde_json::from_value(result)
            .map_err(|e| PoolError::Protocol(format!("bad getwork result: {}", e)))?;
        let data = hex::decode(work.data.trim())
            .map_err(|e| PoolError::Protocol(format!("bad work data: {}", e)))?;
        let target = hex::decode(work.target.as_deref().unwrap_or(DIFF1_TARGET).trim())
            .map_err(|e| PoolError::Protocol(format!("bad work target: {}", e)))?;

        let id = self.next_work_id.fetch_add(1, Ordering::SeqCst) + 1;
        WorkUnit::new(id, data, target, origin)
    }
}

#[async_trait]
impl WorkSource for PoolClient {
    async fn fetch_work(&self) -> Result<WorkUnit, PoolError> {
        let (headers, rpc) = self
            .rpc(&self.endpoint, json!([]), self.settings.rpc_timeout())
            .await?;
        self.note_long_poll(&headers);
        self.parse_work(rpc.result, WorkOrigin::Poll)
    }

    async fn submit_work(
        &self,
        unit: &WorkUnit,
        result: &WorkResult,
        superseded: bool,
    ) -> Result<ShareOutcome, PoolError> {
        let data = hex::encode(unit.solved_data(result.nonce));
        let (headers, rpc) = self
            .rpc(&self.endpoint, json!([data]), self.settings.submit_timeout())
            .await?;

        let accepted = rpc.result.as_bool().ok_or_else(|| {
            PoolError::Protocol(format!("submission reply is not a boolean: {}", rpc.result))
        })?;
        let reason = headers
            .get(REJECT_REASON_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or(rpc.reject_reason);

        let outcome = classify_submission(accepted, reason.as_deref(), superseded);
        if !accepted {
            log::debug!(
                "Share for work {} rejected ({}): {:?}",
                unit.id,
                reason.as_deref().unwrap_or("no reason"),
                outcome
            );
        }
        Ok(outcome)
    }

    fn supports_long_poll(&self) -> bool {
        self.settings.long_poll && self.long_poll_url.load().is_some()
    }

    async fn long_poll(&self) -> Result<WorkUnit, PoolError> {
        let url = self
            .long_poll_url()
            .ok_or_else(|| PoolError::Protocol("endpoint does not support long polling".into()))?;
        let (headers, rpc) = self
            .rpc(&url, json!([]), self.settings.long_poll_timeout())
            .await?;
        self.note_long_poll(&headers);
        self.parse_work(rpc.result, WorkOrigin::LongPoll)
    }
}
