// tests/common/mod.rs
//! In-process stand-ins for the pool and the backend executables
#![allow(dead_code)]

use async_trait::async_trait;
use btc_miner_supervisor::config::{
    BackendSettings, PoolSettings, RetrySettings, SessionConfig, SupervisorSettings,
};
use btc_miner_supervisor::miner::{
    BackendEvent, BackendHandle, BackendLauncher, LaunchedBackend, ShareOutcome, WorkId,
    WorkOrigin, WorkResult, WorkUnit,
};
use btc_miner_supervisor::session::{
    SessionEvent, SessionEventKind, SessionFactory, SessionId, SessionManager, SessionParts,
    SessionState,
};
use btc_miner_supervisor::utils::{BackendError, MinerError, PoolError};
use crossbeam_channel::Receiver;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(5);

/// Work source driven by a script of fetch failures
pub struct FakeSource {
    script: Mutex<VecDeque<PoolError>>,
    next_id: AtomicU64,
    generation: AtomicU64,
    pub fetches: AtomicUsize,
    pub submitted: Mutex<Vec<(WorkId, bool)>>,
    pub verdict: Mutex<ShareOutcome>,
    hang: AtomicBool,
    long_polling: AtomicBool,
    pushes: Mutex<VecDeque<(WorkId, u8)>>,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Self::failing(Vec::new())
    }

    /// Fails with each error in turn, then serves work
    pub fn failing(errors: Vec<PoolError>) -> Arc<Self> {
        Arc::new(FakeSource {
            script: Mutex::new(errors.into()),
            next_id: AtomicU64::new(0),
            generation: AtomicU64::new(1),
            fetches: AtomicUsize::new(0),
            submitted: Mutex::new(Vec::new()),
            verdict: Mutex::new(ShareOutcome::Accepted),
            hang: AtomicBool::new(false),
            long_polling: AtomicBool::new(false),
            pushes: Mutex::new(VecDeque::new()),
        })
    }

    /// Never answers a fetch
    pub fn hanging() -> Arc<Self> {
        let source = Self::new();
        source.hang.store(true, Ordering::SeqCst);
        source
    }

    /// Advertises long polling; units are delivered with [`FakeSource::push`]
    pub fn long_polling() -> Arc<Self> {
        let source = Self::new();
        source.long_polling.store(true, Ordering::SeqCst);
        source
    }

    /// Queues a long-poll answer with the given id, filled with `fill`
    pub fn push(&self, id: WorkId, fill: u8) {
        self.pushes.lock().unwrap().push_back((id, fill));
    }

    /// Makes the next fetch return a different assignment
    pub fn new_block(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl btc_miner_supervisor::network::WorkSource for FakeSource {
    async fn fetch_work(&self) -> Result<WorkUnit, PoolError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if let Some(error) = self.script.lock().unwrap().pop_front() {
            return Err(error);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let fill = self.generation.load(Ordering::SeqCst) as u8;
        WorkUnit::new(id, vec![fill; 128], vec![0xff; 32], WorkOrigin::Poll)
    }

    async fn submit_work(
        &self,
        unit: &WorkUnit,
        _result: &WorkResult,
        superseded: bool,
    ) -> Result<ShareOutcome, PoolError> {
        self.submitted.lock().unwrap().push((unit.id, superseded));
        Ok(*self.verdict.lock().unwrap())
    }

    fn supports_long_poll(&self) -> bool {
        self.long_polling.load(Ordering::SeqCst)
    }

    async fn long_poll(&self) -> Result<WorkUnit, PoolError> {
        loop {
            let pushed = self.pushes.lock().unwrap().pop_front();
            if let Some((id, fill)) = pushed {
                return WorkUnit::new(id, vec![fill; 128], vec![0xff; 32], WorkOrigin::LongPoll);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Backend launcher whose "processes" are channels owned by the test
pub struct FakeLauncher {
    pub launched: Mutex<Vec<WorkId>>,
    pub fed: Arc<Mutex<Vec<WorkId>>>,
    pub stops: Arc<AtomicUsize>,
    senders: Mutex<Vec<mpsc::Sender<BackendEvent>>>,
    feeds_work: bool,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        Self::with_feeding(true)
    }

    pub fn with_feeding(feeds_work: bool) -> Arc<Self> {
        Arc::new(FakeLauncher {
            launched: Mutex::new(Vec::new()),
            fed: Arc::new(Mutex::new(Vec::new())),
            stops: Arc::new(AtomicUsize::new(0)),
            senders: Mutex::new(Vec::new()),
            feeds_work,
        })
    }

    pub fn launch_count(&self) -> usize {
        self.launched.lock().unwrap().len()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Waits for the `n`th launch and returns that backend's output channel
    pub async fn backend(&self, n: usize) -> mpsc::Sender<BackendEvent> {
        let found = wait_until(|| self.senders.lock().unwrap().len() >= n).await;
        assert!(found, "backend #{} was never launched", n);
        self.senders.lock().unwrap()[n - 1].clone()
    }
}

struct FakeHandle {
    fed: Arc<Mutex<Vec<WorkId>>>,
    stops: Arc<AtomicUsize>,
    feeds_work: bool,
}

#[async_trait]
impl BackendHandle for FakeHandle {
    async fn feed(&mut self, work: &WorkUnit) -> Result<(), BackendError> {
        if !self.feeds_work {
            return Err(BackendError::FeedUnsupported);
        }
        self.fed.lock().unwrap().push(work.id);
        Ok(())
    }

    async fn stop(&mut self, _grace: Duration) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BackendLauncher for FakeLauncher {
    async fn launch(
        &self,
        _config: &SessionConfig,
        work: &WorkUnit,
    ) -> Result<LaunchedBackend, BackendError> {
        let (tx, rx) = mpsc::channel(64);
        self.launched.lock().unwrap().push(work.id);
        self.senders.lock().unwrap().push(tx);
        Ok(LaunchedBackend {
            handle: Box::new(FakeHandle {
                fed: self.fed.clone(),
                stops: self.stops.clone(),
                feeds_work: self.feeds_work,
            }),
            events: rx,
        })
    }
}

/// Hands each session the fakes registered under its name
#[derive(Default)]
pub struct FakeFactory {
    parts: Mutex<HashMap<String, (Arc<FakeSource>, Arc<FakeLauncher>)>>,
}

impl FakeFactory {
    pub fn with(
        self: Arc<Self>,
        name: &str,
        source: Arc<FakeSource>,
        launcher: Arc<FakeLauncher>,
    ) -> Arc<Self> {
        self.parts
            .lock()
            .unwrap()
            .insert(name.to_string(), (source, launcher));
        self
    }
}

impl SessionFactory for FakeFactory {
    fn build(&self, config: &SessionConfig) -> Result<SessionParts, MinerError> {
        let parts = self.parts.lock().unwrap();
        let (source, launcher) = parts
            .get(&config.name)
            .ok_or_else(|| MinerError::ConfigError(format!("no fakes for {}", config.name)))?;
        Ok(SessionParts {
            source: source.clone(),
            launcher: launcher.clone(),
            config: config.clone(),
        })
    }
}

/// Settings scaled down so scenarios finish in milliseconds
pub fn fast_settings() -> SupervisorSettings {
    SupervisorSettings {
        pool: PoolSettings {
            poll_interval_secs: 1,
            ..PoolSettings::default()
        },
        retry: RetrySettings {
            initial_delay_ms: 10,
            max_delay_ms: 40,
            jitter: 0.0,
            max_backend_restarts: 2,
            ..RetrySettings::default()
        },
        backend: BackendSettings {
            stop_grace_secs: 0,
            stats_interval_ms: 20,
            ..BackendSettings::default()
        },
    }
}

pub fn session_config(name: &str) -> SessionConfig {
    let mut config = SessionConfig::pool(
        btc_miner_supervisor::BackendKind::Cpu,
        "pool.example.com",
        8332,
        "worker",
        "x",
    );
    config.name = name.to_string();
    config
}

/// Manager with a single session named `name` backed by the given fakes
pub fn single_session(
    source: Arc<FakeSource>,
    launcher: Arc<FakeLauncher>,
) -> (SessionManager, SessionId) {
    let factory = Arc::new(FakeFactory::default()).with("miner", source, launcher);
    let manager = SessionManager::new(fast_settings(), factory).unwrap();
    let id = manager.create_session(session_config("miner")).unwrap();
    (manager, id)
}

/// Polls `done` every few milliseconds until it holds or [`WAIT`] elapses
pub async fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    done()
}

pub async fn wait_for_state(
    manager: &SessionManager,
    id: SessionId,
    wanted: impl Fn(&SessionState) -> bool,
) -> SessionState {
    let reached = wait_until(|| manager.state(id).map(|s| wanted(&s)).unwrap_or(false)).await;
    let state = manager.state(id).unwrap();
    assert!(reached, "session stuck in {:?}", state);
    state
}

/// Everything delivered to a subscriber so far
pub fn drain(events: &Receiver<SessionEvent>) -> Vec<SessionEvent> {
    events.try_iter().collect()
}

/// State transitions among `events`, in order
pub fn states(events: &[SessionEvent]) -> Vec<SessionState> {
    events
        .iter()
        .filter_map(|e| match &e.kind {
            SessionEventKind::State(state) => Some(state.clone()),
            _ => None,
        })
        .collect()
}
