// src/session/manager.rs
//! Registry of concurrently running sessions
//!
//! The manager maps session identifiers to their tasks. Every public call
//! only touches the map and a command queue, so a session that is busy,
//! crashing or stuck in a network timeout never delays calls for another.

use crate::config::{
    BackendPaths, Config, PoolSettings, SessionConfig, SoloSettings, SupervisorSettings,
};
use crate::miner::backend::ProcessLauncher;
use crate::network::node::resolve_credentials;
use crate::network::pool::PoolClient;
use crate::session::events::{EventBus, SessionEvent, SessionEventKind, SessionId, SessionState};
use crate::session::worker::{
    Command, SessionFactory, SessionParts, SessionShared, WorkerSession,
};
use crate::stats::SessionStats;
use crate::utils::error::MinerError;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Builds real pool clients and backend processes
pub struct ProcessFactory {
    backends: BackendPaths,
    solo: SoloSettings,
    pool: PoolSettings,
    watchdog: Duration,
}

impl ProcessFactory {
    /// Captures the backend paths, solo defaults and pool settings of `config`
    pub fn new(config: &Config) -> Self {
        ProcessFactory {
            backends: config.backends.clone(),
            solo: config.solo.clone(),
            pool: config.settings.pool.clone(),
            watchdog: config.settings.backend.watchdog(),
        }
    }
}

impl SessionFactory for ProcessFactory {
    fn build(&self, config: &SessionConfig) -> Result<SessionParts, MinerError> {
        let resolved = resolve_credentials(config, &self.solo)?;
        let client = PoolClient::for_session(&resolved, self.pool.clone())?;
        log::debug!("{}: fetching work from {}", resolved.name, client.endpoint());
        let launcher = ProcessLauncher::new(
            self.backends.command(resolved.backend).clone(),
            self.watchdog,
        );
        Ok(SessionParts {
            source: Arc::new(client),
            launcher: Arc::new(launcher),
            config: resolved,
        })
    }
}

struct SessionSlot {
    shared: Arc<SessionShared>,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// Owns every session of the process
///
/// Calls return as soon as the request is queued; state changes arrive as
/// [`SessionEvent`]s on subscriber channels.
pub struct SessionManager {
    sessions: Mutex<HashMap<SessionId, SessionSlot>>,
    next_id: AtomicU64,
    bus: Arc<EventBus>,
    factory: Arc<dyn SessionFactory>,
    settings: SupervisorSettings,
    runtime: Handle,
}

impl SessionManager {
    /// Creates a manager that spawns sessions on the current Tokio runtime
    ///
    /// # Errors
    /// Returns `MinerError::TaskError` when called outside a runtime
    pub fn new(
        settings: SupervisorSettings,
        factory: Arc<dyn SessionFactory>,
    ) -> Result<Self, MinerError> {
        let runtime = Handle::try_current()
            .map_err(|e| MinerError::TaskError(format!("No Tokio runtime: {}", e)))?;
        Ok(Self::with_handle(settings, factory, runtime))
    }

    /// Creates a manager that spawns sessions on `runtime`
    pub fn with_handle(
        settings: SupervisorSettings,
        factory: Arc<dyn SessionFactory>,
        runtime: Handle,
    ) -> Self {
        SessionManager {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            bus: Arc::new(EventBus::default()),
            factory,
            settings,
            runtime,
        }
    }

    /// Creates a manager running real backends as described by `config`
    pub fn from_config(config: &Config) -> Result<Self, MinerError> {
        Self::new(config.settings.clone(), Arc::new(ProcessFactory::new(config)))
    }

    /// Registers a new idle session
    ///
    /// # Errors
    /// Returns `MinerError::ConfigError` if the configuration is unusable
    pub fn create_session(&self, config: SessionConfig) -> Result<SessionId, MinerError> {
        config.validate()?;

        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let name = config.name.clone();
        let shared = Arc::new(SessionShared::new(
            id,
            config,
            self.settings.backend.rate_half_life(),
        ));
        let (commands, rx) = mpsc::unbounded_channel();
        let worker = WorkerSession::new(
            shared.clone(),
            self.bus.clone(),
            self.factory.clone(),
            self.settings.clone(),
        );
        let task = self.runtime.spawn(worker.run(rx));

        self.sessions.lock().insert(
            id,
            SessionSlot {
                shared,
                commands,
                task,
            },
        );
        log::info!("Created session {} ({})", id, name);
        self.bus
            .publish(id, SessionEventKind::State(SessionState::Idle));
        Ok(id)
    }

    /// Starts (or restarts after a failure) a session
    ///
    /// Restarting zeroes the session's statistics. Starting a running
    /// session has no effect.
    pub fn start_session(&self, id: SessionId) -> Result<(), MinerError> {
        self.send(id, Command::Start)
    }

    /// Stops a session's backend and network activity
    ///
    /// Stopping an idle, stopped or failed session is a no-op.
    pub fn stop_session(&self, id: SessionId) -> Result<(), MinerError> {
        self.send(id, Command::Stop)
    }

    /// Stops the session if running and forgets it
    ///
    /// A [`SessionEventKind::Removed`] event follows once its backend is gone.
    pub fn remove_session(&self, id: SessionId) -> Result<(), MinerError> {
        let slot = self
            .sessions
            .lock()
            .remove(&id)
            .ok_or(MinerError::UnknownSession(id))?;
        let _ = slot.commands.send(Command::Remove);
        Ok(())
    }

    /// Registers an observer of every session's events
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        self.bus.subscribe()
    }

    /// Current statistics of a session
    pub fn snapshot(&self, id: SessionId) -> Result<SessionStats, MinerError> {
        self.with_slot(id, |slot| slot.shared.stats.snapshot())
    }

    /// Current lifecycle state of a session
    pub fn state(&self, id: SessionId) -> Result<SessionState, MinerError> {
        self.with_slot(id, |slot| slot.shared.state())
    }

    /// Configuration the session was created with
    pub fn config(&self, id: SessionId) -> Result<SessionConfig, MinerError> {
        self.with_slot(id, |slot| slot.shared.config.clone())
    }

    /// Identifiers of all registered sessions, oldest first
    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.sessions.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Removes every session and waits for their backends to exit
    ///
    /// Sessions still running after the stop grace period plus a second
    /// are aborted; dropping their process handles kills the backends.
    pub async fn shutdown(&self) {
        let slots: Vec<SessionSlot> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        if slots.is_empty() {
            return;
        }
        log::info!("Shutting down {} session(s)", slots.len());

        let mut tasks = Vec::with_capacity(slots.len());
        for slot in slots {
            let _ = slot.commands.send(Command::Remove);
            tasks.push(slot.task);
        }

        let limit = self.settings.backend.stop_grace() + Duration::from_secs(1);
        let joined = tokio::time::timeout(limit, futures::future::join_all(tasks.iter_mut())).await;
        if joined.is_err() {
            log::warn!("Sessions did not stop within {:?}, aborting", limit);
            for task in &tasks {
                task.abort();
            }
        }
    }

    fn send(&self, id: SessionId, command: Command) -> Result<(), MinerError> {
        let sessions = self.sessions.lock();
        let slot = sessions.get(&id).ok_or(MinerError::UnknownSession(id))?;
        slot.commands
            .send(command)
            .map_err(|_| MinerError::TaskError(format!("Session {} task has ended", id)))
    }

    fn with_slot<T>(
        &self,
        id: SessionId,
        read: impl FnOnce(&SessionSlot) -> T,
    ) -> Result<T, MinerError> {
        let sessions = self.sessions.lock();
        sessions
            .get(&id)
            .map(read)
            .ok_or(MinerError::UnknownSession(id))
    }
}
