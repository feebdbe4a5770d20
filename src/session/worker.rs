// src/session/worker.rs
//! One mining session's execution context
//!
//! A [`WorkerSession`] is a single task that owns everything mutable about
//! a session: the work book, the backend handle, the crash budget and the
//! in-flight share submissions. Work fetching runs in the [`WorkFeed`]
//! tasks and backend output in the process reader tasks; both talk to the
//! session only through channels, and only [`RateAggregator`] is touched
//! from more than one place.

use crate::config::{SessionConfig, SupervisorSettings};
use crate::miner::backend::{BackendHandle, BackendLauncher, LaunchedBackend};
use crate::miner::output::BackendEvent;
use crate::miner::work::{Offer, Resolved, ShareOutcome, WorkBook, WorkResult, WorkUnit};
use crate::network::feed::{FeedEvent, WorkFeed};
use crate::network::pool::WorkSource;
use crate::session::events::{EventBus, SessionEventKind, SessionId, SessionState};
use crate::stats::{ConnectionState, RateAggregator};
use crate::utils::error::{BackendError, MinerError};
use arc_swap::ArcSwap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

/// Requests queued to a session task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Start,
    Stop,
    Remove,
}

/// Collaborators for one mining run
pub struct SessionParts {
    /// Pool or node client
    pub source: Arc<dyn WorkSource>,
    /// Starts the hashing backend
    pub launcher: Arc<dyn BackendLauncher>,
    /// Configuration with defaults and solo credentials filled in
    pub config: SessionConfig,
}

/// Builds the collaborators of a session each time it starts
///
/// Building happens on every `start`, so a failed session picks up fixed
/// node credentials or a reachable endpoint on its next attempt.
pub trait SessionFactory: Send + Sync {
    /// Returns the client, launcher and resolved configuration for a run
    fn build(&self, config: &SessionConfig) -> Result<SessionParts, MinerError>;
}

/// State a session shares with its manager
pub(crate) struct SessionShared {
    pub id: SessionId,
    pub config: SessionConfig,
    pub stats: RateAggregator,
    state: ArcSwap<SessionState>,
}

impl SessionShared {
    pub(crate) fn new(id: SessionId, config: SessionConfig, half_life: Duration) -> Self {
        SessionShared {
            id,
            config,
            stats: RateAggregator::new(half_life),
            state: ArcSwap::from_pointee(SessionState::Idle),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        (**self.state.load()).clone()
    }
}

/// How a mining run ended
enum Exit {
    Stopped,
    Failed(String),
    Removed,
}

pub(crate) struct WorkerSession {
    shared: Arc<SessionShared>,
    bus: Arc<EventBus>,
    factory: Arc<dyn SessionFactory>,
    settings: SupervisorSettings,
}

impl WorkerSession {
    pub(crate) fn new(
        shared: Arc<SessionShared>,
        bus: Arc<EventBus>,
        factory: Arc<dyn SessionFactory>,
        settings: SupervisorSettings,
    ) -> Self {
        WorkerSession {
            shared,
            bus,
            factory,
            settings,
        }
    }

    /// Processes commands until the session is removed
    pub(crate) async fn run(self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Start => match self.mine(&mut commands).await {
                    Exit::Stopped => self.set_state(SessionState::Stopped),
                    Exit::Failed(reason) => {
                        log::error!("{}: failed: {}", self.label(), reason);
                        self.set_state(SessionState::Failed { reason });
                    }
                    Exit::Removed => break,
                },
                Command::Stop => {
                    if self.shared.state() == SessionState::Idle {
                        self.set_state(SessionState::Stopped);
                    }
                }
                Command::Remove => break,
            }
        }

        if self.shared.state().is_running() {
            self.set_state(SessionState::Stopped);
        }
        log::info!("{}: removed", self.label());
        self.publish(SessionEventKind::Removed);
    }

    fn label(&self) -> String {
        format!("{} {}", self.shared.id, self.shared.config.name)
    }

    fn publish(&self, kind: SessionEventKind) {
        self.bus.publish(self.shared.id, kind);
    }

    fn set_state(&self, state: SessionState) {
        if **self.shared.state.load() == state {
            return;
        }
        self.shared.stats.set_connection(state.connection());
        self.shared.state.store(Arc::new(state.clone()));
        log::info!("{}: {}", self.label(), state);
        self.publish(SessionEventKind::State(state));
    }

    async fn mine(&self, commands: &mut mpsc::UnboundedReceiver<Command>) -> Exit {
        self.shared.stats.reset(ConnectionState::Connecting);
        self.set_state(SessionState::Connecting);

        let parts = match self.factory.build(&self.shared.config) {
            Ok(parts) => parts,
            Err(e) => return Exit::Failed(e.to_string()),
        };
        let (mut feed, feed_events) = WorkFeed::spawn(
            parts.source.clone(),
            self.settings.pool.poll_interval(),
            self.settings.retry.clone(),
        );

        let mut run = MiningRun::new(self, parts);
        let exit = run.drive(commands, feed_events).await;

        feed.stop();
        run.shutdown().await;
        exit
    }
}

/// Mutable state of one start-to-stop run
struct MiningRun<'a> {
    session: &'a WorkerSession,
    label: String,
    source: Arc<dyn WorkSource>,
    launcher: Arc<dyn BackendLauncher>,
    config: SessionConfig,
    book: WorkBook,
    backend: Option<Box<dyn BackendHandle>>,
    events: Option<mpsc::Receiver<BackendEvent>>,
    launched_at: Instant,
    restarts: u32,
    submitted: HashSet<WorkResult>,
    submissions: JoinSet<Option<ShareOutcome>>,
}

impl<'a> MiningRun<'a> {
    fn new(session: &'a WorkerSession, parts: SessionParts) -> Self {
        MiningRun {
            session,
            label: session.label(),
            source: parts.source,
            launcher: parts.launcher,
            config: parts.config,
            book: WorkBook::new(session.settings.pool.work_ttl()),
            backend: None,
            events: None,
            launched_at: Instant::now(),
            restarts: 0,
            submitted: HashSet::new(),
            submissions: JoinSet::new(),
        }
    }

    async fn drive(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        mut feed: mpsc::UnboundedReceiver<FeedEvent>,
    ) -> Exit {
        let session = self.session;
        let mut ticker = tokio::time::interval(session.settings.backend.stats_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Stop) => return Exit::Stopped,
                    Some(Command::Remove) | None => return Exit::Removed,
                    Some(Command::Start) => log::debug!("{}: already running", self.label),
                },
                event = feed.recv() => {
                    let Some(event) = event else {
                        return Exit::Failed("work feed ended unexpectedly".into());
                    };
                    if let Err(reason) = self.on_feed(event).await {
                        return Exit::Failed(reason);
                    }
                }
                event = next_backend_event(&mut self.events) => {
                    if let Err(reason) = self.on_backend(event).await {
                        return Exit::Failed(reason);
                    }
                }
                Some(joined) = self.submissions.join_next(), if !self.submissions.is_empty() => {
                    if let Ok(Some(outcome)) = joined {
                        session.shared.stats.observe_outcome(outcome);
                    }
                }
                _ = ticker.tick() => {
                    session.publish(SessionEventKind::Stats(session.shared.stats.snapshot()));
                }
            }
        }
    }

    async fn on_feed(&mut self, event: FeedEvent) -> Result<(), String> {
        match event {
            FeedEvent::Work(unit) => {
                if let Offer::Fresh(unit) = self.book.offer(unit) {
                    self.deliver(unit).await?;
                }
                if self.backend.is_some() {
                    self.session.set_state(SessionState::Mining);
                }
            }
            FeedEvent::Trouble {
                error,
                attempt,
                delay,
            } => {
                log::warn!(
                    "{}: work fetch failed (attempt {}), retrying in {:?}: {}",
                    self.label,
                    attempt,
                    delay,
                    error
                );
                self.session.publish(SessionEventKind::Retrying {
                    attempt,
                    delay,
                    reason: error.to_string(),
                });
                self.session.set_state(SessionState::Reconnecting);
            }
            FeedEvent::Fatal(reason) => return Err(reason),
        }
        Ok(())
    }

    /// Hands freshly live work to the backend, launching one if needed
    async fn deliver(&mut self, unit: Arc<WorkUnit>) -> Result<(), String> {
        let keep_from = unit.id.saturating_sub(1);
        self.submitted.retain(|r| r.work_id >= keep_from);

        if let Some(backend) = self.backend.as_mut() {
            match backend.feed(&unit).await {
                Ok(()) => return Ok(()),
                Err(BackendError::FeedUnsupported) => {
                    log::debug!("{}: relaunching backend for work {}", self.label, unit.id);
                    self.stop_backend(self.session.settings.backend.stop_grace())
                        .await;
                }
                Err(e) => {
                    // The crash shows up on the event stream and is handled there.
                    log::warn!("{}: could not feed work {}: {}", self.label, unit.id, e);
                    return Ok(());
                }
            }
        }
        self.launch(&unit).await
    }

    async fn launch(&mut self, unit: &WorkUnit) -> Result<(), String> {
        let LaunchedBackend { handle, events } = self
            .launcher
            .launch(&self.config, unit)
            .await
            .map_err(|e| e.to_string())?;
        self.backend = Some(handle);
        self.events = Some(events);
        self.launched_at = Instant::now();
        Ok(())
    }

    async fn stop_backend(&mut self, grace: Duration) {
        self.events = None;
        if let Some(mut backend) = self.backend.take() {
            backend.stop(grace).await;
        }
    }

    async fn on_backend(&mut self, event: Option<BackendEvent>) -> Result<(), String> {
        let session = self.session;
        let stats = &session.shared.stats;
        match event {
            Some(BackendEvent::Progress(sample)) => stats.observe_progress(sample),
            Some(BackendEvent::Share(result)) => self.submit(result),
            Some(BackendEvent::Outcome(outcome)) => stats.observe_outcome(outcome),
            Some(BackendEvent::SoloCheck) => stats.observe_solo_check(),
            Some(BackendEvent::Status(text)) => session.publish(SessionEventKind::Status(text)),
            Some(BackendEvent::Terminated(termination)) => {
                return self.recover(termination.to_string()).await;
            }
            None => return self.recover("backend output closed".into()).await,
        }
        Ok(())
    }

    /// Submits a solution at most once, in the background
    fn submit(&mut self, result: WorkResult) {
        if !self.submitted.insert(result) {
            log::debug!(
                "{}: ignoring repeated share {} for work {}",
                self.label,
                hex::encode(result.nonce),
                result.work_id
            );
            return;
        }

        let (unit, superseded) = match self.book.resolve(result.work_id) {
            Resolved::Live(unit) => (unit, false),
            Resolved::Superseded(unit) => (unit, true),
            Resolved::Stale => {
                log::info!(
                    "{}: share for expired work {} counted stale",
                    self.label,
                    result.work_id
                );
                self.session
                    .shared
                    .stats
                    .observe_outcome(ShareOutcome::Stale);
                return;
            }
        };

        let source = self.source.clone();
        let label = self.label.clone();
        self.submissions.spawn(async move {
            match source.submit_work(&unit, &result, superseded).await {
                Ok(outcome) => {
                    log::info!(
                        "{}: share {} for work {}: {:?}",
                        label,
                        hex::encode(result.nonce),
                        result.work_id,
                        outcome
                    );
                    Some(outcome)
                }
                Err(e) => {
                    log::warn!("{}: share submission failed: {}", label, e);
                    None
                }
            }
        });
    }

    /// Relaunches a crashed backend on the live work, within the crash budget
    async fn recover(&mut self, reason: String) -> Result<(), String> {
        self.stop_backend(Duration::ZERO).await;

        let session = self.session;
        let retry = &session.settings.retry;
        if self.launched_at.elapsed() >= retry.crash_reset() {
            self.restarts = 0;
        }
        self.restarts += 1;
        if self.restarts > retry.max_backend_restarts {
            return Err(format!(
                "backend crashed {} times in a row, last: {}",
                self.restarts, reason
            ));
        }
        let Some(unit) = self.book.current() else {
            return Err(reason);
        };

        log::warn!(
            "{}: {}; relaunching ({}/{})",
            self.label,
            reason,
            self.restarts,
            retry.max_backend_restarts
        );
        self.launch(&unit).await?;
        session.publish(SessionEventKind::BackendRestarted {
            restarts: self.restarts,
            reason,
        });
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.submissions.abort_all();
        self.stop_backend(self.session.settings.backend.stop_grace())
            .await;
    }
}

async fn next_backend_event(
    events: &mut Option<mpsc::Receiver<BackendEvent>>,
) -> Option<BackendEvent> {
    match events.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
