// src/miner/backend.rs
//! Backend process supervision
//!
//! A [`BackendProcess`] owns one running hashing executable. Work units go
//! in on stdin, output lines come back as [`BackendEvent`]s on a channel that
//! always ends with [`BackendEvent::Terminated`]. The process layer only
//! reports crashes; deciding whether to relaunch belongs to the session.
//!
//! Stdin is written by a dedicated task that only ever holds the newest
//! unit. A backend that stops reading its input fills the pipe and blocks
//! that task, never the caller of [`BackendHandle::feed`].

use crate::config::{BackendCommand, SessionConfig};
use crate::miner::output::{BackendEvent, OutputParser, Termination};
use crate::miner::work::{WorkId, WorkUnit};
use crate::utils::error::BackendError;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Events buffered between the output reader and the session
const EVENT_BUFFER: usize = 1024;

/// Control side of a running backend
#[async_trait]
pub trait BackendHandle: Send {
    /// Hands a superseding work unit to the running backend
    ///
    /// Returns [`BackendError::FeedUnsupported`] when the backend has to be
    /// relaunched to pick up new work.
    async fn feed(&mut self, work: &WorkUnit) -> Result<(), BackendError>;

    /// Asks the backend to exit, killing it after `grace`
    async fn stop(&mut self, grace: Duration);
}

/// A started backend: its control handle and its event stream
pub struct LaunchedBackend {
    /// Feeds work to and stops the backend
    pub handle: Box<dyn BackendHandle>,
    /// Parsed output, ending with [`BackendEvent::Terminated`]
    pub events: mpsc::Receiver<BackendEvent>,
}

/// Starts backends for a session
#[async_trait]
pub trait BackendLauncher: Send + Sync {
    /// Starts a backend working on `work`
    async fn launch(
        &self,
        config: &SessionConfig,
        work: &WorkUnit,
    ) -> Result<LaunchedBackend, BackendError>;
}

/// Launches real executables
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    command: BackendCommand,
    watchdog: Duration,
}

impl ProcessLauncher {
    /// # Arguments
    /// * `command` - Executable and launch options for the backend kind
    /// * `watchdog` - Silence after which the backend counts as hung
    pub fn new(command: BackendCommand, watchdog: Duration) -> Self {
        ProcessLauncher { command, watchdog }
    }
}

#[async_trait]
impl BackendLauncher for ProcessLauncher {
    async fn launch(
        &self,
        config: &SessionConfig,
        work: &WorkUnit,
    ) -> Result<LaunchedBackend, BackendError> {
        let (process, events) =
            BackendProcess::start(&self.command, config, work, self.watchdog).await?;
        Ok(LaunchedBackend {
            handle: Box::new(process),
            events,
        })
    }
}

/// Command-line arguments for a backend
///
/// Extra flags are opaque to the supervisor: they are split on whitespace
/// and passed through, after rejecting control characters.
pub fn build_args(config: &SessionConfig) -> Result<Vec<String>, BackendError> {
    if let Some(bad) = config.flags.chars().find(|c| c.is_control() && *c != '\t') {
        return Err(BackendError::InvalidFlags(format!(
            "control character {:?} in '{}'",
            bad, config.flags
        )));
    }

    let mut args = vec![
        format!("--user={}", config.username),
        format!("--pass={}", config.password),
        "-o".to_string(),
        config.effective_host().to_string(),
        "-p".to_string(),
        config.port.to_string(),
    ];
    if config.backend.uses_device() {
        if let Some(device) = config.device {
            args.push(format!("-d{}", device));
        }
    }
    args.push("--verbose".to_string());
    args.extend(config.flags.split_whitespace().map(str::to_string));
    Ok(args)
}

/// A stdin line waiting for the writer task
#[derive(Debug, Clone)]
struct PendingWork {
    id: WorkId,
    line: String,
}

impl PendingWork {
    fn of(work: &WorkUnit) -> Self {
        PendingWork {
            id: work.id,
            line: work.to_backend_line(),
        }
    }
}

/// One running backend executable
pub struct BackendProcess {
    label: String,
    child: Child,
    work: watch::Sender<PendingWork>,
    writer: Option<JoinHandle<()>>,
    feeds_work: bool,
    readers: Vec<JoinHandle<()>>,
}

impl BackendProcess {
    /// Spawns the backend and hands it its first work unit
    ///
    /// # Returns
    /// The process and the receiving end of its event channel
    ///
    /// # Errors
    /// Returns `BackendError` if the flags are invalid or the executable
    /// cannot be started
    pub async fn start(
        command: &BackendCommand,
        config: &SessionConfig,
        work: &WorkUnit,
        watchdog: Duration,
    ) -> Result<(Self, mpsc::Receiver<BackendEvent>), BackendError> {
        let args = build_args(config)?;
        let executable = command.executable.display().to_string();

        let mut cmd = Command::new(&command.executable);
        cmd.args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        // On Windows, prevent console window from appearing
        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = cmd.spawn().map_err(|source| BackendError::Spawn {
            executable: executable.clone(),
            source,
        })?;
        let label = format!("{}[{}]", config.name, child.id().unwrap_or_default());
        log::info!("{}: started {} for {}:{}", label, executable, config.effective_host(), config.port);

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(watch_output(
                stdout,
                tx.clone(),
                watchdog,
                label.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_stderr(stderr, tx, label.clone())));
        }

        // The receiver starts out unseen, so the writer hands over the
        // initial unit right away.
        let (work_tx, mut work_rx) = watch::channel(PendingWork::of(work));
        work_rx.mark_changed();
        let writer = child
            .stdin
            .take()
            .map(|stdin| tokio::spawn(write_work(stdin, work_rx, label.clone())));

        let process = BackendProcess {
            label,
            child,
            work: work_tx,
            writer,
            feeds_work: command.feeds_work,
            readers,
        };
        Ok((process, rx))
    }
}

#[async_trait]
impl BackendHandle for BackendProcess {
    async fn feed(&mut self, work: &WorkUnit) -> Result<(), BackendError> {
        if !self.feeds_work {
            return Err(BackendError::FeedUnsupported);
        }
        if self.work.is_closed() {
            return Err(BackendError::Crashed("stdin closed".into()));
        }
        // Replaces a unit the writer has not picked up yet.
        self.work.send_replace(PendingWork::of(work));
        Ok(())
    }

    async fn stop(&mut self, grace: Duration) {
        // Aborting the writer drops stdin even mid-write; EOF is the
        // backend's cue to exit.
        if let Some(writer) = self.writer.take() {
            writer.abort();
            let _ = writer.await;
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => log::info!("{}: exited with {}", self.label, status),
            Ok(Err(e)) => log::warn!("{}: wait failed: {}", self.label, e),
            Err(_) => {
                log::warn!(
                    "{}: still running after {:?}, killing",
                    self.label,
                    grace
                );
                if let Err(e) = self.child.kill().await {
                    log::error!("{}: kill failed: {}", self.label, e);
                }
            }
        }

        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }
}

/// Writes the newest pending unit to stdin until the process or the
/// handle goes away
async fn write_work(mut stdin: ChildStdin, mut work: watch::Receiver<PendingWork>, label: String) {
    while work.changed().await.is_ok() {
        let pending = work.borrow_and_update().clone();
        let written = async {
            stdin.write_all(pending.line.as_bytes()).await?;
            stdin.flush().await
        };
        if let Err(e) = written.await {
            // A backend that died is reported through its output stream.
            log::warn!("{}: could not hand over work {}: {}", label, pending.id, e);
            return;
        }
        log::debug!("{}: fed work {}", label, pending.id);
    }
}

/// Reads stdout until it closes or the watchdog fires
///
/// Only activity events rearm the watchdog; a backend that prints nothing
/// but error text is as hung as a silent one. Output is decoded lossily,
/// so stray non-UTF-8 bytes end up in status text rather than ending the
/// stream.
async fn watch_output(
    stdout: ChildStdout,
    events: mpsc::Sender<BackendEvent>,
    watchdog: Duration,
    label: String,
) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    let mut parser = OutputParser::new();
    let mut deadline = Instant::now() + watchdog;

    let termination = loop {
        buf.clear();
        match tokio::time::timeout_at(deadline, reader.read_until(b'\n', &mut buf)).await {
            Err(_) => break Termination::Silent(watchdog),
            Ok(Ok(0)) => break Termination::Exited,
            Ok(Err(e)) => break Termination::ReadError(e.to_string()),
            Ok(Ok(_)) => {
                let line = String::from_utf8_lossy(&buf);
                let Some(event) = parser.parse(&line) else {
                    continue;
                };
                if event.is_activity() {
                    deadline = Instant::now() + watchdog;
                } else {
                    log::debug!("{}: {}", label, line.trim());
                }
                if events.send(event).await.is_err() {
                    return;
                }
            }
        }
    };

    log::debug!("{}: output ended: {}", label, termination);
    let _ = events.send(BackendEvent::Terminated(termination)).await;
}

async fn forward_stderr(stderr: ChildStderr, events: mpsc::Sender<BackendEvent>, label: String) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    while matches!(reader.read_until(b'\n', &mut buf).await, Ok(n) if n > 0) {
        let line = String::from_utf8_lossy(&buf).trim().to_string();
        buf.clear();
        if line.is_empty() {
            continue;
        }
        log::debug!("{} stderr: {}", label, line);
        if events.send(BackendEvent::Status(line)).await.is_err() {
            break;
        }
    }
}
