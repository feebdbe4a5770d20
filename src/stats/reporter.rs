// src/stats/reporter.rs
use crate::session::{SessionEvent, SessionEventKind, SessionId};
use crate::stats::aggregator::{ConnectionState, SessionStats};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::collections::BTreeMap;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Formats a hash rate the way miners print it
///
/// A zero rate reads "Connected": the session is up but nothing has been
/// measured yet.
pub fn format_hash_rate(hashes_per_sec: f64) -> String {
    if hashes_per_sec <= 0.0 {
        return "Connected".to_string();
    }
    if hashes_per_sec >= 1e9 {
        format!("{:.2} Ghash/s", hashes_per_sec / 1e9)
    } else if hashes_per_sec >= 1e6 {
        format!("{:.2} Mhash/s", hashes_per_sec / 1e6)
    } else {
        format!("{:.2} khash/s", hashes_per_sec / 1e3)
    }
}

/// One log line summarising a session
pub fn summary_line(session: SessionId, stats: &SessionStats) -> String {
    let rate = match stats.connection {
        ConnectionState::Mining | ConnectionState::Reconnecting => format_hash_rate(stats.hash_rate),
        other => format!("{:?}", other),
    };
    let mut line = format!(
        "Session {}: {} | Accepted/Stale: {}/{}",
        session, rate, stats.accepted, stats.stale
    );
    if stats.diff1_checks > 0 {
        line.push_str(&format!(" | Diff-1 checks: {}", stats.diff1_checks));
    }
    line
}

/// Logs session events and periodic per-session summaries
///
/// Runs on its own thread and drains a subscriber channel, so slow log
/// output never holds up a session.
pub struct EventReporter {
    events: Receiver<SessionEvent>,
    report_interval: Duration,
    latest: BTreeMap<SessionId, SessionStats>,
}

impl EventReporter {
    /// Creates a reporter for a subscriber channel
    ///
    /// # Arguments
    /// * `events` - Channel from `SessionManager::subscribe`
    /// * `report_interval` - How often to log per-session summaries
    pub fn new(events: Receiver<SessionEvent>, report_interval: Duration) -> Self {
        EventReporter {
            events,
            report_interval,
            latest: BTreeMap::new(),
        }
    }

    /// Starts reporting on a background thread
    ///
    /// The thread ends when every sender of the channel is gone.
    pub fn start(self) -> JoinHandle<()> {
        std::thread::spawn(move || self.run())
    }

    fn run(mut self) {
        let mut next_report = Instant::now() + self.report_interval;
        loop {
            let wait = next_report.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(wait) {
                Ok(event) => self.record(event),
                Err(RecvTimeoutError::Timeout) => {
                    self.report();
                    next_report = Instant::now() + self.report_interval;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn record(&mut self, event: SessionEvent) {
        let id = event.session;
        match event.kind {
            SessionEventKind::Stats(stats) => {
                self.latest.insert(id, stats);
            }
            SessionEventKind::State(state) => log::info!("Session {} is {}", id, state),
            SessionEventKind::Retrying {
                attempt,
                delay,
                reason,
            } => log::warn!(
                "Session {}: retry {} in {:.1}s ({})",
                id,
                attempt,
                delay.as_secs_f64(),
                reason
            ),
            SessionEventKind::BackendRestarted { restarts, reason } => {
                log::warn!("Session {}: backend restarted ({}): {}", id, restarts, reason)
            }
            SessionEventKind::Status(text) => log::info!("Session {}: {}", id, text),
            SessionEventKind::Removed => {
                self.latest.remove(&id);
            }
        }
    }

    fn report(&self) {
        for (id, stats) in &self.latest {
            if stats.connection != ConnectionState::Disconnected {
                log::info!("{}", summary_line(*id, stats));
            }
        }
    }
}
