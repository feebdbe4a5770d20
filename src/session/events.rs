// src/session/events.rs
//! Observer-facing session types and event fan-out
//!
//! Sessions publish through an [`EventBus`]. Each subscriber gets its own
//! bounded channel; a subscriber that falls behind loses events instead of
//! stalling the session that emitted them.

use crate::stats::{ConnectionState, SessionStats};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Default per-subscriber buffer
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Identifier of a session, unique for the lifetime of its manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a worker session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Created, never started
    Idle,
    /// Waiting for the first work unit
    Connecting,
    /// Backend hashing live work
    Mining,
    /// Work source unreachable; backend keeps hashing its last unit
    Reconnecting,
    /// Stopped on request
    Stopped,
    /// Gave up; `start` retries from scratch
    Failed {
        /// Human-readable cause
        reason: String,
    },
}

impl SessionState {
    /// Whether the session has a mining run in progress
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Mining | SessionState::Reconnecting
        )
    }

    /// Connection state reported in statistics
    pub fn connection(&self) -> ConnectionState {
        match self {
            SessionState::Idle | SessionState::Stopped => ConnectionState::Disconnected,
            SessionState::Connecting => ConnectionState::Connecting,
            SessionState::Mining => ConnectionState::Mining,
            SessionState::Reconnecting => ConnectionState::Reconnecting,
            SessionState::Failed { .. } => ConnectionState::Failed,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Mining => write!(f, "mining"),
            SessionState::Reconnecting => write!(f, "reconnecting"),
            SessionState::Stopped => write!(f, "stopped"),
            SessionState::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// Something observers may want to show
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SessionEventKind {
    /// The session changed state
    State(SessionState),
    /// Fresh statistics snapshot
    Stats(SessionStats),
    /// A work fetch failed and will be retried
    Retrying {
        /// Consecutive failures so far
        attempt: u32,
        /// Wait before the next fetch
        delay: Duration,
        /// Why the fetch failed
        reason: String,
    },
    /// The backend crashed and was relaunched on the last work unit
    BackendRestarted {
        /// Relaunches since the crash budget last reset
        restarts: u32,
        /// Why the previous backend ended
        reason: String,
    },
    /// Unrecognised backend output, usually an error message
    Status(String),
    /// The session was removed from its manager
    Removed,
}

/// Event tagged with the session that emitted it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionEvent {
    /// Session the event belongs to
    pub session: SessionId,
    /// What happened
    pub kind: SessionEventKind,
}

/// Fans session events out to subscribers without blocking
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<SessionEvent>>>,
    buffer: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

impl EventBus {
    /// Bus whose subscribers each buffer up to `buffer` events
    pub fn new(buffer: usize) -> Self {
        EventBus {
            subscribers: Mutex::new(Vec::new()),
            buffer: buffer.max(1),
        }
    }

    /// Registers a subscriber; dropping the receiver unsubscribes
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = crossbeam_channel::bounded(self.buffer);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Delivers `event` to every subscriber with room for it
    pub fn publish(&self, session: SessionId, kind: SessionEventKind) {
        let event = SessionEvent { session, kind };
        self.subscribers
            .lock()
            .retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    log::trace!("Observer lagging, dropped event for {}", session);
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            });
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_receives_events() {
        let bus = EventBus::default();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.publish(SessionId(1), SessionEventKind::State(SessionState::Mining));
        for rx in [a, b] {
            let event = rx.try_recv().unwrap();
            assert_eq!(event.session, SessionId(1));
            assert_eq!(event.kind, SessionEventKind::State(SessionState::Mining));
        }
    }

    #[test]
    fn full_subscriber_does_not_block_publisher() {
        let bus = EventBus::new(2);
        let slow = bus.subscribe();
        for _ in 0..10 {
            bus.publish(SessionId(1), SessionEventKind::Status("x".into()));
        }
        assert_eq!(slow.len(), 2);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::default();
        let rx = bus.subscribe();
        drop(rx);
        bus.publish(SessionId(1), SessionEventKind::Removed);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn state_maps_to_connection() {
        assert_eq!(SessionState::Idle.connection(), ConnectionState::Disconnected);
        assert_eq!(
            SessionState::Failed { reason: "x".into() }.connection(),
            ConnectionState::Failed
        );
        assert!(SessionState::Reconnecting.is_running());
        assert!(!SessionState::Stopped.is_running());
    }
}
