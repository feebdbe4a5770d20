//! Mining sessions and their manager
//!
//! A session binds one backend process, one pool client and one rate
//! aggregator under a single configuration. The [`SessionManager`] is the
//! only entry point for presentation layers:
//! - create, start, stop and remove sessions by [`SessionId`]
//! - subscribe to [`SessionEvent`]s from all sessions
//! - read [`SessionStats`](crate::stats::SessionStats) snapshots

/// Session identifiers, states and the event bus
pub mod events;

/// Per-session task running the state machine
pub mod worker;

/// Session registry
pub mod manager;

pub use events::{EventBus, SessionEvent, SessionEventKind, SessionId, SessionState};
pub use manager::{ProcessFactory, SessionManager};
pub use worker::{SessionFactory, SessionParts};
