// src/miner/work.rs
//! Work units, results and the per-session work book
//!
//! A [`WorkUnit`] is one `getwork` assignment. The [`WorkBook`] decides
//! which unit is live: a newer unit always supersedes the live one, the
//! just-superseded unit is kept so late solutions for it can still be
//! submitted, and anything older is dropped.

use crate::utils::error::PoolError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Identifier of a work unit within one pool client
///
/// `getwork` carries no identifier, so the client numbers units in the
/// order their responses arrive. Higher means newer.
pub type WorkId = u64;

/// Byte offset of the nonce inside the block header template
pub const NONCE_OFFSET: usize = 76;

/// Minimum header length: version through nonce
pub const HEADER_LEN: usize = 80;

/// Length of a `getwork` target
pub const TARGET_LEN: usize = 32;

/// Which request delivered a work unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOrigin {
    /// Fixed-interval `getwork`
    Poll,
    /// Held-open long-poll request
    LongPoll,
}

/// One proof-of-work assignment
#[derive(Debug, Clone)]
pub struct WorkUnit {
    /// Arrival-ordered identifier
    pub id: WorkId,
    /// Block header template (`getwork` data field)
    pub data: Vec<u8>,
    /// Share target
    pub target: Vec<u8>,
    /// Request path that delivered it
    pub origin: WorkOrigin,
    /// When the response arrived
    pub received_at: Instant,
}

impl WorkUnit {
    /// Builds a unit, checking the header and target sizes
    pub fn new(
        id: WorkId,
        data: Vec<u8>,
        target: Vec<u8>,
        origin: WorkOrigin,
    ) -> Result<Self, PoolError> {
        if data.len() < HEADER_LEN {
            return Err(PoolError::Protocol(format!(
                "work data is {} bytes, expected at least {}",
                data.len(),
                HEADER_LEN
            )));
        }
        if target.len() != TARGET_LEN {
            return Err(PoolError::Protocol(format!(
                "work target is {} bytes, expected {}",
                target.len(),
                TARGET_LEN
            )));
        }
        Ok(WorkUnit {
            id,
            data,
            target,
            origin,
            received_at: Instant::now(),
        })
    }

    /// Whether two units describe the same assignment
    pub fn same_work(&self, other: &WorkUnit) -> bool {
        self.data == other.data && self.target == other.target
    }

    /// Header template with `nonce` written into the nonce slot
    pub fn solved_data(&self, nonce: [u8; 4]) -> Vec<u8> {
        let mut data = self.data.clone();
        data[NONCE_OFFSET..NONCE_OFFSET + 4].copy_from_slice(&nonce);
        data
    }

    /// Line handed to a backend on stdin
    pub fn to_backend_line(&self) -> String {
        format!(
            "work {} {} {}\n",
            self.id,
            hex::encode(&self.data),
            hex::encode(&self.target)
        )
    }
}

/// Candidate solution reported by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkResult {
    /// Unit the nonce was found for
    pub work_id: WorkId,
    /// Nonce bytes in header order
    pub nonce: [u8; 4],
}

/// Server verdict on a submitted share
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareOutcome {
    /// Credited
    Accepted,
    /// Found for work that was already superseded
    Stale,
    /// Did not meet the target or was otherwise malformed
    Invalid,
    /// Already submitted before
    Duplicate,
}

impl ShareOutcome {
    /// Whether the pool credited the share
    pub fn is_accepted(&self) -> bool {
        matches!(self, ShareOutcome::Accepted)
    }
}

/// Result of offering a freshly fetched unit to the book
#[derive(Debug, Clone)]
pub enum Offer {
    /// The unit is now live and must be fed to the backend
    Fresh(Arc<WorkUnit>),
    /// Same assignment as the live unit; nothing to feed
    Unchanged,
    /// An equal or newer unit is already live
    Outdated,
}

/// Where a solution's unit stands
#[derive(Debug, Clone)]
pub enum Resolved {
    /// The live unit
    Live(Arc<WorkUnit>),
    /// The unit replaced by the live one; still worth submitting
    Superseded(Arc<WorkUnit>),
    /// Too old or unknown; account as stale without submitting
    Stale,
}

/// Tracks the live and just-superseded work units of one session
#[derive(Debug)]
pub struct WorkBook {
    current: Option<Arc<WorkUnit>>,
    previous: Option<Arc<WorkUnit>>,
    refreshed_at: Option<Instant>,
    ttl: Duration,
}

impl WorkBook {
    /// Empty book; units expire after `ttl` without a refresh
    pub fn new(ttl: Duration) -> Self {
        WorkBook {
            current: None,
            previous: None,
            refreshed_at: None,
            ttl,
        }
    }

    /// The live unit, if any
    pub fn current(&self) -> Option<Arc<WorkUnit>> {
        self.current.clone()
    }

    /// Offers a unit; newest identifier wins regardless of arrival path
    pub fn offer(&mut self, unit: WorkUnit) -> Offer {
        if let Some(current) = &self.current {
            if unit.id <= current.id {
                return Offer::Outdated;
            }
            if unit.same_work(current) {
                // Still valid according to the server.
                self.refreshed_at = Some(unit.received_at);
                return Offer::Unchanged;
            }
        }

        let unit = Arc::new(unit);
        self.refreshed_at = Some(unit.received_at);
        self.previous = self.current.replace(unit.clone());
        Offer::Fresh(unit)
    }

    /// Whether the live unit outlived its time-to-live without a refresh
    pub fn is_expired(&self) -> bool {
        self.refreshed_at
            .map(|at| at.elapsed() > self.ttl)
            .unwrap_or(false)
    }

    /// Finds the unit a solution belongs to
    pub fn resolve(&self, work_id: WorkId) -> Resolved {
        match (&self.current, &self.previous) {
            (Some(current), _) if current.id == work_id => {
                if self.is_expired() {
                    Resolved::Stale
                } else {
                    Resolved::Live(current.clone())
                }
            }
            (_, Some(previous)) if previous.id == work_id => {
                if previous.received_at.elapsed() > self.ttl {
                    Resolved::Stale
                } else {
                    Resolved::Superseded(previous.clone())
                }
            }
            _ => Resolved::Stale,
        }
    }
}
