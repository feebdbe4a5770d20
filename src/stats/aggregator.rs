// src/stats/aggregator.rs
use crate::miner::output::ProgressSample;
use crate::miner::work::ShareOutcome;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Default half-life of the hash-rate average
pub const DEFAULT_HALF_LIFE: Duration = Duration::from_secs(30);

/// Connection state shown to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not mining
    Disconnected,
    /// Waiting for the first work unit
    Connecting,
    /// Backend running on live work
    Mining,
    /// Work source unreachable; backend keeps its last unit
    Reconnecting,
    /// Gave up; needs an explicit start
    Failed,
}

/// Statistics of one session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    /// Decayed moving average in hashes per second
    pub hash_rate: f64,
    /// Shares the server credited
    pub accepted: u64,
    /// Shares that were stale, invalid or duplicate
    pub stale: u64,
    /// Difficulty-1 hashes checked in solo mode
    pub diff1_checks: u64,
    /// Hashes reported since the session started
    pub total_hashes: u64,
    /// Wall-clock time of the last share outcome
    pub last_share_at: Option<SystemTime>,
    /// Connection phase of the session
    pub connection: ConnectionState,
}

impl Default for SessionStats {
    fn default() -> Self {
        SessionStats {
            hash_rate: 0.0,
            accepted: 0,
            stale: 0,
            diff1_checks: 0,
            total_hashes: 0,
            last_share_at: None,
            connection: ConnectionState::Disconnected,
        }
    }
}

struct RateState {
    stats: SessionStats,
    last_sample: Instant,
    pending_hashes: u64,
    seeded: bool,
}

impl RateState {
    fn fresh(connection: ConnectionState) -> Self {
        RateState {
            stats: SessionStats {
                connection,
                ..SessionStats::default()
            },
            last_sample: Instant::now(),
            pending_hashes: 0,
            seeded: false,
        }
    }
}

/// Single point of mutation for a session's statistics
///
/// Updates are serialized by a lock; every update publishes a fresh
/// immutable snapshot, so readers never wait on writers.
pub struct RateAggregator {
    half_life: Duration,
    state: Mutex<RateState>,
    published: ArcSwap<SessionStats>,
}

impl Default for RateAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_HALF_LIFE)
    }
}

impl RateAggregator {
    /// Creates an aggregator whose rate halves its weight every `half_life`
    pub fn new(half_life: Duration) -> Self {
        let state = RateState::fresh(ConnectionState::Disconnected);
        RateAggregator {
            half_life: half_life.max(Duration::from_millis(1)),
            published: ArcSwap::from_pointee(state.stats.clone()),
            state: Mutex::new(state),
        }
    }

    /// Current statistics; never blocks
    pub fn snapshot(&self) -> SessionStats {
        (**self.published.load()).clone()
    }

    /// Folds a hash-count sample into the moving average
    ///
    /// The first sample seeds the average directly. Samples with no time
    /// elapsed since the previous one are carried into the next sample.
    pub fn observe_progress(&self, sample: ProgressSample) {
        self.update(|state, half_life| {
            state.stats.total_hashes = state.stats.total_hashes.saturating_add(sample.hashes);

            let elapsed = sample.at.saturating_duration_since(state.last_sample);
            if elapsed.is_zero() {
                state.pending_hashes = state.pending_hashes.saturating_add(sample.hashes);
                return;
            }

            let hashes = sample.hashes.saturating_add(state.pending_hashes);
            state.pending_hashes = 0;
            state.last_sample = sample.at;

            let instant_rate = hashes as f64 / elapsed.as_secs_f64();
            if state.seeded {
                let weight = 1.0 - 0.5f64.powf(elapsed.as_secs_f64() / half_life.as_secs_f64());
                state.stats.hash_rate += weight * (instant_rate - state.stats.hash_rate);
            } else {
                state.stats.hash_rate = instant_rate;
                state.seeded = true;
            }
        });
    }

    /// Counts a share outcome
    pub fn observe_outcome(&self, outcome: ShareOutcome) {
        self.update(|state, _| {
            if outcome.is_accepted() {
                state.stats.accepted += 1;
            } else {
                state.stats.stale += 1;
            }
            state.stats.last_share_at = Some(SystemTime::now());
        });
    }

    /// Counts a difficulty-1 check reported in solo mode
    pub fn observe_solo_check(&self) {
        self.update(|state, _| state.stats.diff1_checks += 1);
    }

    /// Records the connection phase shown in snapshots
    pub fn set_connection(&self, connection: ConnectionState) {
        self.update(|state, _| state.stats.connection = connection);
    }

    /// Zeroes every counter and restarts the rate clock
    pub fn reset(&self, connection: ConnectionState) {
        self.update(|state, _| *state = RateState::fresh(connection));
    }

    fn update(&self, apply: impl FnOnce(&mut RateState, Duration)) {
        let mut state = self.state.lock();
        apply(&mut state, self.half_life);
        self.published.store(Arc::new(state.stats.clone()));
    }
}
