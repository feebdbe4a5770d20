// src/utils/backoff.rs
//! Exponential retry delays
//!
//! Delays double from an initial value up to a cap. Jitter is added on top
//! of the exponential step, but the sequence never shrinks and never exceeds
//! the cap, so callers can reason about worst-case reconnect latency.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with bounded, non-decreasing jittered delays
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    jitter: f64,
    attempt: u32,
    last: Duration,
}

impl Backoff {
    /// Creates a backoff starting at `initial`, capped at `max`
    ///
    /// `jitter` is the maximum fraction added to each step (0.2 = up to +20%).
    pub fn new(initial: Duration, max: Duration, jitter: f64) -> Self {
        Backoff {
            initial,
            max: max.max(initial),
            jitter: jitter.clamp(0.0, 1.0),
            attempt: 0,
            last: Duration::ZERO,
        }
    }

    /// Number of delays handed out since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Returns the next delay and advances the sequence
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.attempt.min(31);
        let step = self.initial.saturating_mul(1u32 << exp).min(self.max);

        let jittered = if self.jitter > 0.0 {
            let factor = 1.0 + rand::thread_rng().gen_range(0.0..=self.jitter);
            step.mul_f64(factor)
        } else {
            step
        };

        let delay = jittered.max(self.last).min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        self.last = delay;
        delay
    }

    /// Starts over from the initial delay
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.last = Duration::ZERO;
    }
}
