// src/miner/output.rs
//! Backend output parsing
//!
//! Backends print one event per line. Structured lines (`share`, `hashes`)
//! come from backends that let the supervisor submit work; the free-text
//! forms (`accepted`, `stale`, `250 khash/s`, `checking 3`) come from
//! backends that talk to the pool themselves. Anything unrecognised is
//! passed through as status text.

use crate::miner::work::{ShareOutcome, WorkResult};
use lazy_static::lazy_static;
use regex::Regex;
use std::time::{Duration, Instant};

lazy_static! {
    static ref SHARE_RE: Regex =
        Regex::new(r"(?i)^\s*share\s+(\d+)\s+([0-9a-f]{8})\b").unwrap();
    static ref HASHES_RE: Regex = Regex::new(r"(?i)^\s*hashes\s+(\d+)\s*$").unwrap();
    static ref ACCEPTED_RE: Regex = Regex::new(r"(?i)accepted").unwrap();
    static ref STALE_RE: Regex = Regex::new(r"(?i)stale").unwrap();
    static ref INVALID_RE: Regex = Regex::new(r"(?i)invalid").unwrap();
    static ref RATE_RE: Regex =
        Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*([kmg]?)hash/s").unwrap();
    static ref CHECKING_RE: Regex = Regex::new(r"(?i)checking\s+(\d+)").unwrap();
}

/// Hashes completed since the previous sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    /// Hashes in this sample
    pub hashes: u64,
    /// When the sample was taken
    pub at: Instant,
}

/// Why a backend's event stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The output stream closed (process exited)
    Exited,
    /// No progress for the whole watchdog interval
    Silent(Duration),
    /// Reading the output failed
    ReadError(String),
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::Exited => write!(f, "backend exited"),
            Termination::Silent(after) => {
                write!(f, "backend silent for {}s", after.as_secs())
            }
            Termination::ReadError(e) => write!(f, "backend output unreadable: {}", e),
        }
    }
}

/// Structured event produced by a running backend
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// Hash-count delta
    Progress(ProgressSample),
    /// Solution found; the supervisor submits it
    Share(WorkResult),
    /// Verdict reported by a self-submitting backend
    Outcome(ShareOutcome),
    /// Difficulty-1 hash checked against the network target (solo mode)
    SoloCheck,
    /// Unrecognised output, usually an error message
    Status(String),
    /// End of stream; nothing follows
    Terminated(Termination),
}

impl BackendEvent {
    /// Whether the event proves the backend is hashing
    pub fn is_activity(&self) -> bool {
        !matches!(self, BackendEvent::Status(_) | BackendEvent::Terminated(_))
    }
}

/// Turns backend output lines into events
///
/// Rate reports are converted to hash deltas using the time since the
/// previous sample, so downstream averaging only ever sees counts.
#[derive(Debug)]
pub struct OutputParser {
    last_sample: Instant,
}

impl Default for OutputParser {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputParser {
    /// Parser whose first rate report is measured from now
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Parser whose first rate report is measured from `start`
    pub fn starting_at(start: Instant) -> Self {
        OutputParser { last_sample: start }
    }

    /// Parses one line observed now
    pub fn parse(&mut self, line: &str) -> Option<BackendEvent> {
        self.parse_at(line, Instant::now())
    }

    /// Parses one line observed at `now`; blank lines yield nothing
    pub fn parse_at(&mut self, line: &str, now: Instant) -> Option<BackendEvent> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if let Some(caps) = SHARE_RE.captures(line) {
            let mut nonce = [0u8; 4];
            if let (Ok(work_id), Ok(())) = (
                caps[1].parse(),
                hex::decode_to_slice(&caps[2], &mut nonce),
            ) {
                return Some(BackendEvent::Share(WorkResult { work_id, nonce }));
            }
        }

        if let Some(caps) = HASHES_RE.captures(line) {
            if let Ok(hashes) = caps[1].parse() {
                return Some(self.sample(hashes, now));
            }
        }

        if ACCEPTED_RE.is_match(line) {
            return Some(BackendEvent::Outcome(ShareOutcome::Accepted));
        }
        if STALE_RE.is_match(line) {
            return Some(BackendEvent::Outcome(ShareOutcome::Stale));
        }
        if INVALID_RE.is_match(line) {
            return Some(BackendEvent::Outcome(ShareOutcome::Invalid));
        }

        if let Some(caps) = RATE_RE.captures(line) {
            if let Ok(rate) = caps[1].parse::<f64>() {
                let multiplier = match caps[2].to_ascii_lowercase().as_str() {
                    "k" => 1e3,
                    "m" => 1e6,
                    "g" => 1e9,
                    _ => 1.0,
                };
                let elapsed = now.saturating_duration_since(self.last_sample);
                let hashes = (rate * multiplier * elapsed.as_secs_f64()).round() as u64;
                return Some(self.sample(hashes, now));
            }
        }

        if CHECKING_RE.is_match(line) {
            return Some(BackendEvent::SoloCheck);
        }

        Some(BackendEvent::Status(line.to_string()))
    }

    fn sample(&mut self, hashes: u64, now: Instant) -> BackendEvent {
        self.last_sample = now;
        BackendEvent::Progress(ProgressSample { hashes, at: now })
    }
}
