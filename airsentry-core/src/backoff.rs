//! Jittered exponential backoff
//!
//! Nominal delay for failure `k` (0-indexed) is `min(cap, base * 2^k)`. The
//! actual sleep is drawn uniformly from `[0, nominal]` so a fleet that loses
//! the broker at the same moment does not reconnect in lockstep.
//!
//! ```text
//! attempt:   1      2      3      4      5
//! nominal:   500ms  1s     2s     4s     (exhausted)
//! sleep:     U[0,n] U[0,n] U[0,n] U[0,n]
//! ```

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::duration_ms;

/// Backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Nominal delay after the first failure
    #[serde(with = "duration_ms")]
    pub base_delay: Duration,
    /// Upper bound of any nominal delay
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    /// Attempts allowed, including the first
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(5000),
            max_attempts: 5,
        }
    }
}

impl BackoffConfig {
    /// Pre-jitter delay after failure `k` (0-indexed)
    pub fn nominal_delay(&self, k: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let factor = 1u64.checked_shl(k).unwrap_or(u64::MAX);
        let scaled = base.saturating_mul(factor);
        Duration::from_millis(scaled).min(self.max_delay)
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStatus {
    /// Sleep this long, then try again
    Retry(Duration),
    /// No attempts left
    Exhausted,
}

/// Attempt counter for one connection sequence
///
/// Created fresh for each sequence and dropped when it ends.
#[derive(Debug, Clone)]
pub struct BackoffState {
    config: BackoffConfig,
    failures: u32,
}

impl BackoffState {
    /// Fresh state, no failures recorded
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, failures: 0 }
    }

    /// Failed attempts so far
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a failed attempt and pick the next delay
    pub fn next_backoff<R: Rng + ?Sized>(&mut self, rng: &mut R) -> BackoffStatus {
        self.failures = self.failures.saturating_add(1);
        if self.failures >= self.config.max_attempts {
            return BackoffStatus::Exhausted;
        }

        let nominal = self.config.nominal_delay(self.failures - 1);
        let jittered = rng.gen_range(0..=nominal.as_millis() as u64);
        BackoffStatus::Retry(Duration::from_millis(jittered))
    }
}
