//! Cycle clock
//!
//! The device has no wall clock worth trusting after a deep sleep, so every
//! cycle is timed from its own boot:
//! - Monotonic source (tokio's clock, pausable in tests)
//! - Fixed source for deterministic tests
//!
//! [`CycleTimer`] stamps each phase transition against one of these.

use std::time::Duration;

use crate::scheduler::CyclePhase;

/// Milliseconds since the cycle booted
pub type Timestamp = u64;

/// Source of time for the cycle
pub trait TimeSource: Send {
    /// Current timestamp in milliseconds
    fn now(&self) -> Timestamp;
}

/// Milliseconds elapsed since construction
#[derive(Debug, Clone)]
pub struct MonotonicTime {
    start: tokio::time::Instant,
}

impl MonotonicTime {
    /// Starts at zero now
    pub fn new() -> Self {
        Self {
            start: tokio::time::Instant::now(),
        }
    }
}

impl Default for MonotonicTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicTime {
    fn now(&self) -> Timestamp {
        self.start.elapsed().as_millis() as Timestamp
    }
}

/// Fixed time source for testing
#[derive(Debug, Clone)]
pub struct FixedTime {
    timestamp: Timestamp,
}

impl FixedTime {
    /// Frozen at `timestamp`
    pub fn new(timestamp: Timestamp) -> Self {
        Self { timestamp }
    }

    /// Move forward by `ms`
    pub fn advance(&mut self, ms: u64) {
        self.timestamp += ms;
    }
}

impl TimeSource for FixedTime {
    fn now(&self) -> Timestamp {
        self.timestamp
    }
}

/// Phase transitions of one cycle, in order
pub struct CycleTimer {
    source: Box<dyn TimeSource>,
    marks: Vec<(CyclePhase, Timestamp)>,
}

impl CycleTimer {
    /// Timer reading `source`
    pub fn new(source: Box<dyn TimeSource>) -> Self {
        Self {
            source,
            marks: Vec::with_capacity(6),
        }
    }

    /// Record entry into `phase`
    pub fn enter(&mut self, phase: CyclePhase) -> Timestamp {
        let now = self.source.now();
        log::debug!("t+{}ms: {:?}", now, phase);
        self.marks.push((phase, now));
        now
    }

    /// Phases entered so far
    pub fn phases(&self) -> Vec<CyclePhase> {
        self.marks.iter().map(|(phase, _)| *phase).collect()
    }

    /// Time from the first mark to now
    pub fn elapsed(&self) -> Duration {
        let start = self.marks.first().map_or(0, |(_, t)| *t);
        Duration::from_millis(self.source.now().saturating_sub(start))
    }

    /// Time spent in `phase`, up to the next mark (or now, for the last)
    pub fn time_in(&self, phase: CyclePhase) -> Option<Duration> {
        let index = self.marks.iter().position(|(p, _)| *p == phase)?;
        let entered = self.marks[index].1;
        let left = self.marks.get(index + 1).map_or_else(|| self.source.now(), |(_, t)| *t);
        Some(Duration::from_millis(left.saturating_sub(entered)))
    }
}
