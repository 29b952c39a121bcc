//! Commit timestamp sources

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{Timestamp, MAX_TIMESTAMP};

/// Source of candidate commit timestamps.
///
/// The commit coordinator never uses the value directly: it takes
/// `max(clock.current(), floor + 1)` so timestamps stay strictly increasing
/// per branch even if the clock stalls or goes backwards.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns a candidate timestamp
    fn current(&self) -> Timestamp;

    /// Picks the next commit timestamp strictly after `floor`.
    fn next_after(&self, floor: Timestamp) -> Timestamp {
        let candidate = self.current();
        let minimum = floor.saturating_add(1);
        candidate.max(minimum).min(MAX_TIMESTAMP - 1)
    }
}

/// Milliseconds since the Unix epoch.
#[derive(Debug, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn current(&self) -> Timestamp {
        Utc::now().timestamp_millis().max(0) as Timestamp
    }
}

/// Deterministic counter. Every call returns a larger value.
#[derive(Debug, Default)]
pub struct LogicalClock {
    counter: AtomicU64,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts counting after `value`
    pub fn starting_after(value: Timestamp) -> Self {
        Self {
            counter: AtomicU64::new(value),
        }
    }
}

impl Clock for LogicalClock {
    fn current(&self) -> Timestamp {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Clock selection in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockKind {
    #[default]
    Wall,
    Logical,
}

impl ClockKind {
    /// Builds the configured clock
    pub fn build(self) -> Box<dyn Clock> {
        match self {
            ClockKind::Wall => Box::new(WallClock),
            ClockKind::Logical => Box::new(LogicalClock::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_clock_increases() {
        let clock = LogicalClock::new();
        let a = clock.current();
        let b = clock.current();
        assert!(b > a);
    }

    #[test]
    fn test_next_after_respects_floor() {
        let clock = LogicalClock::new();
        assert_eq!(clock.next_after(100), 101);
    }

    #[test]
    fn test_next_after_never_reaches_sentinel() {
        let clock = LogicalClock::new();
        assert_eq!(clock.next_after(MAX_TIMESTAMP - 1), MAX_TIMESTAMP - 1);
    }

    #[test]
    fn test_wall_clock_is_after_epoch() {
        assert!(WallClock.current() > 1_500_000_000_000);
    }
}
