//! Temporal vocabulary
//!
//! This module provides:
//! - `Timestamp` - logical commit time, `MAX_TIMESTAMP` reserved as "open/eternal"
//! - `Period` - half-open validity range `[lower, upper)`
//! - `QualifiedKey` / `TemporalKey` - a cell and one version of a cell
//! - `Clock` - source of commit timestamps (wall-clock or logical)
//!
//! These are pure value types. Ordering of `TemporalKey` is key-first, then
//! timestamp, which is the order the matrix stores versions in.

mod clock;
mod key;
mod period;

pub use clock::{Clock, ClockKind, LogicalClock, WallClock};
pub use key::{QualifiedKey, TemporalKey};
pub use period::Period;

/// A logical commit timestamp.
pub type Timestamp = u64;

/// Sentinel for "open-ended"; never a real commit timestamp.
pub const MAX_TIMESTAMP: Timestamp = u64::MAX;
