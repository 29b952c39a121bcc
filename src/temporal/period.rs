//! Period - half-open validity range

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Timestamp, MAX_TIMESTAMP};
use crate::error::{ChronoError, ChronoResult};

/// A half-open timestamp range `[lower, upper)`.
///
/// `upper == MAX_TIMESTAMP` denotes an open-ended period. The empty period is
/// `[0, 0)`. Apart from `empty()`, a period always satisfies `lower < upper`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    lower: Timestamp,
    upper: Timestamp,
}

impl Period {
    /// Creates `[lower, upper)`. Rejects `lower >= upper`.
    pub fn new(lower: Timestamp, upper: Timestamp) -> ChronoResult<Self> {
        if lower >= upper {
            return Err(ChronoError::precondition(format!(
                "period lower bound {} must be less than upper bound {}",
                lower, upper
            )));
        }
        Ok(Self { lower, upper })
    }

    /// The empty period `[0, 0)`
    pub const fn empty() -> Self {
        Self { lower: 0, upper: 0 }
    }

    /// `[0, MAX)`
    pub const fn eternal() -> Self {
        Self {
            lower: 0,
            upper: MAX_TIMESTAMP,
        }
    }

    /// `[timestamp, timestamp + 1)`
    pub fn point(timestamp: Timestamp) -> ChronoResult<Self> {
        if timestamp >= MAX_TIMESTAMP {
            return Err(ChronoError::precondition(
                "cannot create a point period at the open-ended sentinel",
            ));
        }
        Ok(Self {
            lower: timestamp,
            upper: timestamp + 1,
        })
    }

    /// `[lower, MAX)`
    pub fn open_ended_from(lower: Timestamp) -> ChronoResult<Self> {
        Self::new(lower, MAX_TIMESTAMP)
    }

    /// Inclusive lower bound
    #[inline]
    pub fn lower_bound(&self) -> Timestamp {
        self.lower
    }

    /// Exclusive upper bound
    #[inline]
    pub fn upper_bound(&self) -> Timestamp {
        self.upper
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lower >= self.upper
    }

    #[inline]
    pub fn is_open_ended(&self) -> bool {
        !self.is_empty() && self.upper == MAX_TIMESTAMP
    }

    /// Returns true if `timestamp` lies in `[lower, upper)`
    #[inline]
    pub fn contains(&self, timestamp: Timestamp) -> bool {
        self.lower <= timestamp && timestamp < self.upper
    }

    pub fn overlaps(&self, other: &Period) -> bool {
        !self.is_empty() && !other.is_empty() && self.lower < other.upper && other.lower < self.upper
    }

    /// Number of timestamps covered
    pub fn length(&self) -> u64 {
        self.upper.saturating_sub(self.lower)
    }

    /// Same lower bound, different upper bound
    pub fn with_upper_bound(&self, upper: Timestamp) -> ChronoResult<Self> {
        Self::new(self.lower, upper)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "[]");
        }
        if self.upper == MAX_TIMESTAMP {
            write!(f, "[{}; MAX)", self.lower)
        } else {
            write!(f, "[{}; {})", self.lower, self.upper)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_inverted_bounds() {
        assert!(Period::new(5, 5).is_err());
        assert!(Period::new(6, 5).is_err());
        assert!(Period::new(5, 6).is_ok());
    }

    #[test]
    fn test_contains_is_half_open() {
        let p = Period::new(10, 20).unwrap();
        assert!(!p.contains(9));
        assert!(p.contains(10));
        assert!(p.contains(19));
        assert!(!p.contains(20));
    }

    #[test]
    fn test_empty_contains_nothing() {
        let p = Period::empty();
        assert!(p.is_empty());
        assert!(!p.contains(0));
        assert!(!p.is_open_ended());
    }

    #[test]
    fn test_eternal_and_open_ended() {
        assert!(Period::eternal().contains(0));
        assert!(Period::eternal().is_open_ended());
        let p = Period::open_ended_from(42).unwrap();
        assert!(p.contains(u64::MAX - 1));
        assert!(!p.contains(41));
    }

    #[test]
    fn test_point() {
        let p = Period::point(7).unwrap();
        assert_eq!(p.length(), 1);
        assert!(p.contains(7));
        assert!(Period::point(MAX_TIMESTAMP).is_err());
    }

    #[test]
    fn test_overlaps() {
        let a = Period::new(0, 10).unwrap();
        let b = Period::new(10, 20).unwrap();
        let c = Period::new(5, 15).unwrap();
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));
    }

    #[test]
    fn test_display() {
        assert_eq!(Period::new(1, 3).unwrap().to_string(), "[1; 3)");
        assert_eq!(Period::open_ended_from(1).unwrap().to_string(), "[1; MAX)");
    }
}
