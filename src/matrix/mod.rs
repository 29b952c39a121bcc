//! Temporal data matrix
//!
//! One matrix per keyspace per branch: a versioned map from
//! `(key, timestamp)` to value-or-tombstone.
//!
//! # Layout
//!
//! Two sorted tables per matrix:
//!
//! - forward: `encode(key) ++ timestamp_be -> bytes` (empty bytes = tombstone)
//! - inverse: `timestamp_be ++ encode(key) -> ()`
//!
//! A point read is a two-sided nearest-neighbour lookup on the forward
//! table: the floor version `<= t` supplies the value, the ceiling version
//! `> t` bounds its validity. The inverse table answers "what changed in
//! `[t1, t2)`" and drives rollback.
//!
//! # Tombstones
//!
//! A removal is stored as an explicit zero-length version, never as a
//! missing entry, so history and key-set deltas remain computable. At this
//! layer a tombstone read is a *hit* whose value is `None`.

mod backend_matrix;
mod history;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::ChronoResult;
use crate::temporal::{Period, TemporalKey, Timestamp};

pub use backend_matrix::BackendMatrix;
pub use history::HistoryIter;

/// Outcome of a point-in-time read.
///
/// The period always contains the requested timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct GetResult<T> {
    requested_key: TemporalKey,
    value: Option<T>,
    period: Period,
    hit: bool,
}

impl<T> GetResult<T> {
    /// A stored version was found (possibly a tombstone)
    pub fn hit(requested_key: TemporalKey, value: Option<T>, period: Period) -> Self {
        Self {
            requested_key,
            value,
            period,
            hit: true,
        }
    }

    /// No version at or before the requested timestamp
    pub fn miss(requested_key: TemporalKey, period: Period) -> Self {
        Self {
            requested_key,
            value: None,
            period,
            hit: false,
        }
    }

    pub fn requested_key(&self) -> &TemporalKey {
        &self.requested_key
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }

    /// Validity range of the returned value (or absence)
    pub fn period(&self) -> Period {
        self.period
    }

    pub fn is_hit(&self) -> bool {
        self.hit
    }

    /// Replaces the period, keeping everything else
    pub fn with_period(mut self, period: Period) -> Self {
        self.period = period;
        self
    }

    pub fn map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<GetResult<U>, E> {
        let value = match self.value {
            Some(v) => Some(f(v)?),
            None => None,
        };
        Ok(GetResult {
            requested_key: self.requested_key,
            value,
            period: self.period,
            hit: self.hit,
        })
    }
}

/// Keys classified by their last operation up to some timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySetModifications {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl KeySetModifications {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// One stored version, tombstones included (`value` is empty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixEntry {
    pub key: String,
    pub timestamp: Timestamp,
    pub value: Vec<u8>,
}

impl MatrixEntry {
    pub fn is_tombstone(&self) -> bool {
        self.value.is_empty()
    }
}

/// Operations on one keyspace's version table.
pub trait TemporalMatrix: Send + Sync + fmt::Debug {
    fn keyspace(&self) -> &str;

    /// Point-in-time read.
    fn get(&self, timestamp: Timestamp, key: &str) -> ChronoResult<GetResult<Vec<u8>>>;

    /// Writes one version per key at `timestamp`; `None` stores a tombstone.
    fn put(&self, timestamp: Timestamp, contents: &BTreeMap<String, Option<Vec<u8>>>)
        -> ChronoResult<()>;

    /// Unordered, idempotent bulk load. No per-entry validation.
    fn insert_entries(&self, entries: &[MatrixEntry]) -> ChronoResult<()>;

    /// Versioning timestamps of `key` at or before `max_time`, descending.
    fn history(&self, max_time: Timestamp, key: &str) -> ChronoResult<HistoryIter>;

    /// Added/removed classification of every key as of `timestamp`.
    fn key_set_modifications(&self, timestamp: Timestamp) -> ChronoResult<KeySetModifications>;

    /// Versions written in `[low, high)`, ascending by timestamp.
    fn modifications_between(&self, low: Timestamp, high: Timestamp)
        -> ChronoResult<Vec<TemporalKey>>;

    /// Drops every version after `timestamp`; returns how many were dropped.
    fn rollback(&self, timestamp: Timestamp) -> ChronoResult<usize>;

    /// Every stored version, ascending by timestamp then key.
    fn all_entries(&self) -> ChronoResult<Vec<MatrixEntry>>;

    /// Greatest stored timestamp, if any
    fn last_timestamp(&self) -> ChronoResult<Option<Timestamp>>;
}
