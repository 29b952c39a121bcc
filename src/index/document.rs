//! Index documents and per-commit modification batches

use super::value::IndexValue;
use crate::temporal::{Period, Timestamp, MAX_TIMESTAMP};

/// Time-bounded association between an indexed value and an entity key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexDocument {
    pub index_name: String,
    pub branch: String,
    pub keyspace: String,
    pub key: String,
    pub value: IndexValue,
    /// Inclusive
    pub valid_from: Timestamp,
    /// Exclusive; `MAX_TIMESTAMP` while open
    pub valid_to: Timestamp,
}

impl IndexDocument {
    pub fn is_open(&self) -> bool {
        self.valid_to == MAX_TIMESTAMP
    }

    pub fn is_valid_at(&self, timestamp: Timestamp) -> bool {
        self.valid_from <= timestamp && timestamp < self.valid_to
    }

    pub fn validity(&self) -> Period {
        Period::new(self.valid_from, self.valid_to).unwrap_or_else(|_| Period::empty())
    }

    pub(crate) fn terminated_at(&self, timestamp: Timestamp) -> Self {
        Self {
            valid_to: timestamp,
            ..self.clone()
        }
    }
}

/// Index changes derived from one commit.
///
/// Applied in order: terminations, creations, deletions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexModifications {
    /// Documents with their new, lowered `valid_to`
    pub terminations: Vec<IndexDocument>,
    pub creations: Vec<IndexDocument>,
    pub deletions: Vec<IndexDocument>,
}

impl IndexModifications {
    pub fn is_empty(&self) -> bool {
        self.terminations.is_empty() && self.creations.is_empty() && self.deletions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.terminations.len() + self.creations.len() + self.deletions.len()
    }

    pub fn extend(&mut self, other: IndexModifications) {
        self.terminations.extend(other.terminations);
        self.creations.extend(other.creations);
        self.deletions.extend(other.deletions);
    }
}
