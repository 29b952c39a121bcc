//! QualifiedKey and TemporalKey

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Timestamp;

/// Identifies a logical cell, independent of time.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QualifiedKey {
    keyspace: String,
    key: String,
}

impl QualifiedKey {
    pub fn new(keyspace: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            key: key.into(),
        }
    }

    #[inline]
    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Pins this cell to a timestamp
    pub fn at(&self, timestamp: Timestamp) -> TemporalKey {
        TemporalKey::new(self.keyspace.clone(), self.key.clone(), timestamp)
    }
}

impl fmt::Display for QualifiedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.keyspace, self.key)
    }
}

/// One version of a cell.
///
/// Ordering is keyspace, then key, then timestamp.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TemporalKey {
    keyspace: String,
    key: String,
    timestamp: Timestamp,
}

impl TemporalKey {
    pub fn new(keyspace: impl Into<String>, key: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            keyspace: keyspace.into(),
            key: key.into(),
            timestamp,
        }
    }

    #[inline]
    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn to_qualified_key(&self) -> QualifiedKey {
        QualifiedKey::new(self.keyspace.clone(), self.key.clone())
    }
}

impl From<TemporalKey> for QualifiedKey {
    fn from(key: TemporalKey) -> Self {
        QualifiedKey {
            keyspace: key.keyspace,
            key: key.key,
        }
    }
}

impl fmt::Display for TemporalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.keyspace, self.key, self.timestamp)
    }
}
