//! Conflict resolution at commit time
//!
//! A conflict exists when a change-set key has a local version newer than
//! the committing transaction's read timestamp.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ChronoResult;
use crate::temporal::Timestamp;

/// A detected write-write conflict on one key
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictContext {
    pub keyspace: String,
    pub key: String,
    pub transaction_timestamp: Timestamp,
    /// Timestamp of the newer committed version
    pub target_timestamp: Timestamp,
    /// Value the transaction wants to write (`None` = remove)
    pub source: Option<Value>,
    /// Currently committed value (`None` = absent)
    pub target: Option<Value>,
}

/// Outcome chosen by a resolver
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    KeepSource,
    KeepTarget,
    Replace(Option<Value>),
}

/// Caller-supplied conflict strategy.
///
/// Resolvers are constructed without arguments, see
/// [`ConflictResolution::custom`].
pub trait ConflictResolver: Send + Sync + fmt::Debug {
    fn resolve(&self, conflict: &ConflictContext) -> ChronoResult<Resolution>;
}

#[derive(Debug, Clone, Default)]
pub enum ConflictResolution {
    /// Reject the commit
    #[default]
    DoNotMerge,
    /// The transaction's value wins
    OverwriteWithSource,
    /// The committed value wins; the transaction's change is dropped
    OverwriteWithTarget,
    Custom(Arc<dyn ConflictResolver>),
}

impl ConflictResolution {
    pub fn custom<R: ConflictResolver + Default + 'static>() -> Self {
        ConflictResolution::Custom(Arc::new(R::default()))
    }
}

/// Configurable subset of [`ConflictResolution`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolutionKind {
    #[default]
    DoNotMerge,
    OverwriteWithSource,
    OverwriteWithTarget,
}

impl From<ConflictResolutionKind> for ConflictResolution {
    fn from(kind: ConflictResolutionKind) -> Self {
        match kind {
            ConflictResolutionKind::DoNotMerge => ConflictResolution::DoNotMerge,
            ConflictResolutionKind::OverwriteWithSource => ConflictResolution::OverwriteWithSource,
            ConflictResolutionKind::OverwriteWithTarget => ConflictResolution::OverwriteWithTarget,
        }
    }
}
