//! Crate-wide error taxonomy
//!
//! Error codes:
//! - CHRONO_PRECONDITION (ERROR)
//! - CHRONO_UNKNOWN_BRANCH / CHRONO_UNKNOWN_INDEX / CHRONO_UNKNOWN_PARENT (ERROR)
//! - CHRONO_BRANCH_EXISTS (ERROR)
//! - CHRONO_CONCURRENT_COMMIT (ERROR, fatal to the second transaction only)
//! - CHRONO_TEMPORAL_RANGE (ERROR)
//! - CHRONO_READ_ONLY (ERROR)
//! - CHRONO_CONFLICT (ERROR)
//! - CHRONO_INDEX_DIRTY (ERROR)
//! - CHRONO_TRANSACTION_CLOSED (ERROR)
//! - CHRONO_STORAGE / CHRONO_CORRUPTION / CHRONO_RECOVERY (FATAL)
//! - CHRONO_SERIALIZATION / CHRONO_CONFIG / CHRONO_IO (ERROR)
//!
//! Every failure is surfaced to the immediate caller. Nothing is downgraded
//! to a warning.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::backend::StorageError;

/// Severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, the store stays usable
    Error,
    /// The store must not be used until recovered
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Errors surfaced by the temporal store.
#[derive(Debug, Error)]
pub enum ChronoError {
    /// Null/negative/out-of-range argument, rejected before any mutation.
    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("unknown branch: '{0}'")]
    UnknownBranch(String),

    #[error("unknown index: '{0}'")]
    UnknownIndex(String),

    #[error("cannot create branch '{branch}': parent branch '{parent}' does not exist")]
    UnknownParent { branch: String, parent: String },

    #[error("branch already exists: '{0}'")]
    BranchExists(String),

    /// Another transaction already has a commit in flight on this branch.
    #[error("concurrent commit rejected on branch '{branch}': {reason}")]
    ConcurrentCommit { branch: String, reason: String },

    /// Requested timestamp lies in the future of the branch.
    #[error("timestamp {requested} is after 'now' ({now}) of branch '{branch}'")]
    TemporalRange {
        branch: String,
        requested: u64,
        now: u64,
    },

    #[error("transaction is read-only: cannot {0}")]
    ReadOnly(&'static str),

    #[error("commit conflict on {keyspace}/{key}: modified at {modified_at} after transaction timestamp {transaction_timestamp}")]
    Conflict {
        keyspace: String,
        key: String,
        transaction_timestamp: u64,
        modified_at: u64,
    },

    /// Index must be rebuilt before it can answer queries.
    #[error("index '{0}' is dirty and must be reindexed before querying")]
    IndexDirty(String),

    #[error("transaction is closed")]
    TransactionClosed,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("data corruption: {0}")]
    Corruption(String),

    #[error("recovery failed: {0}")]
    Recovery(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ChronoError {
    /// Create a precondition error
    pub fn precondition(message: impl Into<String>) -> Self {
        ChronoError::Precondition(message.into())
    }

    /// Returns the stable string code
    pub fn code(&self) -> &'static str {
        match self {
            ChronoError::Precondition(_) => "CHRONO_PRECONDITION",
            ChronoError::UnknownBranch(_) => "CHRONO_UNKNOWN_BRANCH",
            ChronoError::UnknownIndex(_) => "CHRONO_UNKNOWN_INDEX",
            ChronoError::UnknownParent { .. } => "CHRONO_UNKNOWN_PARENT",
            ChronoError::BranchExists(_) => "CHRONO_BRANCH_EXISTS",
            ChronoError::ConcurrentCommit { .. } => "CHRONO_CONCURRENT_COMMIT",
            ChronoError::TemporalRange { .. } => "CHRONO_TEMPORAL_RANGE",
            ChronoError::ReadOnly(_) => "CHRONO_READ_ONLY",
            ChronoError::Conflict { .. } => "CHRONO_CONFLICT",
            ChronoError::IndexDirty(_) => "CHRONO_INDEX_DIRTY",
            ChronoError::TransactionClosed => "CHRONO_TRANSACTION_CLOSED",
            ChronoError::Storage(_) => "CHRONO_STORAGE",
            ChronoError::Serialization(_) => "CHRONO_SERIALIZATION",
            ChronoError::Corruption(_) => "CHRONO_CORRUPTION",
            ChronoError::Recovery(_) => "CHRONO_RECOVERY",
            ChronoError::Config(_) => "CHRONO_CONFIG",
            ChronoError::Io(_) => "CHRONO_IO",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            ChronoError::Storage(e) if e.is_fatal() => Severity::Fatal,
            ChronoError::Corruption(_) | ChronoError::Recovery(_) => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    /// Returns whether the store must be recovered before further use
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

/// Result type for temporal store operations
pub type ChronoResult<T> = Result<T, ChronoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            ChronoError::UnknownBranch("x".into()).code(),
            "CHRONO_UNKNOWN_BRANCH"
        );
        assert_eq!(
            ChronoError::ConcurrentCommit {
                branch: "master".into(),
                reason: "busy".into()
            }
            .code(),
            "CHRONO_CONCURRENT_COMMIT"
        );
        assert_eq!(ChronoError::ReadOnly("put").code(), "CHRONO_READ_ONLY");
    }

    #[test]
    fn test_contention_is_not_fatal() {
        let err = ChronoError::ConcurrentCommit {
            branch: "master".into(),
            reason: "incremental commit in progress".into(),
        };
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_corruption_is_fatal() {
        assert!(ChronoError::Corruption("bad checksum".into()).is_fatal());
        assert!(ChronoError::Recovery("token unreadable".into()).is_fatal());
    }

    #[test]
    fn test_display_mentions_context() {
        let err = ChronoError::TemporalRange {
            branch: "master".into(),
            requested: 10,
            now: 5,
        };
        let display = err.to_string();
        assert!(display.contains("10"));
        assert!(display.contains("master"));
    }
}
