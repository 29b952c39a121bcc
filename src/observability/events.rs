//! Observable lifecycle events
//!
//! Events are explicit and typed. Each has a stable upper-case name that
//! appears as the `event` field of the emitted log line.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Store lifecycle
    StoreOpenBegin,
    StoreOpenComplete,
    StoreCloseBegin,
    StoreCloseComplete,
    ConfigLoaded,

    // Branches
    BranchCreated,

    // Commit protocol
    CommitBegin,
    CommitWalWritten,
    CommitMatricesUpdated,
    CommitIndexed,
    CommitComplete,
    CommitRejected,
    IncrementalCommitStep,
    IncrementalCommitCancelled,

    // Administrative
    RollbackBegin,
    RollbackComplete,
    DumpExported,
    DumpImported,
    BackendCompacted,

    // Recovery
    RecoveryBegin,
    RecoveryWalTokenFound,
    RecoveryRollForward,
    RecoveryDiscard,
    RecoveryUncleanShutdown,
    RecoveryComplete,
    RecoveryFailed,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::StoreOpenBegin => "STORE_OPEN_BEGIN",
            Event::StoreOpenComplete => "STORE_OPEN_COMPLETE",
            Event::StoreCloseBegin => "STORE_CLOSE_BEGIN",
            Event::StoreCloseComplete => "STORE_CLOSE_COMPLETE",
            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::BranchCreated => "BRANCH_CREATED",

            Event::CommitBegin => "COMMIT_BEGIN",
            Event::CommitWalWritten => "COMMIT_WAL_WRITTEN",
            Event::CommitMatricesUpdated => "COMMIT_MATRICES_UPDATED",
            Event::CommitIndexed => "COMMIT_INDEXED",
            Event::CommitComplete => "COMMIT_COMPLETE",
            Event::CommitRejected => "COMMIT_REJECTED",
            Event::IncrementalCommitStep => "INCREMENTAL_COMMIT_STEP",
            Event::IncrementalCommitCancelled => "INCREMENTAL_COMMIT_CANCELLED",

            Event::RollbackBegin => "ROLLBACK_BEGIN",
            Event::RollbackComplete => "ROLLBACK_COMPLETE",
            Event::DumpExported => "DUMP_EXPORTED",
            Event::DumpImported => "DUMP_IMPORTED",
            Event::BackendCompacted => "BACKEND_COMPACTED",

            Event::RecoveryBegin => "RECOVERY_BEGIN",
            Event::RecoveryWalTokenFound => "RECOVERY_WAL_TOKEN_FOUND",
            Event::RecoveryRollForward => "RECOVERY_ROLL_FORWARD",
            Event::RecoveryDiscard => "RECOVERY_DISCARD",
            Event::RecoveryUncleanShutdown => "RECOVERY_UNCLEAN_SHUTDOWN",
            Event::RecoveryComplete => "RECOVERY_COMPLETE",
            Event::RecoveryFailed => "RECOVERY_FAILED",
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::RecoveryFailed)
    }

    /// Events worth an operator's attention without being fatal
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Event::CommitRejected
                | Event::RecoveryWalTokenFound
                | Event::RecoveryUncleanShutdown
                | Event::IncrementalCommitCancelled
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_upper_snake_case() {
        let events = [
            Event::StoreOpenBegin,
            Event::CommitWalWritten,
            Event::IncrementalCommitStep,
            Event::RecoveryWalTokenFound,
            Event::DumpImported,
        ];
        for event in events {
            let s = event.as_str();
            assert!(s.chars().all(|c| c.is_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_severity_classes() {
        assert!(Event::RecoveryFailed.is_fatal());
        assert!(!Event::CommitComplete.is_fatal());
        assert!(Event::CommitRejected.is_warning());
        assert!(!Event::CommitComplete.is_warning());
    }
}
