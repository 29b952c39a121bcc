//! Recovery manager

use std::sync::Arc;

use crate::backend::{ScanRange, StorageBackend};
use crate::branch::BranchManager;
use crate::error::ChronoResult;
use crate::index::IndexManager;
use crate::observability::{log_event, log_event_with_fields, Event};
use crate::wal::WalTokenKind;

const META_TABLE: &str = "meta";
const CLEAN_SHUTDOWN_MARKER: &[u8] = b"clean_shutdown";

/// Outcome of a successful startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryState {
    /// Whether the previous run closed the database
    pub was_clean_shutdown: bool,
    /// Branches whose interrupted commit was finished
    pub rolled_forward: Vec<String>,
    /// Branches whose open incremental sequence was dropped
    pub discarded: Vec<String>,
    pub indexes_marked_dirty: usize,
}

impl RecoveryState {
    pub fn recovered_any(&self) -> bool {
        !self.rolled_forward.is_empty() || !self.discarded.is_empty()
    }
}

/// Orchestrates startup recovery and the clean-shutdown marker.
#[derive(Debug)]
pub struct RecoveryManager {
    backend: Arc<dyn StorageBackend>,
}

impl RecoveryManager {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub fn was_clean_shutdown(&self) -> ChronoResult<bool> {
        Ok(self.backend.get(META_TABLE, CLEAN_SHUTDOWN_MARKER)?.is_some())
    }

    /// Written on graceful close
    pub fn mark_clean_shutdown(&self) -> ChronoResult<()> {
        self.backend.put(META_TABLE, CLEAN_SHUTDOWN_MARKER, b"1")?;
        self.backend.flush()?;
        Ok(())
    }

    fn remove_shutdown_marker(&self) -> ChronoResult<()> {
        self.backend.delete(META_TABLE, CLEAN_SHUTDOWN_MARKER)?;
        self.backend.flush()?;
        Ok(())
    }

    /// True if any branch has committed data or any index is defined
    fn has_state(&self, branches: &BranchManager, indexes: &IndexManager) -> ChronoResult<bool> {
        if !indexes.index_names()?.is_empty() {
            return Ok(true);
        }
        for branch in branches.branches() {
            let commits_table = format!("{}::commits", branch.name());
            let any = self
                .backend
                .scan(&commits_table, &ScanRange::all().limited(1))?;
            if !any.is_empty() || branch.store().wal().read()?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Executes the startup sequence. Any error is fatal.
    pub fn recover(&self, branches: &BranchManager, indexes: &IndexManager) -> ChronoResult<RecoveryState> {
        log_event(Event::RecoveryBegin, &[]);
        match self.run(branches, indexes) {
            Ok(state) => {
                log_event_with_fields(
                    Event::RecoveryComplete,
                    &[
                        ("clean_shutdown", state.was_clean_shutdown.to_string()),
                        ("rolled_forward", state.rolled_forward.len().to_string()),
                        ("discarded", state.discarded.len().to_string()),
                        ("dirty_indexes", state.indexes_marked_dirty.to_string()),
                    ],
                );
                Ok(state)
            }
            Err(e) => {
                log_event_with_fields(Event::RecoveryFailed, &[("error", e.to_string())]);
                Err(e)
            }
        }
    }

    fn run(&self, branches: &BranchManager, indexes: &IndexManager) -> ChronoResult<RecoveryState> {
        let mut state = RecoveryState {
            was_clean_shutdown: self.was_clean_shutdown()?,
            ..RecoveryState::default()
        };
        let had_state = self.has_state(branches, indexes)?;

        for branch in branches.branches() {
            match branch.store().recover_from_wal()? {
                Some(WalTokenKind::Commit) => state.rolled_forward.push(branch.name().to_string()),
                Some(WalTokenKind::Incremental) => state.discarded.push(branch.name().to_string()),
                None => {}
            }
        }

        let unclean = !state.was_clean_shutdown && had_state;
        if unclean {
            log_event(Event::RecoveryUncleanShutdown, &[]);
        }
        if unclean || state.recovered_any() {
            state.indexes_marked_dirty = indexes.mark_all_dirty()?;
        }

        self.remove_shutdown_marker()?;
        Ok(state)
    }
}
