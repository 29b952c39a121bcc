//! Database facade
//!
//! `ChronoDb` wires the configured backend, the index manager, the branch
//! tree and startup recovery together, and is the entry point for
//! transactions and administrative operations.
//!
//! # Open sequence
//!
//! 1. Validate configuration and open the backend
//! 2. Register configured indexers
//! 3. Load the branch tree, parents first
//! 4. Run startup recovery
//! 5. Rebuild dirty indexes that have a registered indexer
//!
//! `close()` flushes the backend and writes the clean-shutdown marker.
//! Dropping a database without closing it counts as a crash on next open.

mod config;
mod dump;

pub use config::{BackendKind, ChronoConfig};
pub use dump::DumpStats;

use std::fs;
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::backend::{FileBackend, MemoryBackend, StorageBackend};
use crate::branch::{Branch, BranchManager, BranchMetadata, MASTER_BRANCH};
use crate::error::{ChronoError, ChronoResult};
use crate::index::{Indexer, IndexManager};
use crate::observability::{log_event, log_event_with_fields, Event, ObservationScope};
use crate::recovery::{RecoveryManager, RecoveryState};
use crate::serialization::JsonSerializationManager;
use crate::temporal::{Clock, Timestamp};
use crate::tkvs::{ConflictResolution, StoreContext};
use crate::txn::{Transaction, TransactionConfig};

/// An open temporal database.
#[derive(Debug)]
pub struct ChronoDb {
    config: ChronoConfig,
    context: StoreContext,
    branches: BranchManager,
    recovery: RecoveryManager,
    recovery_state: RecoveryState,
    closed: AtomicBool,
}

impl ChronoDb {
    pub fn open(config: ChronoConfig) -> ChronoResult<Self> {
        log_event_with_fields(Event::StoreOpenBegin, &[("backend", format!("{:?}", config.backend))]);
        config.validate()?;
        log_event(Event::ConfigLoaded, &[]);

        let backend: Arc<dyn StorageBackend> = match config.backend {
            BackendKind::Memory => Arc::new(MemoryBackend::new()),
            BackendKind::File => {
                let dir = config
                    .data_dir
                    .as_ref()
                    .ok_or_else(|| ChronoError::Config("the file backend requires data_dir".to_string()))?;
                fs::create_dir_all(dir)?;
                Arc::new(FileBackend::open(dir, config.sync_writes)?)
            }
        };

        let indexes = Arc::new(IndexManager::new(Arc::clone(&backend)));
        for definition in &config.indexes {
            indexes.add_indexer(&definition.name, Arc::new(definition.build()))?;
        }
        // Commits skip indexes without a registered indexer, so their
        // documents fall behind.
        for name in indexes.index_names()? {
            if !indexes.is_registered(&name) {
                warn!(index = %name, "index has no registered indexer and is marked dirty");
                indexes.mark_dirty(&name)?;
            }
        }

        let clock: Arc<dyn Clock> = Arc::from(config.clock.build());
        let context = StoreContext {
            backend: Arc::clone(&backend),
            indexes,
            serializer: Arc::new(JsonSerializationManager),
            clock,
            duplicate_version_elimination: config.duplicate_version_elimination,
        };
        let branches = BranchManager::open(context.clone())?;
        let recovery = RecoveryManager::new(backend);
        let recovery_state = recovery.recover(&branches, &context.indexes)?;

        let db = Self {
            config,
            context,
            branches,
            recovery,
            recovery_state,
            closed: AtomicBool::new(false),
        };
        db.reindex_dirty()?;
        log_event_with_fields(
            Event::StoreOpenComplete,
            &[("branches", db.branches.branch_names().len().to_string())],
        );
        Ok(db)
    }

    pub fn in_memory() -> ChronoResult<Self> {
        Self::open(ChronoConfig::in_memory())
    }

    pub fn config(&self) -> &ChronoConfig {
        &self.config
    }

    /// What startup recovery found
    pub fn recovery_state(&self) -> &RecoveryState {
        &self.recovery_state
    }

    pub fn branch_manager(&self) -> &BranchManager {
        &self.branches
    }

    pub fn indexes(&self) -> &IndexManager {
        &self.context.indexes
    }

    // ---------------------------------------------------------------
    // Branches
    // ---------------------------------------------------------------

    pub fn branch_names(&self) -> Vec<String> {
        self.branches.branch_names()
    }

    pub fn get_branch(&self, name: &str) -> ChronoResult<Arc<Branch>> {
        self.branches.get_branch(name)
    }

    /// Creates `name` branching off `parent` at the parent's current `now`.
    pub fn create_branch(&self, name: &str, parent: &str) -> ChronoResult<Arc<Branch>> {
        let parent_now = match self.branches.get_branch(parent) {
            Ok(branch) => branch.now(),
            Err(ChronoError::UnknownBranch(_)) => {
                return Err(ChronoError::UnknownParent {
                    branch: name.to_string(),
                    parent: parent.to_string(),
                })
            }
            Err(e) => return Err(e),
        };
        self.create_branch_at(name, parent, parent_now)
    }

    pub fn create_branch_at(&self, name: &str, parent: &str, branching_timestamp: Timestamp) -> ChronoResult<Arc<Branch>> {
        self.branches
            .create_branch(BranchMetadata::child(name, parent, branching_timestamp))
    }

    /// Destructive rollback of `branch` to `timestamp`.
    pub fn rollback_branch(&self, branch: &str, timestamp: Timestamp) -> ChronoResult<usize> {
        self.branches.rollback_branch(branch, timestamp)
    }

    // ---------------------------------------------------------------
    // Transactions
    // ---------------------------------------------------------------

    fn default_tx_config(&self) -> TransactionConfig {
        TransactionConfig::default()
            .with_conflict_resolution(ConflictResolution::from(self.config.conflict_resolution))
    }

    /// Read-write transaction on master at its `now`
    pub fn tx(&self) -> ChronoResult<Transaction> {
        self.tx_on(MASTER_BRANCH)
    }

    pub fn tx_on(&self, branch: &str) -> ChronoResult<Transaction> {
        self.tx_with(branch, self.default_tx_config())
    }

    /// Transaction pinned to `timestamp`
    pub fn tx_at(&self, branch: &str, timestamp: Timestamp) -> ChronoResult<Transaction> {
        self.tx_with(branch, self.default_tx_config().at(timestamp))
    }

    pub fn read_only_tx(&self, branch: &str) -> ChronoResult<Transaction> {
        self.tx_with(branch, self.default_tx_config().read_only())
    }

    pub fn tx_with(&self, branch: &str, config: TransactionConfig) -> ChronoResult<Transaction> {
        self.ensure_open()?;
        Transaction::open(self.branches.get_branch(branch)?, config)
    }

    fn ensure_open(&self) -> ChronoResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChronoError::precondition("database is closed"));
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Indexes
    // ---------------------------------------------------------------

    /// Registers an indexer. A new index is built from existing data
    /// before this returns.
    pub fn add_indexer(&self, name: &str, indexer: Arc<dyn Indexer>) -> ChronoResult<bool> {
        let created = self.context.indexes.add_indexer(name, indexer)?;
        if created {
            self.reindex(name)?;
        }
        Ok(created)
    }

    /// Rebuilds index `name` from every branch's history.
    ///
    /// Must not run concurrently with commits; the index stays dirty, and
    /// unqueryable, until the rebuild completes.
    pub fn reindex(&self, name: &str) -> ChronoResult<usize> {
        let indexes = &self.context.indexes;
        if !indexes.has_index(name)? {
            return Err(ChronoError::UnknownIndex(name.to_string()));
        }
        if !indexes.is_registered(name) {
            return Err(ChronoError::precondition(format!(
                "index '{}' has no registered indexer",
                name
            )));
        }
        let scope = ObservationScope::new("REINDEX");
        indexes.mark_dirty(name)?;
        indexes.clear_index(name)?;
        let mut replayed = 0;
        for branch in self.branches.branches() {
            replayed += branch.store().replay_into_index(name)?;
        }
        indexes.clear_dirty(name)?;
        self.context.backend.flush()?;
        scope.complete(&[("index", name.to_string()), ("versions", replayed.to_string())]);
        Ok(replayed)
    }

    /// Rebuilds every index with a registered indexer.
    pub fn reindex_all(&self) -> ChronoResult<usize> {
        let mut rebuilt = 0;
        for name in self.context.indexes.index_names()? {
            if self.context.indexes.is_registered(&name) {
                self.reindex(&name)?;
                rebuilt += 1;
            }
        }
        Ok(rebuilt)
    }

    /// Rebuilds the dirty indexes that have a registered indexer.
    pub fn reindex_dirty(&self) -> ChronoResult<usize> {
        let mut rebuilt = 0;
        for name in self.context.indexes.dirty_indexes()? {
            if self.context.indexes.is_registered(&name) {
                self.reindex(&name)?;
                rebuilt += 1;
            }
        }
        Ok(rebuilt)
    }

    // ---------------------------------------------------------------
    // Dumps and lifecycle
    // ---------------------------------------------------------------

    pub fn export_dump<W: Write>(&self, writer: &mut W) -> ChronoResult<DumpStats> {
        self.ensure_open()?;
        let stats = dump::export(&self.branches, writer)?;
        log_event_with_fields(
            Event::DumpExported,
            &[("branches", stats.branches.to_string()), ("entries", stats.entries.to_string())],
        );
        Ok(stats)
    }

    /// Bulk-loads a dump, then rebuilds every index.
    pub fn import_dump<R: BufRead>(&self, reader: R) -> ChronoResult<DumpStats> {
        self.ensure_open()?;
        self.context.indexes.mark_all_dirty()?;
        let stats = dump::import(&self.branches, reader)?;
        self.context.backend.flush()?;
        log_event_with_fields(
            Event::DumpImported,
            &[("branches", stats.branches.to_string()), ("entries", stats.entries.to_string())],
        );
        self.reindex_dirty()?;
        Ok(stats)
    }

    /// Compacts the backend's persistent representation. Returns its size
    /// in bytes afterwards.
    pub fn compact(&self) -> ChronoResult<u64> {
        self.ensure_open()?;
        let size = self.context.backend.compact()?;
        log_event_with_fields(Event::BackendCompacted, &[("bytes", size.to_string())]);
        Ok(size)
    }

    /// Flushes and records a clean shutdown. Further transactions are
    /// rejected.
    pub fn close(&self) -> ChronoResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        log_event(Event::StoreCloseBegin, &[]);
        self.context.backend.flush()?;
        self.recovery.mark_clean_shutdown()?;
        log_event(Event::StoreCloseComplete, &[]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{FieldIndexDefinition, FieldIndexer, IndexValueType, SearchSpec};
    use crate::temporal::ClockKind;
    use serde_json::json;

    fn db() -> ChronoDb {
        ChronoDb::open(ChronoConfig::in_memory().with_clock(ClockKind::Logical)).unwrap()
    }

    #[test]
    fn test_new_database_has_master() {
        let db = db();
        assert_eq!(db.branch_names(), vec![MASTER_BRANCH.to_string()]);
        assert!(!db.recovery_state().recovered_any());
    }

    #[test]
    fn test_add_indexer_builds_from_existing_data() {
        let db = db();
        let mut tx = db.tx().unwrap();
        tx.put("default", "p1", json!({"name": "Ada"})).unwrap();
        tx.commit(None).unwrap();

        let indexer = Arc::new(FieldIndexer::new("name", IndexValueType::String));
        assert!(db.add_indexer("name", indexer.clone()).unwrap());
        assert!(!db.add_indexer("name", indexer).unwrap());

        let tx = db.tx().unwrap();
        let keys = tx.find_keys("default", "name", &SearchSpec::string_equals("Ada")).unwrap();
        assert!(keys.contains("p1"));
    }

    #[test]
    fn test_configured_indexes_are_registered() {
        let config = ChronoConfig::in_memory().with_index(FieldIndexDefinition {
            name: "age".into(),
            field: "age".into(),
            value_type: IndexValueType::Long,
        });
        let db = ChronoDb::open(config).unwrap();
        assert!(db.indexes().is_registered("age"));
        assert!(!db.indexes().is_dirty("age").unwrap());
    }

    #[test]
    fn test_closed_database_rejects_transactions() {
        let db = db();
        db.close().unwrap();
        assert!(db.tx().is_err());
        db.close().unwrap();
    }

    #[test]
    fn test_reindex_unknown_index() {
        let db = db();
        assert_eq!(db.reindex("missing").unwrap_err().code(), "CHRONO_UNKNOWN_INDEX");
    }
}
