//! Temporal key-value store
//!
//! One `TemporalKeyValueStore` per branch. It owns the branch's per-keyspace
//! matrices, its commit metadata, its WAL slot and `now`, and runs the
//! commit protocol against them.
//!
//! # Commit protocol
//!
//! ```text
//! Idle --begin--> WalWritten --matrices--> MatricesUpdated --index--> Indexed
//!   ^                                                                   |
//!   +---------- record metadata, advance now, clear WAL ----------------+
//! ```
//!
//! At most one commit is in flight per store. A second commit, or any
//! commit while another transaction's incremental sequence is open, fails
//! immediately with `ConcurrentCommit`.
//!
//! # Branch reads
//!
//! A store with an origin `(parent, B)` answers reads from its own
//! matrices first and delegates to the parent at `min(t, B)` otherwise.
//! Parent changes after `B` are never visible.

mod admin;
mod commit;
mod conflict;
mod metadata;
mod read;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::backend::{ScanRange, StorageBackend};
use crate::error::{ChronoError, ChronoResult};
use crate::index::IndexManager;
use crate::matrix::{BackendMatrix, TemporalMatrix};
use crate::serialization::SerializationManager;
use crate::temporal::{Clock, Timestamp};
use crate::wal::WalSlot;

pub use commit::{CommitPhase, CommitRequest};
pub use admin::CommittedSnapshot;
pub use conflict::{
    ConflictContext, ConflictResolution, ConflictResolutionKind, ConflictResolver, Resolution,
};
pub use metadata::{BackendCommitMetadataStore, CommitMetadataStore, Order};
pub use read::History;

use commit::IncrementalState;

/// Keyspace every branch starts with
pub const DEFAULT_KEYSPACE: &str = "default";

/// Services shared by every branch of one database
#[derive(Clone)]
pub struct StoreContext {
    pub backend: Arc<dyn StorageBackend>,
    pub indexes: Arc<IndexManager>,
    pub serializer: Arc<dyn SerializationManager>,
    pub clock: Arc<dyn Clock>,
    /// Drop change-set entries that would not change the stored value
    pub duplicate_version_elimination: bool,
}

impl fmt::Debug for StoreContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreContext")
            .field("backend", &self.backend.name())
            .field("clock", &self.clock)
            .field("duplicate_version_elimination", &self.duplicate_version_elimination)
            .finish()
    }
}

/// The parent view a branch inherits
#[derive(Debug, Clone)]
pub struct Origin {
    pub store: Arc<TemporalKeyValueStore>,
    pub branching_timestamp: Timestamp,
}

/// Rejects names that would make backend table names ambiguous.
pub(crate) fn validate_name(kind: &str, name: &str) -> ChronoResult<()> {
    if name.is_empty() {
        return Err(ChronoError::precondition(format!("{} name must not be empty", kind)));
    }
    if name.contains("::") {
        return Err(ChronoError::precondition(format!(
            "{} name '{}' must not contain '::'",
            kind, name
        )));
    }
    Ok(())
}

pub struct TemporalKeyValueStore {
    branch: String,
    origin: Option<Origin>,
    context: StoreContext,
    matrices: RwLock<BTreeMap<String, Arc<dyn TemporalMatrix>>>,
    keyspaces_table: String,
    commits: Box<dyn CommitMetadataStore>,
    wal: WalSlot,
    now: AtomicU64,
    commit_lock: Mutex<()>,
    phase: Mutex<CommitPhase>,
    incremental: Mutex<Option<IncrementalState>>,
}

impl fmt::Debug for TemporalKeyValueStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemporalKeyValueStore")
            .field("branch", &self.branch)
            .field("origin", &self.origin.as_ref().map(|o| (o.store.branch_name(), o.branching_timestamp)))
            .field("now", &self.now())
            .finish()
    }
}

impl TemporalKeyValueStore {
    /// Opens the store of `branch`, loading its keyspaces and `now` from
    /// the backend. The default keyspace always exists.
    pub fn open(branch: &str, origin: Option<Origin>, context: StoreContext) -> ChronoResult<Self> {
        validate_name("branch", branch)?;
        let commits = Box::new(BackendCommitMetadataStore::new(
            Arc::clone(&context.backend),
            Arc::clone(&context.serializer),
            branch,
        ));
        let store = Self {
            branch: branch.to_string(),
            wal: WalSlot::new(Arc::clone(&context.backend), branch),
            keyspaces_table: format!("{}::keyspaces", branch),
            origin,
            context,
            matrices: RwLock::new(BTreeMap::new()),
            commits,
            now: AtomicU64::new(0),
            commit_lock: Mutex::new(()),
            phase: Mutex::new(CommitPhase::Idle),
            incremental: Mutex::new(None),
        };

        let registered: Vec<String> = store
            .context
            .backend
            .scan(&store.keyspaces_table, &ScanRange::all())?
            .into_iter()
            .map(|(k, _)| {
                String::from_utf8(k)
                    .map_err(|e| ChronoError::Corruption(format!("keyspace name: {}", e)))
            })
            .collect::<ChronoResult<_>>()?;
        for keyspace in registered {
            store.attach_matrix(&keyspace);
        }
        store.matrix_or_create(DEFAULT_KEYSPACE)?;
        store.refresh_now()?;
        Ok(store)
    }

    pub fn branch_name(&self) -> &str {
        &self.branch
    }

    pub fn origin(&self) -> Option<&Origin> {
        self.origin.as_ref()
    }

    /// Branching timestamp, 0 for the master branch
    pub fn branching_timestamp(&self) -> Timestamp {
        self.origin.as_ref().map(|o| o.branching_timestamp).unwrap_or(0)
    }

    /// Latest visible commit timestamp
    pub fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }

    pub fn commit_phase(&self) -> CommitPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn context(&self) -> &StoreContext {
        &self.context
    }

    pub(crate) fn commits(&self) -> &dyn CommitMetadataStore {
        self.commits.as_ref()
    }

    pub(crate) fn wal(&self) -> &WalSlot {
        &self.wal
    }

    /// Recomputes `now` as `max(branching timestamp, last commit)`.
    pub(crate) fn refresh_now(&self) -> ChronoResult<Timestamp> {
        let now = self
            .commits
            .last()?
            .unwrap_or(0)
            .max(self.branching_timestamp());
        self.now.store(now, Ordering::SeqCst);
        Ok(now)
    }

    pub(crate) fn set_now(&self, timestamp: Timestamp) {
        self.now.store(timestamp, Ordering::SeqCst);
    }

    /// Names of the keyspaces with a local matrix
    pub fn local_keyspaces(&self) -> Vec<String> {
        self.matrices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub(crate) fn matrix(&self, keyspace: &str) -> Option<Arc<dyn TemporalMatrix>> {
        self.matrices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(keyspace)
            .cloned()
    }

    pub(crate) fn all_matrices(&self) -> Vec<Arc<dyn TemporalMatrix>> {
        self.matrices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn attach_matrix(&self, keyspace: &str) -> Arc<dyn TemporalMatrix> {
        let mut matrices = self.matrices.write().unwrap_or_else(PoisonError::into_inner);
        let matrix = matrices.entry(keyspace.to_string()).or_insert_with(|| {
            Arc::new(BackendMatrix::new(
                Arc::clone(&self.context.backend),
                &self.branch,
                keyspace,
            )) as Arc<dyn TemporalMatrix>
        });
        Arc::clone(matrix)
    }

    /// Returns the matrix of `keyspace`, registering the keyspace durably
    /// if it is new.
    pub(crate) fn matrix_or_create(&self, keyspace: &str) -> ChronoResult<Arc<dyn TemporalMatrix>> {
        if let Some(matrix) = self.matrix(keyspace) {
            return Ok(matrix);
        }
        validate_name("keyspace", keyspace)?;
        self.context
            .backend
            .put(&self.keyspaces_table, keyspace.as_bytes(), b"")?;
        Ok(self.attach_matrix(keyspace))
    }
}
