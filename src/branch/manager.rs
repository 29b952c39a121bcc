//! Branch registry

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use super::metadata::{BranchMetadata, MASTER_BRANCH};
use super::Branch;
use crate::backend::ScanRange;
use crate::error::{ChronoError, ChronoResult};
use crate::observability::{log_event_with_fields, Event};
use crate::temporal::Timestamp;
use crate::tkvs::{validate_name, Origin, StoreContext, TemporalKeyValueStore};

const BRANCHES_TABLE: &str = "branches";

/// Owns every branch of one database.
#[derive(Debug)]
pub struct BranchManager {
    context: StoreContext,
    branches: RwLock<BTreeMap<String, Arc<Branch>>>,
}

impl BranchManager {
    /// Rebuilds the branch tree from the backend. Master is created if the
    /// store is new.
    pub fn open(context: StoreContext) -> ChronoResult<Self> {
        let manager = Self {
            context,
            branches: RwLock::new(BTreeMap::new()),
        };

        let mut pending: Vec<BranchMetadata> = manager
            .context
            .backend
            .scan(BRANCHES_TABLE, &ScanRange::all())?
            .into_iter()
            .map(|(_, v)| serde_json::from_slice(&v).map_err(ChronoError::from))
            .collect::<ChronoResult<_>>()?;

        manager.create_master_branch()?;
        pending.retain(|m| !m.is_master());

        // Parents first: attach every branch whose parent is already loaded
        // until nothing changes.
        while !pending.is_empty() {
            let before = pending.len();
            let mut remaining = Vec::new();
            for metadata in pending {
                let parent = metadata
                    .parent
                    .as_deref()
                    .and_then(|p| manager.lookup(p));
                match parent {
                    Some(parent) => {
                        manager.attach(metadata, Some(parent))?;
                    }
                    None => remaining.push(metadata),
                }
            }
            if remaining.len() == before {
                let orphan = &remaining[0];
                return Err(ChronoError::Corruption(format!(
                    "branch '{}' refers to missing parent '{}'",
                    orphan.name,
                    orphan.parent.as_deref().unwrap_or("")
                )));
            }
            pending = remaining;
        }
        Ok(manager)
    }

    fn lookup(&self, name: &str) -> Option<Arc<Branch>> {
        self.branches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn attach(&self, metadata: BranchMetadata, parent: Option<Arc<Branch>>) -> ChronoResult<Arc<Branch>> {
        let origin = parent.as_ref().map(|p| Origin {
            store: Arc::clone(p.store()),
            branching_timestamp: metadata.branching_timestamp,
        });
        let store = Arc::new(TemporalKeyValueStore::open(
            &metadata.name,
            origin,
            self.context.clone(),
        )?);
        let branch = Arc::new(Branch::new(metadata, parent, store));
        self.branches
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(branch.name().to_string(), Arc::clone(&branch));
        debug!(branch = %branch.name(), "branch attached");
        Ok(branch)
    }

    fn persist(&self, metadata: &BranchMetadata) -> ChronoResult<()> {
        let bytes = serde_json::to_vec(metadata)?;
        self.context
            .backend
            .put(BRANCHES_TABLE, metadata.name.as_bytes(), &bytes)?;
        self.context.backend.flush()?;
        Ok(())
    }

    /// Returns the master branch, creating it on first use.
    pub fn create_master_branch(&self) -> ChronoResult<Arc<Branch>> {
        if let Some(master) = self.lookup(MASTER_BRANCH) {
            return Ok(master);
        }
        let metadata = BranchMetadata::master();
        self.persist(&metadata)?;
        self.attach(metadata, None)
    }

    /// Creates a child branch.
    ///
    /// The parent must exist, the name must be unused and the branching
    /// timestamp must not be after the parent's `now`. Nothing is written
    /// unless all checks pass.
    pub fn create_branch(&self, metadata: BranchMetadata) -> ChronoResult<Arc<Branch>> {
        validate_name("branch", &metadata.name)?;
        let parent_name = metadata.parent.clone().ok_or_else(|| {
            ChronoError::precondition(format!("branch '{}' must declare a parent", metadata.name))
        })?;

        // Held across the checks so two creators cannot race on one name.
        let mut branches = self.branches.write().unwrap_or_else(PoisonError::into_inner);
        if branches.contains_key(&metadata.name) {
            return Err(ChronoError::BranchExists(metadata.name));
        }
        let parent = branches
            .get(&parent_name)
            .cloned()
            .ok_or_else(|| ChronoError::UnknownParent {
                branch: metadata.name.clone(),
                parent: parent_name.clone(),
            })?;
        let parent_now = parent.now();
        if metadata.branching_timestamp > parent_now {
            return Err(ChronoError::TemporalRange {
                branch: parent_name,
                requested: metadata.branching_timestamp,
                now: parent_now,
            });
        }

        let store = Arc::new(TemporalKeyValueStore::open(
            &metadata.name,
            Some(Origin {
                store: Arc::clone(parent.store()),
                branching_timestamp: metadata.branching_timestamp,
            }),
            self.context.clone(),
        )?);
        self.persist(&metadata)?;
        let branch = Arc::new(Branch::new(metadata, Some(parent), store));
        branches.insert(branch.name().to_string(), Arc::clone(&branch));

        log_event_with_fields(
            Event::BranchCreated,
            &[
                ("branch", branch.name().to_string()),
                ("parent", parent_name),
                ("branching_timestamp", branch.branching_timestamp().to_string()),
            ],
        );
        Ok(branch)
    }

    pub fn get_branch(&self, name: &str) -> ChronoResult<Arc<Branch>> {
        self.lookup(name)
            .ok_or_else(|| ChronoError::UnknownBranch(name.to_string()))
    }

    pub fn master(&self) -> ChronoResult<Arc<Branch>> {
        self.get_branch(MASTER_BRANCH)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Snapshot of the registered names
    pub fn branch_names(&self) -> Vec<String> {
        self.branches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Every branch, parents before children.
    pub fn branches(&self) -> Vec<Arc<Branch>> {
        let mut all: Vec<Arc<Branch>> = self
            .branches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by_key(|b| (b.origins_recursive().len(), b.name().to_string()));
        all
    }

    /// Direct children of `name`
    pub fn children_of(&self, name: &str) -> Vec<Arc<Branch>> {
        self.branches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|b| b.metadata().parent.as_deref() == Some(name))
            .cloned()
            .collect()
    }

    /// Rolls `name` back to `timestamp`.
    ///
    /// Rejected while a child branched after `timestamp`, since the child's
    /// inherited history would change under it.
    pub fn rollback_branch(&self, name: &str, timestamp: Timestamp) -> ChronoResult<usize> {
        // Held through the rollback so no child can branch from the
        // versions being dropped.
        let branches = self.branches.read().unwrap_or_else(PoisonError::into_inner);
        let branch = branches
            .get(name)
            .cloned()
            .ok_or_else(|| ChronoError::UnknownBranch(name.to_string()))?;
        if let Some(child) = branches
            .values()
            .find(|b| b.metadata().parent.as_deref() == Some(name) && b.branching_timestamp() > timestamp)
        {
            return Err(ChronoError::precondition(format!(
                "cannot roll back branch '{}' to {}: child branch '{}' was branched at {}",
                name,
                timestamp,
                child.name(),
                child.branching_timestamp()
            )));
        }
        branch.store().rollback(timestamp)
    }
}
