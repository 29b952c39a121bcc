//! Branches
//!
//! A branch is a named fork of the key space rooted, transitively, at the
//! master branch. Branches form an append-only tree:
//!
//! - every branch except master has exactly one parent
//! - a branch is created only after its parent exists
//! - branches are never deleted or renamed
//!
//! The `BranchManager` is the only component that constructs branches. It
//! persists their metadata in the `branches` backend table so the tree
//! can be rebuilt, parents first, on open.

mod manager;
mod metadata;

pub use manager::BranchManager;
pub use metadata::{BranchMetadata, MASTER_BRANCH};

use std::sync::Arc;

use crate::tkvs::TemporalKeyValueStore;

/// A branch and the store holding its local history.
#[derive(Debug)]
pub struct Branch {
    metadata: BranchMetadata,
    parent: Option<Arc<Branch>>,
    store: Arc<TemporalKeyValueStore>,
}

impl Branch {
    pub(crate) fn new(
        metadata: BranchMetadata,
        parent: Option<Arc<Branch>>,
        store: Arc<TemporalKeyValueStore>,
    ) -> Self {
        Self {
            metadata,
            parent,
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn metadata(&self) -> &BranchMetadata {
        &self.metadata
    }

    pub fn parent(&self) -> Option<&Arc<Branch>> {
        self.parent.as_ref()
    }

    pub fn store(&self) -> &Arc<TemporalKeyValueStore> {
        &self.store
    }

    pub fn is_master(&self) -> bool {
        self.parent.is_none()
    }

    pub fn branching_timestamp(&self) -> u64 {
        self.metadata.branching_timestamp
    }

    pub fn now(&self) -> u64 {
        self.store.now()
    }

    /// Ancestors from master down to the direct parent; empty for master.
    pub fn origins_recursive(&self) -> Vec<Arc<Branch>> {
        let mut chain = Vec::new();
        let mut current = self.parent.clone();
        while let Some(branch) = current {
            current = branch.parent.clone();
            chain.push(branch);
        }
        chain.reverse();
        chain
    }
}
