//! Index manager
//!
//! Owns the indexer registry, the document store and the durable
//! definition/dirty-flag tables. Readers and the applying writer are
//! separated by `apply_lock`, so a query never observes half of one
//! commit's modifications.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::document::{IndexDocument, IndexModifications};
use super::indexer::Indexer;
use super::search::SearchSpec;
use super::store::IndexDocumentStore;
use super::value::{IndexValue, IndexValueType};
use crate::backend::{ScanRange, StorageBackend};
use crate::error::{ChronoError, ChronoResult};
use crate::temporal::{Timestamp, MAX_TIMESTAMP};

const DEFINITIONS_TABLE: &str = "index::definitions";
const DIRTY_TABLE: &str = "index::dirty";
const DIRTY_FLAG: &[u8] = b"1";

/// Persisted part of an index definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredDefinition {
    value_type: IndexValueType,
}

/// Secondary index engine
pub struct IndexManager {
    backend: Arc<dyn StorageBackend>,
    store: IndexDocumentStore,
    indexers: RwLock<BTreeMap<String, Arc<dyn Indexer>>>,
    apply_lock: RwLock<()>,
}

impl fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .indexers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("IndexManager")
            .field("indexers", &names)
            .finish()
    }
}

impl IndexManager {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            store: IndexDocumentStore::new(Arc::clone(&backend)),
            backend,
            indexers: RwLock::new(BTreeMap::new()),
            apply_lock: RwLock::new(()),
        }
    }

    /// Registers `indexer` under `name`.
    ///
    /// Returns true if the index was not defined before; it is then marked
    /// dirty, since existing data has no documents for it yet.
    pub fn add_indexer(&self, name: &str, indexer: Arc<dyn Indexer>) -> ChronoResult<bool> {
        if name.is_empty() {
            return Err(ChronoError::precondition("index name must not be empty"));
        }
        let definition = StoredDefinition {
            value_type: indexer.value_type(),
        };
        let previous = self.definition(name)?;
        if let Some(previous) = &previous {
            if previous.value_type != definition.value_type {
                return Err(ChronoError::precondition(format!(
                    "index '{}' is defined with type {}, not {}",
                    name, previous.value_type, definition.value_type
                )));
            }
        }

        self.indexers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), indexer);

        if previous.is_none() {
            self.backend.put(
                DEFINITIONS_TABLE,
                name.as_bytes(),
                &serde_json::to_vec(&definition)?,
            )?;
            self.mark_dirty(name)?;
            info!(index = name, value_type = %definition.value_type, "index defined");
        }
        Ok(previous.is_none())
    }

    fn definition(&self, name: &str) -> ChronoResult<Option<StoredDefinition>> {
        match self.backend.get(DEFINITIONS_TABLE, name.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Names of all persisted index definitions
    pub fn index_names(&self) -> ChronoResult<Vec<String>> {
        self.backend
            .scan(DEFINITIONS_TABLE, &ScanRange::all())?
            .into_iter()
            .map(|(k, _)| {
                String::from_utf8(k)
                    .map_err(|e| ChronoError::Corruption(format!("index name: {}", e)))
            })
            .collect()
    }

    pub fn has_index(&self, name: &str) -> ChronoResult<bool> {
        Ok(self.definition(name)?.is_some())
    }

    /// Returns true if an indexer function is registered in this process
    pub fn is_registered(&self, name: &str) -> bool {
        self.indexers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn value_type(&self, name: &str) -> ChronoResult<IndexValueType> {
        self.definition(name)?
            .map(|d| d.value_type)
            .ok_or_else(|| ChronoError::UnknownIndex(name.to_string()))
    }

    pub fn is_dirty(&self, name: &str) -> ChronoResult<bool> {
        Ok(self.backend.get(DIRTY_TABLE, name.as_bytes())?.is_some())
    }

    pub fn mark_dirty(&self, name: &str) -> ChronoResult<()> {
        self.backend.put(DIRTY_TABLE, name.as_bytes(), DIRTY_FLAG)?;
        Ok(())
    }

    /// Marks every defined index dirty; returns how many were marked.
    pub fn mark_all_dirty(&self) -> ChronoResult<usize> {
        let names = self.index_names()?;
        for name in &names {
            self.mark_dirty(name)?;
        }
        Ok(names.len())
    }

    pub fn dirty_indexes(&self) -> ChronoResult<Vec<String>> {
        let mut dirty = Vec::new();
        for name in self.index_names()? {
            if self.is_dirty(&name)? {
                dirty.push(name);
            }
        }
        Ok(dirty)
    }

    pub(crate) fn clear_dirty(&self, name: &str) -> ChronoResult<()> {
        self.backend.delete(DIRTY_TABLE, name.as_bytes())?;
        Ok(())
    }

    fn registered(&self) -> Vec<(String, Arc<dyn Indexer>)> {
        self.indexers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }

    /// Derives the modifications of one commit on one keyspace, for every
    /// registered indexer.
    pub fn derive_modifications(
        &self,
        branch: &str,
        timestamp: Timestamp,
        keyspace: &str,
        changes: &[(String, Option<Value>)],
    ) -> ChronoResult<IndexModifications> {
        let mut mods = IndexModifications::default();
        for (name, indexer) in self.registered() {
            mods.extend(self.derive_with(&name, indexer.as_ref(), branch, timestamp, keyspace, changes)?);
        }
        Ok(mods)
    }

    /// Same as [`derive_modifications`](Self::derive_modifications) for a
    /// single index; used while rebuilding it.
    pub(crate) fn derive_for_index(
        &self,
        name: &str,
        branch: &str,
        timestamp: Timestamp,
        keyspace: &str,
        changes: &[(String, Option<Value>)],
    ) -> ChronoResult<IndexModifications> {
        let indexer = self
            .indexers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| ChronoError::UnknownIndex(name.to_string()))?;
        self.derive_with(name, indexer.as_ref(), branch, timestamp, keyspace, changes)
    }

    fn derive_with(
        &self,
        name: &str,
        indexer: &dyn Indexer,
        branch: &str,
        timestamp: Timestamp,
        keyspace: &str,
        changes: &[(String, Option<Value>)],
    ) -> ChronoResult<IndexModifications> {
        let mut mods = IndexModifications::default();
        for (key, value) in changes {
            let produced: BTreeSet<IndexValue> = match value {
                Some(v) if indexer.can_index(v) => indexer.index_values(v),
                _ => BTreeSet::new(),
            };
            let open = self.store.open_documents(name, branch, keyspace, key)?;
            let open_values: BTreeSet<&IndexValue> = open.iter().map(|d| &d.value).collect();

            for doc in &open {
                if produced.contains(&doc.value) {
                    continue;
                }
                if doc.valid_from >= timestamp {
                    mods.deletions.push(doc.clone());
                } else {
                    mods.terminations.push(doc.terminated_at(timestamp));
                }
            }
            for indexed in produced.iter().filter(|v| !open_values.contains(v)) {
                mods.creations.push(IndexDocument {
                    index_name: name.to_string(),
                    branch: branch.to_string(),
                    keyspace: keyspace.to_string(),
                    key: key.clone(),
                    value: indexed.clone(),
                    valid_from: timestamp,
                    valid_to: MAX_TIMESTAMP,
                });
            }
        }
        Ok(mods)
    }

    /// Applies one commit's modifications: terminations, then creations,
    /// then deletions. Readers are excluded for the duration.
    pub fn apply_modifications(&self, mods: &IndexModifications) -> ChronoResult<()> {
        if mods.is_empty() {
            return Ok(());
        }
        let mut names: BTreeSet<&str> = BTreeSet::new();
        names.extend(mods.terminations.iter().map(|d| d.index_name.as_str()));
        names.extend(mods.creations.iter().map(|d| d.index_name.as_str()));
        names.extend(mods.deletions.iter().map(|d| d.index_name.as_str()));

        let _guard = self.apply_lock.write().unwrap_or_else(PoisonError::into_inner);
        for name in names {
            self.store.apply(
                name,
                &of_index(&mods.terminations, name),
                &of_index(&mods.creations, name),
                &of_index(&mods.deletions, name),
            )?;
        }
        debug!(
            terminations = mods.terminations.len(),
            creations = mods.creations.len(),
            deletions = mods.deletions.len(),
            "index modifications applied"
        );
        Ok(())
    }

    fn check_queryable(&self, name: &str) -> ChronoResult<()> {
        if !self.has_index(name)? {
            return Err(ChronoError::UnknownIndex(name.to_string()));
        }
        if self.is_dirty(name)? {
            return Err(ChronoError::IndexDirty(name.to_string()));
        }
        Ok(())
    }

    /// Local documents of `branch` valid at `timestamp` whose value
    /// satisfies `spec`.
    pub fn match_documents(
        &self,
        timestamp: Timestamp,
        branch: &str,
        keyspace: &str,
        key: Option<&str>,
        index_name: &str,
        spec: &SearchSpec,
    ) -> ChronoResult<Vec<IndexDocument>> {
        self.check_queryable(index_name)?;
        let _guard = self.apply_lock.read().unwrap_or_else(PoisonError::into_inner);
        Ok(self
            .store
            .valid_at(index_name, branch, keyspace, key, timestamp)?
            .into_iter()
            .filter(|d| spec.matches(&d.value))
            .collect())
    }

    /// Local documents whose validity ended at or before `timestamp`.
    pub fn match_terminated(
        &self,
        timestamp: Timestamp,
        branch: &str,
        keyspace: &str,
        key: Option<&str>,
        index_name: &str,
        spec: &SearchSpec,
    ) -> ChronoResult<Vec<IndexDocument>> {
        self.check_queryable(index_name)?;
        let _guard = self.apply_lock.read().unwrap_or_else(PoisonError::into_inner);
        Ok(self
            .store
            .scan(index_name, branch, Some(keyspace), key)?
            .into_iter()
            .filter(|d| d.valid_to <= timestamp && spec.matches(&d.value))
            .collect())
    }

    /// Retracts every index change of `branch` after `timestamp`.
    pub fn rollback(&self, branch: &str, timestamp: Timestamp) -> ChronoResult<usize> {
        let _guard = self.apply_lock.write().unwrap_or_else(PoisonError::into_inner);
        let mut touched = 0;
        for name in self.index_names()? {
            let (deleted, reopened) = self.store.rollback(&name, branch, timestamp)?;
            touched += deleted + reopened;
        }
        if touched > 0 {
            debug!(branch, timestamp, documents = touched, "index rolled back");
        }
        Ok(touched)
    }

    /// Deletes every document of `name`; the caller rebuilds it.
    pub(crate) fn clear_index(&self, name: &str) -> ChronoResult<usize> {
        let _guard = self.apply_lock.write().unwrap_or_else(PoisonError::into_inner);
        self.store.clear(name)
    }
}

fn of_index<'a>(docs: &'a [IndexDocument], name: &str) -> Vec<&'a IndexDocument> {
    docs.iter().filter(|d| d.index_name == name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::index::{FieldIndexer, StringCondition, MatchMode};
    use serde_json::json;

    fn manager() -> IndexManager {
        let manager = IndexManager::new(Arc::new(MemoryBackend::new()));
        manager
            .add_indexer("name", Arc::new(FieldIndexer::new("name", IndexValueType::String)))
            .unwrap();
        manager.clear_dirty("name").unwrap();
        manager
    }

    fn commit(m: &IndexManager, ts: Timestamp, key: &str, value: Option<Value>) {
        let mods = m
            .derive_modifications("master", ts, "default", &[(key.to_string(), value)])
            .unwrap();
        m.apply_modifications(&mods).unwrap();
    }

    fn names_at(m: &IndexManager, ts: Timestamp) -> Vec<String> {
        m.match_documents(ts, "master", "default", None, "name", &SearchSpec::any())
            .unwrap()
            .into_iter()
            .map(|d| d.value.to_string())
            .collect()
    }

    #[test]
    fn test_rename_terminates_and_creates() {
        let m = manager();
        commit(&m, 1, "p1", Some(json!({"name": "Ada"})));
        commit(&m, 5, "p1", Some(json!({"name": "Grace"})));

        assert_eq!(names_at(&m, 4), vec!["\"Ada\""]);
        assert_eq!(names_at(&m, 5), vec!["\"Grace\""]);

        let terminated = m
            .match_terminated(5, "master", "default", Some("p1"), "name", &SearchSpec::any())
            .unwrap();
        assert_eq!(terminated.len(), 1);
        assert_eq!(terminated[0].validity(), crate::temporal::Period::new(1, 5).unwrap());
    }

    #[test]
    fn test_unchanged_value_produces_nothing() {
        let m = manager();
        commit(&m, 1, "p1", Some(json!({"name": "Ada", "age": 1})));
        let mods = m
            .derive_modifications("master", 2, "default", &[("p1".into(), Some(json!({"name": "Ada", "age": 2})))])
            .unwrap();
        assert!(mods.is_empty());
    }

    #[test]
    fn test_removal_terminates() {
        let m = manager();
        commit(&m, 1, "p1", Some(json!({"name": "Ada"})));
        commit(&m, 3, "p1", None);
        assert!(names_at(&m, 3).is_empty());
        assert_eq!(names_at(&m, 2).len(), 1);
    }

    #[test]
    fn test_rollback_restores_documents() {
        let m = manager();
        commit(&m, 1, "p1", Some(json!({"name": "Ada"})));
        commit(&m, 5, "p1", Some(json!({"name": "Grace"})));
        commit(&m, 6, "p2", Some(json!({"name": "Linus"})));

        m.rollback("master", 1).unwrap();
        assert_eq!(names_at(&m, 1), vec!["\"Ada\""]);
        assert_eq!(names_at(&m, 10), vec!["\"Ada\""]);
    }

    #[test]
    fn test_predicate_filters() {
        let m = manager();
        commit(&m, 1, "p1", Some(json!({"name": "Ada"})));
        commit(&m, 1, "p2", Some(json!({"name": "Alan"})));
        commit(&m, 1, "p3", Some(json!({"name": "Grace"})));
        let spec = SearchSpec::string(StringCondition::StartsWith, "a", MatchMode::CaseInsensitive).unwrap();
        let keys: Vec<_> = m
            .match_documents(1, "master", "default", None, "name", &spec)
            .unwrap()
            .into_iter()
            .map(|d| d.key)
            .collect();
        assert_eq!(keys, vec!["p1", "p2"]);
    }

    #[test]
    fn test_unknown_and_dirty_index_are_errors() {
        let m = manager();
        let err = m
            .match_documents(1, "master", "default", None, "nope", &SearchSpec::any())
            .unwrap_err();
        assert_eq!(err.code(), "CHRONO_UNKNOWN_INDEX");

        m.mark_dirty("name").unwrap();
        let err = m
            .match_documents(1, "master", "default", None, "name", &SearchSpec::any())
            .unwrap_err();
        assert_eq!(err.code(), "CHRONO_INDEX_DIRTY");
    }

    #[test]
    fn test_new_index_starts_dirty() {
        let m = IndexManager::new(Arc::new(MemoryBackend::new()));
        let indexer = Arc::new(FieldIndexer::new("age", IndexValueType::Long));
        assert!(m.add_indexer("age", indexer.clone()).unwrap());
        assert!(m.is_dirty("age").unwrap());
        assert!(!m.add_indexer("age", indexer).unwrap());
        let err = m
            .add_indexer("age", Arc::new(FieldIndexer::new("age", IndexValueType::String)))
            .unwrap_err();
        assert_eq!(err.code(), "CHRONO_PRECONDITION");
    }
}
