use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::branch::Branch;
use crate::error::{ChronoError, ChronoResult};
use crate::index::{IndexDocument, SearchSpec};
use crate::matrix::GetResult;
use crate::temporal::{QualifiedKey, Timestamp};
use crate::tkvs::{CommitRequest, ConflictResolution, History, Order};

/// Options fixed when a transaction opens.
#[derive(Debug, Clone, Default)]
pub struct TransactionConfig {
    /// Read at this timestamp instead of the branch's `now`
    pub timestamp: Option<Timestamp>,
    pub read_only: bool,
    pub conflict_resolution: ConflictResolution,
}

impl TransactionConfig {
    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn with_conflict_resolution(mut self, strategy: ConflictResolution) -> Self {
        self.conflict_resolution = strategy;
        self
    }
}

/// A unit of reads at one timestamp and staged writes on one branch.
#[derive(Debug)]
pub struct Transaction {
    id: Uuid,
    branch: Arc<Branch>,
    timestamp: Timestamp,
    config: TransactionConfig,
    changes: BTreeMap<QualifiedKey, Option<Value>>,
    incremental: bool,
    closed: bool,
}

impl Transaction {
    /// Opens a transaction on `branch`.
    ///
    /// Fails with `TemporalRange` if the requested timestamp is after the
    /// branch's `now`.
    pub fn open(branch: Arc<Branch>, config: TransactionConfig) -> ChronoResult<Self> {
        let now = branch.now();
        let timestamp = config.timestamp.unwrap_or(now);
        if timestamp > now {
            return Err(ChronoError::TemporalRange {
                branch: branch.name().to_string(),
                requested: timestamp,
                now,
            });
        }
        let id = Uuid::new_v4();
        debug!(%id, branch = %branch.name(), timestamp, read_only = config.read_only, "transaction opened");
        Ok(Self {
            id,
            branch,
            timestamp,
            config,
            changes: BTreeMap::new(),
            incremental: false,
            closed: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn branch_name(&self) -> &str {
        self.branch.name()
    }

    pub fn branch(&self) -> &Arc<Branch> {
        &self.branch
    }

    /// Timestamp every read is pinned to
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    pub fn is_open(&self) -> bool {
        !self.closed
    }

    /// True between the first incremental commit and the final commit
    pub fn is_incremental(&self) -> bool {
        self.incremental
    }

    /// Staged, not yet committed changes
    pub fn change_set(&self) -> &BTreeMap<QualifiedKey, Option<Value>> {
        &self.changes
    }

    fn ensure_open(&self) -> ChronoResult<()> {
        if self.closed {
            return Err(ChronoError::TransactionClosed);
        }
        Ok(())
    }

    fn ensure_writable(&self, operation: &'static str) -> ChronoResult<()> {
        self.ensure_open()?;
        if self.config.read_only {
            return Err(ChronoError::ReadOnly(operation));
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    /// Point-in-time read with its validity period.
    pub fn get_result(&self, keyspace: &str, key: &str) -> ChronoResult<GetResult<Value>> {
        self.ensure_open()?;
        let raw = self.branch.store().get(self.timestamp, keyspace, key)?;
        let serializer = &self.branch.store().context().serializer;
        raw.map(|bytes| serializer.deserialize(&bytes))
    }

    pub fn get(&self, keyspace: &str, key: &str) -> ChronoResult<Option<Value>> {
        Ok(self.get_result(keyspace, key)?.into_value())
    }

    pub fn get_typed<T: DeserializeOwned>(&self, keyspace: &str, key: &str) -> ChronoResult<Option<T>> {
        self.get(keyspace, key)?
            .map(|v| serde_json::from_value(v).map_err(ChronoError::from))
            .transpose()
    }

    pub fn exists(&self, keyspace: &str, key: &str) -> ChronoResult<bool> {
        Ok(self.get_result(keyspace, key)?.value().is_some())
    }

    pub fn keys(&self, keyspace: &str) -> ChronoResult<BTreeSet<String>> {
        self.ensure_open()?;
        self.branch.store().keys(self.timestamp, keyspace)
    }

    pub fn keyspaces(&self) -> ChronoResult<BTreeSet<String>> {
        self.ensure_open()?;
        Ok(self.branch.store().keyspaces())
    }

    /// Versioning timestamps of `key` up to this transaction's timestamp,
    /// newest first.
    pub fn history(&self, keyspace: &str, key: &str) -> ChronoResult<History> {
        self.ensure_open()?;
        self.branch.store().history(self.timestamp, keyspace, key)
    }

    pub fn find(&self, keyspace: &str, index: &str, spec: &SearchSpec) -> ChronoResult<Vec<IndexDocument>> {
        self.ensure_open()?;
        self.branch.store().find(self.timestamp, keyspace, index, spec)
    }

    /// Keys whose indexed value matches `spec` at this timestamp
    pub fn find_keys(&self, keyspace: &str, index: &str, spec: &SearchSpec) -> ChronoResult<BTreeSet<String>> {
        Ok(self.find(keyspace, index, spec)?.into_iter().map(|d| d.key).collect())
    }

    pub fn find_terminated(
        &self,
        keyspace: &str,
        index: &str,
        spec: &SearchSpec,
    ) -> ChronoResult<Vec<IndexDocument>> {
        self.ensure_open()?;
        self.branch.store().find_terminated(self.timestamp, keyspace, index, spec)
    }

    pub fn count_commit_timestamps_between(&self, from: Timestamp, to: Timestamp) -> ChronoResult<usize> {
        self.ensure_open()?;
        self.branch.store().count_commit_timestamps_between(from, to)
    }

    pub fn commit_timestamps_between(
        &self,
        from: Timestamp,
        to: Timestamp,
        order: Order,
    ) -> ChronoResult<Vec<Timestamp>> {
        self.ensure_open()?;
        self.branch.store().commit_timestamps_between(from, to, order)
    }

    pub fn commit_metadata(&self, timestamp: Timestamp) -> ChronoResult<Option<Value>> {
        self.ensure_open()?;
        self.branch.store().commit_metadata(timestamp)
    }

    pub fn changed_keys_at_commit(&self, timestamp: Timestamp, keyspace: &str) -> ChronoResult<BTreeSet<String>> {
        self.ensure_open()?;
        self.branch.store().changed_keys_at_commit(timestamp, keyspace)
    }

    // ---------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------

    pub fn put(&mut self, keyspace: &str, key: &str, value: Value) -> ChronoResult<()> {
        self.ensure_writable("put")?;
        self.stage(keyspace, key, Some(value))
    }

    pub fn put_typed<T: Serialize>(&mut self, keyspace: &str, key: &str, value: &T) -> ChronoResult<()> {
        self.ensure_writable("put")?;
        let value = serde_json::to_value(value)?;
        self.stage(keyspace, key, Some(value))
    }

    pub fn remove(&mut self, keyspace: &str, key: &str) -> ChronoResult<()> {
        self.ensure_writable("remove")?;
        self.stage(keyspace, key, None)
    }

    fn stage(&mut self, keyspace: &str, key: &str, value: Option<Value>) -> ChronoResult<()> {
        if keyspace.is_empty() || key.is_empty() {
            return Err(ChronoError::precondition("keyspace and key must not be empty"));
        }
        if value.as_ref().map_or(false, Value::is_null) {
            return Err(ChronoError::precondition(format!(
                "cannot store null for '{}'; use remove instead",
                key
            )));
        }
        self.changes.insert(QualifiedKey::new(keyspace, key), value);
        Ok(())
    }

    fn request(&mut self, metadata: Option<Value>) -> CommitRequest {
        CommitRequest {
            owner: self.id,
            read_timestamp: self.timestamp,
            changes: std::mem::take(&mut self.changes),
            metadata,
            strategy: self.config.conflict_resolution.clone(),
        }
    }

    /// Commits the change set, and any open incremental sequence, under one
    /// timestamp. The transaction is closed afterwards, even on failure.
    pub fn commit(&mut self, metadata: Option<Value>) -> ChronoResult<Timestamp> {
        self.ensure_writable("commit")?;
        let request = self.request(metadata);
        self.closed = true;
        let result = self.branch.store().commit(request);
        if result.is_err() && self.incremental {
            if let Err(e) = self.branch.store().cancel_incremental(self.id) {
                warn!(id = %self.id, error = %e, "failed to discard incremental sequence");
            }
        }
        self.incremental = false;
        result
    }

    /// Flushes the change set under an intermediate timestamp that stays
    /// invisible to other transactions until the final [`commit`](Self::commit).
    pub fn commit_incremental(&mut self) -> ChronoResult<Timestamp> {
        self.ensure_writable("commit")?;
        let request = self.request(None);
        let timestamp = self.branch.store().commit_incremental(request)?;
        if timestamp > self.timestamp {
            self.incremental = true;
            self.timestamp = timestamp;
        }
        Ok(timestamp)
    }

    /// Discards the change set and any open incremental sequence.
    pub fn rollback(&mut self) -> ChronoResult<()> {
        self.ensure_open()?;
        self.changes.clear();
        self.closed = true;
        if self.incremental {
            self.incremental = false;
            self.branch.store().cancel_incremental(self.id)?;
        }
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.incremental {
            if let Err(e) = self.branch.store().cancel_incremental(self.id) {
                warn!(id = %self.id, error = %e, "failed to discard incremental sequence on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::BranchManager;
    use crate::tkvs::test_support::context;
    use serde_json::json;

    fn master() -> Arc<Branch> {
        BranchManager::open(context()).unwrap().master().unwrap()
    }

    #[test]
    fn test_reads_are_pinned_to_open_timestamp() {
        let branch = master();
        let mut writer = Transaction::open(Arc::clone(&branch), TransactionConfig::default()).unwrap();
        writer.put("default", "k", json!("v1")).unwrap();
        writer.commit(None).unwrap();

        let reader = Transaction::open(Arc::clone(&branch), TransactionConfig::default()).unwrap();
        let mut writer = Transaction::open(Arc::clone(&branch), TransactionConfig::default()).unwrap();
        writer.put("default", "k", json!("v2")).unwrap();
        writer.commit(None).unwrap();

        assert_eq!(reader.get("default", "k").unwrap(), Some(json!("v1")));
    }

    #[test]
    fn test_future_timestamp_is_rejected() {
        let branch = master();
        let err = Transaction::open(branch, TransactionConfig::default().at(5)).unwrap_err();
        assert_eq!(err.code(), "CHRONO_TEMPORAL_RANGE");
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let branch = master();
        let mut tx = Transaction::open(branch, TransactionConfig::default().read_only()).unwrap();
        assert_eq!(tx.put("default", "k", json!(1)).unwrap_err().code(), "CHRONO_READ_ONLY");
        assert_eq!(tx.remove("default", "k").unwrap_err().code(), "CHRONO_READ_ONLY");
        assert!(tx.change_set().is_empty());
    }

    #[test]
    fn test_closed_transaction_rejects_calls() {
        let branch = master();
        let mut tx = Transaction::open(branch, TransactionConfig::default()).unwrap();
        tx.put("default", "k", json!(1)).unwrap();
        tx.commit(None).unwrap();
        assert_eq!(tx.get("default", "k").unwrap_err().code(), "CHRONO_TRANSACTION_CLOSED");
    }

    #[test]
    fn test_typed_values_and_tombstones() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Person {
            name: String,
            age: u32,
        }
        let branch = master();
        let mut tx = Transaction::open(Arc::clone(&branch), TransactionConfig::default()).unwrap();
        let ada = Person { name: "Ada".into(), age: 36 };
        tx.put_typed("people", "p1", &ada).unwrap();
        let created = tx.commit(None).unwrap();

        let mut tx = Transaction::open(Arc::clone(&branch), TransactionConfig::default()).unwrap();
        assert_eq!(tx.get_typed::<Person>("people", "p1").unwrap(), Some(ada));
        tx.remove("people", "p1").unwrap();
        let removed = tx.commit(None).unwrap();

        let tx = Transaction::open(Arc::clone(&branch), TransactionConfig::default()).unwrap();
        assert!(!tx.exists("people", "p1").unwrap());
        let history: Vec<_> = tx.history("people", "p1").unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(history, vec![removed, created]);
        assert!(tx.keyspaces().unwrap().contains("people"));
    }

    #[test]
    fn test_dropping_incremental_transaction_discards_sequence() {
        let branch = master();
        let mut tx = Transaction::open(Arc::clone(&branch), TransactionConfig::default()).unwrap();
        tx.put("default", "a", json!(1)).unwrap();
        let step = tx.commit_incremental().unwrap();
        assert_eq!(tx.get("default", "a").unwrap(), Some(json!(1)));
        drop(tx);

        assert!(!branch.store().is_incremental_commit_in_progress());
        assert!(!branch.store().get(step, "default", "a").unwrap().is_hit());
        let mut other = Transaction::open(branch, TransactionConfig::default()).unwrap();
        other.put("default", "b", json!(2)).unwrap();
        other.commit(None).unwrap();
    }
}
