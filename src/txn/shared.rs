use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use super::Transaction;
use crate::error::ChronoResult;
use crate::temporal::Timestamp;

/// A transaction usable from several threads.
///
/// Every call takes the inner lock, so calls are serialized onto the one
/// logical transaction; commit semantics are unchanged.
#[derive(Debug, Clone)]
pub struct SharedTransaction {
    inner: Arc<Mutex<Transaction>>,
}

impl SharedTransaction {
    pub fn new(transaction: Transaction) -> Self {
        Self {
            inner: Arc::new(Mutex::new(transaction)),
        }
    }

    /// Runs `f` with exclusive access to the transaction.
    pub fn with<R>(&self, f: impl FnOnce(&mut Transaction) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn timestamp(&self) -> Timestamp {
        self.with(|tx| tx.timestamp())
    }

    pub fn get(&self, keyspace: &str, key: &str) -> ChronoResult<Option<Value>> {
        self.with(|tx| tx.get(keyspace, key))
    }

    pub fn keys(&self, keyspace: &str) -> ChronoResult<BTreeSet<String>> {
        self.with(|tx| tx.keys(keyspace))
    }

    pub fn put(&self, keyspace: &str, key: &str, value: Value) -> ChronoResult<()> {
        self.with(|tx| tx.put(keyspace, key, value))
    }

    pub fn remove(&self, keyspace: &str, key: &str) -> ChronoResult<()> {
        self.with(|tx| tx.remove(keyspace, key))
    }

    pub fn commit(&self, metadata: Option<Value>) -> ChronoResult<Timestamp> {
        self.with(|tx| tx.commit(metadata))
    }

    pub fn commit_incremental(&self) -> ChronoResult<Timestamp> {
        self.with(|tx| tx.commit_incremental())
    }

    pub fn rollback(&self) -> ChronoResult<()> {
        self.with(|tx| tx.rollback())
    }
}
