//! Backend table of index documents
//!
//! One table per index. Key: `branch | keyspace | key | value | valid_from`,
//! value: `valid_to` (u64 BE). Prefix scans over the key give every
//! document of a branch, a keyspace or a single entity.

use std::fmt;
use std::sync::Arc;

use super::document::IndexDocument;
use super::value::IndexValue;
use crate::backend::codec::{encode_str, encode_u64, KeyReader};
use crate::backend::{BatchOp, ScanRange, StorageBackend, StorageError};
use crate::error::ChronoResult;
use crate::temporal::{Timestamp, MAX_TIMESTAMP};

pub(crate) struct IndexDocumentStore {
    backend: Arc<dyn StorageBackend>,
}

impl fmt::Debug for IndexDocumentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexDocumentStore")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl IndexDocumentStore {
    pub(crate) fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    fn table(index_name: &str) -> String {
        format!("index::{}", index_name)
    }

    fn prefix(branch: &str, keyspace: Option<&str>, key: Option<&str>) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_str(&mut buf, branch);
        if let Some(keyspace) = keyspace {
            encode_str(&mut buf, keyspace);
            if let Some(key) = key {
                encode_str(&mut buf, key);
            }
        }
        buf
    }

    fn encode_key(doc: &IndexDocument) -> Vec<u8> {
        let mut buf = Self::prefix(&doc.branch, Some(&doc.keyspace), Some(&doc.key));
        doc.value.encode(&mut buf);
        encode_u64(&mut buf, doc.valid_from);
        buf
    }

    fn decode(index_name: &str, raw: &[u8], value: &[u8]) -> ChronoResult<IndexDocument> {
        let mut reader = KeyReader::new(raw);
        let branch = reader.read_str()?;
        let keyspace = reader.read_str()?;
        let key = reader.read_str()?;
        let indexed = IndexValue::decode(&mut reader)?;
        let valid_from = reader.read_u64()?;
        let valid_to = KeyReader::new(value).read_u64().map_err(|_| {
            StorageError::corruption_in_table(&Self::table(index_name), "truncated valid_to")
        })?;
        Ok(IndexDocument {
            index_name: index_name.to_string(),
            branch,
            keyspace,
            key,
            value: indexed,
            valid_from,
            valid_to,
        })
    }

    /// Documents of `index_name` under the given prefix, in key order.
    pub(crate) fn scan(
        &self,
        index_name: &str,
        branch: &str,
        keyspace: Option<&str>,
        key: Option<&str>,
    ) -> ChronoResult<Vec<IndexDocument>> {
        let prefix = Self::prefix(branch, keyspace, key);
        self.backend
            .scan(&Self::table(index_name), &ScanRange::prefix(&prefix))?
            .into_iter()
            .map(|(raw, value)| Self::decode(index_name, &raw, &value))
            .collect()
    }

    /// Open documents of one entity
    pub(crate) fn open_documents(
        &self,
        index_name: &str,
        branch: &str,
        keyspace: &str,
        key: &str,
    ) -> ChronoResult<Vec<IndexDocument>> {
        Ok(self
            .scan(index_name, branch, Some(keyspace), Some(key))?
            .into_iter()
            .filter(IndexDocument::is_open)
            .collect())
    }

    /// Writes one index's share of a modification batch as one atomic batch.
    pub(crate) fn apply(
        &self,
        index_name: &str,
        terminations: &[&IndexDocument],
        creations: &[&IndexDocument],
        deletions: &[&IndexDocument],
    ) -> ChronoResult<()> {
        let mut ops = Vec::with_capacity(terminations.len() + creations.len() + deletions.len());
        for doc in terminations.iter().chain(creations.iter()) {
            let mut valid_to = Vec::with_capacity(8);
            encode_u64(&mut valid_to, doc.valid_to);
            ops.push(BatchOp::put(Self::encode_key(doc), valid_to));
        }
        for doc in deletions {
            ops.push(BatchOp::delete(Self::encode_key(doc)));
        }
        self.backend.write_batch(&Self::table(index_name), ops)?;
        Ok(())
    }

    /// Deletes documents that began after `timestamp` and reopens
    /// documents terminated after it. Returns `(deleted, reopened)`.
    pub(crate) fn rollback(
        &self,
        index_name: &str,
        branch: &str,
        timestamp: Timestamp,
    ) -> ChronoResult<(usize, usize)> {
        let mut ops = Vec::new();
        let (mut deleted, mut reopened) = (0, 0);
        for doc in self.scan(index_name, branch, None, None)? {
            if doc.valid_from > timestamp {
                ops.push(BatchOp::delete(Self::encode_key(&doc)));
                deleted += 1;
            } else if doc.valid_to > timestamp && doc.valid_to < MAX_TIMESTAMP {
                let mut valid_to = Vec::with_capacity(8);
                encode_u64(&mut valid_to, MAX_TIMESTAMP);
                ops.push(BatchOp::put(Self::encode_key(&doc), valid_to));
                reopened += 1;
            }
        }
        self.backend.write_batch(&Self::table(index_name), ops)?;
        Ok((deleted, reopened))
    }

    /// Removes every document of the index, on all branches.
    pub(crate) fn clear(&self, index_name: &str) -> ChronoResult<usize> {
        let table = Self::table(index_name);
        let ops: Vec<BatchOp> = self
            .backend
            .scan(&table, &ScanRange::all())?
            .into_iter()
            .map(|(k, _)| BatchOp::delete(k))
            .collect();
        let count = ops.len();
        self.backend.write_batch(&table, ops)?;
        Ok(count)
    }

    /// Documents of one branch valid at `timestamp`, optionally for one key.
    pub(crate) fn valid_at(
        &self,
        index_name: &str,
        branch: &str,
        keyspace: &str,
        key: Option<&str>,
        timestamp: Timestamp,
    ) -> ChronoResult<Vec<IndexDocument>> {
        Ok(self
            .scan(index_name, branch, Some(keyspace), key)?
            .into_iter()
            .filter(|d| d.is_valid_at(timestamp))
            .collect())
    }
}
