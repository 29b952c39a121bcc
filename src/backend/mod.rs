//! Storage backend subsystem
//!
//! The temporal engine only needs a durable, sorted byte-key store with
//! range scans and an explicit durability point. Everything above this
//! module (matrices, commit metadata, WAL slots, index documents, flags) is
//! expressed as named tables of encoded keys, so the commit protocol never
//! assumes in-memory semantics.
//!
//! # Implementations
//!
//! - `MemoryBackend` - volatile, for embedded/test use
//! - `FileBackend` - append-only checksummed journal replayed into a sorted
//!   image on open; `flush()` fsyncs the journal
//!
//! # Invariants
//!
//! - A `write_batch` is applied to a table atomically: readers see all of it
//!   or none of it
//! - Scans return keys in byte order (reverse order when requested)

mod checksum;
pub mod codec;
mod errors;
mod file;
mod memory;

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;

pub use checksum::{compute_checksum, verify_checksum};
pub use errors::{StorageError, StorageErrorCode, StorageResult};
pub use file::FileBackend;
pub use memory::MemoryBackend;

/// One mutation inside a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl BatchOp {
    pub fn put(key: Vec<u8>, value: Vec<u8>) -> Self {
        BatchOp::Put { key, value }
    }

    pub fn delete(key: Vec<u8>) -> Self {
        BatchOp::Delete { key }
    }
}

/// Key range for scans
#[derive(Debug, Clone)]
pub struct ScanRange {
    pub start: Bound<Vec<u8>>,
    pub end: Bound<Vec<u8>>,
    pub reverse: bool,
    pub limit: Option<usize>,
}

impl ScanRange {
    /// Every key in the table
    pub fn all() -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
            reverse: false,
            limit: None,
        }
    }

    pub fn new(start: Bound<Vec<u8>>, end: Bound<Vec<u8>>) -> Self {
        Self {
            start,
            end,
            reverse: false,
            limit: None,
        }
    }

    /// Every key starting with `prefix`
    pub fn prefix(prefix: &[u8]) -> Self {
        let end = match codec::prefix_successor(prefix) {
            Some(successor) => Bound::Excluded(successor),
            None => Bound::Unbounded,
        };
        Self::new(Bound::Included(prefix.to_vec()), end)
    }

    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub fn limited(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if no key can fall in this range.
    fn is_degenerate(&self) -> bool {
        match (&self.start, &self.end) {
            (Bound::Included(s), Bound::Included(e)) => s > e,
            (Bound::Included(s), Bound::Excluded(e))
            | (Bound::Excluded(s), Bound::Included(e))
            | (Bound::Excluded(s), Bound::Excluded(e)) => s >= e,
            _ => false,
        }
    }
}

/// Durable sorted byte-key store.
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Short name for logs
    fn name(&self) -> &'static str;

    fn get(&self, table: &str, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Applies all operations to `table` atomically.
    fn write_batch(&self, table: &str, ops: Vec<BatchOp>) -> StorageResult<()>;

    fn scan(&self, table: &str, range: &ScanRange) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Names of all non-empty tables
    fn tables(&self) -> StorageResult<Vec<String>>;

    /// Durability point: everything written before returns is persistent.
    fn flush(&self) -> StorageResult<()>;

    fn put(&self, table: &str, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.write_batch(table, vec![BatchOp::put(key.to_vec(), value.to_vec())])
    }

    fn delete(&self, table: &str, key: &[u8]) -> StorageResult<()> {
        self.write_batch(table, vec![BatchOp::delete(key.to_vec())])
    }

    /// Reclaims space held by overwritten and deleted entries. Returns the
    /// persistent size in bytes afterwards, 0 for volatile backends.
    fn compact(&self) -> StorageResult<u64> {
        Ok(0)
    }
}

pub(crate) type Table = BTreeMap<Vec<u8>, Vec<u8>>;

/// Range scan over an in-memory sorted table.
pub(crate) fn scan_table(table: &Table, range: &ScanRange) -> Vec<(Vec<u8>, Vec<u8>)> {
    if range.is_degenerate() {
        return Vec::new();
    }
    let limit = range.limit.unwrap_or(usize::MAX);
    let iter = table.range::<Vec<u8>, _>((range.start.clone(), range.end.clone()));
    if range.reverse {
        iter.rev()
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    } else {
        iter.take(limit).map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

/// Applies a batch to an in-memory sorted table.
pub(crate) fn apply_batch(table: &mut Table, ops: Vec<BatchOp>) {
    for op in ops {
        match op {
            BatchOp::Put { key, value } => {
                table.insert(key, value);
            }
            BatchOp::Delete { key } => {
                table.remove(&key);
            }
        }
    }
}
