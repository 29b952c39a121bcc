//! Commit metadata store

use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

use serde_json::Value;

use crate::backend::codec::{encode_u64, KeyReader};
use crate::backend::{BatchOp, ScanRange, StorageBackend};
use crate::error::ChronoResult;
use crate::serialization::SerializationManager;
use crate::temporal::Timestamp;

/// Iteration order for commit timestamp queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Ascending,
    Descending,
}

/// Durable `commit timestamp -> metadata` table of one branch.
pub trait CommitMetadataStore: Send + Sync + fmt::Debug {
    /// Records a commit. `None` metadata is stored as JSON `null`.
    fn record(&self, timestamp: Timestamp, metadata: Option<&Value>) -> ChronoResult<()>;

    fn contains(&self, timestamp: Timestamp) -> ChronoResult<bool>;

    /// Metadata of the commit at `timestamp`; `None` if there is no such
    /// commit or it carried no metadata.
    fn metadata(&self, timestamp: Timestamp) -> ChronoResult<Option<Value>>;

    /// Commit timestamps in `[from, to]`
    fn timestamps_between(
        &self,
        from: Timestamp,
        to: Timestamp,
        order: Order,
    ) -> ChronoResult<Vec<Timestamp>>;

    fn count_between(&self, from: Timestamp, to: Timestamp) -> ChronoResult<usize> {
        Ok(self.timestamps_between(from, to, Order::Ascending)?.len())
    }

    /// Latest recorded commit timestamp
    fn last(&self) -> ChronoResult<Option<Timestamp>>;

    /// Forgets commits after `timestamp`; returns how many were removed.
    fn rollback(&self, timestamp: Timestamp) -> ChronoResult<usize>;
}

/// Commit metadata over a `StorageBackend` table.
pub struct BackendCommitMetadataStore {
    backend: Arc<dyn StorageBackend>,
    serializer: Arc<dyn SerializationManager>,
    table: String,
}

impl fmt::Debug for BackendCommitMetadataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendCommitMetadataStore")
            .field("table", &self.table)
            .finish()
    }
}

impl BackendCommitMetadataStore {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        serializer: Arc<dyn SerializationManager>,
        branch: &str,
    ) -> Self {
        Self {
            backend,
            serializer,
            table: format!("{}::commits", branch),
        }
    }

    fn key(timestamp: Timestamp) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8);
        encode_u64(&mut buf, timestamp);
        buf
    }

    fn decode_key(raw: &[u8]) -> ChronoResult<Timestamp> {
        Ok(KeyReader::new(raw).read_u64()?)
    }
}

impl CommitMetadataStore for BackendCommitMetadataStore {
    fn record(&self, timestamp: Timestamp, metadata: Option<&Value>) -> ChronoResult<()> {
        let bytes = self.serializer.serialize(metadata.unwrap_or(&Value::Null))?;
        self.backend.put(&self.table, &Self::key(timestamp), &bytes)?;
        Ok(())
    }

    fn contains(&self, timestamp: Timestamp) -> ChronoResult<bool> {
        Ok(self.backend.get(&self.table, &Self::key(timestamp))?.is_some())
    }

    fn metadata(&self, timestamp: Timestamp) -> ChronoResult<Option<Value>> {
        match self.backend.get(&self.table, &Self::key(timestamp))? {
            Some(bytes) => match self.serializer.deserialize(&bytes)? {
                Value::Null => Ok(None),
                value => Ok(Some(value)),
            },
            None => Ok(None),
        }
    }

    fn timestamps_between(
        &self,
        from: Timestamp,
        to: Timestamp,
        order: Order,
    ) -> ChronoResult<Vec<Timestamp>> {
        if from > to {
            return Ok(Vec::new());
        }
        let mut range = ScanRange::new(
            Bound::Included(Self::key(from)),
            Bound::Included(Self::key(to)),
        );
        if order == Order::Descending {
            range = range.reversed();
        }
        self.backend
            .scan(&self.table, &range)?
            .into_iter()
            .map(|(k, _)| Self::decode_key(&k))
            .collect()
    }

    fn last(&self) -> ChronoResult<Option<Timestamp>> {
        let range = ScanRange::all().reversed().limited(1);
        match self.backend.scan(&self.table, &range)?.pop() {
            Some((k, _)) => Ok(Some(Self::decode_key(&k)?)),
            None => Ok(None),
        }
    }

    fn rollback(&self, timestamp: Timestamp) -> ChronoResult<usize> {
        let range = ScanRange::new(Bound::Excluded(Self::key(timestamp)), Bound::Unbounded);
        let ops: Vec<BatchOp> = self
            .backend
            .scan(&self.table, &range)?
            .into_iter()
            .map(|(k, _)| BatchOp::delete(k))
            .collect();
        let count = ops.len();
        self.backend.write_batch(&self.table, ops)?;
        Ok(count)
    }
}
