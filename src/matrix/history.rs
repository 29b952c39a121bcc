//! Lazy, paged history iteration

use std::collections::VecDeque;
use std::ops::Bound;
use std::sync::Arc;

use crate::backend::codec::{encode_u64, KeyReader};
use crate::backend::{ScanRange, StorageBackend};
use crate::error::ChronoResult;
use crate::temporal::Timestamp;

const PAGE_SIZE: usize = 64;

/// Descending versioning timestamps of one key.
///
/// Pages through the forward table on demand. Finite and not restartable.
pub struct HistoryIter {
    backend: Arc<dyn StorageBackend>,
    table: String,
    prefix: Vec<u8>,
    next_max: Option<Timestamp>,
    buffer: VecDeque<Timestamp>,
}

impl HistoryIter {
    pub(crate) fn new(
        backend: Arc<dyn StorageBackend>,
        table: String,
        prefix: Vec<u8>,
        max_time: Timestamp,
    ) -> Self {
        Self {
            backend,
            table,
            prefix,
            next_max: Some(max_time),
            buffer: VecDeque::new(),
        }
    }

    fn fill(&mut self) -> ChronoResult<()> {
        let Some(max) = self.next_max else {
            return Ok(());
        };
        let mut upper = self.prefix.clone();
        encode_u64(&mut upper, max);
        let range = ScanRange::new(Bound::Included(self.prefix.clone()), Bound::Included(upper))
            .reversed()
            .limited(PAGE_SIZE);
        let page = self.backend.scan(&self.table, &range)?;

        let mut last = None;
        for (key, _) in &page {
            let mut reader = KeyReader::new(key);
            reader.read_str()?;
            let ts = reader.read_u64()?;
            self.buffer.push_back(ts);
            last = Some(ts);
        }

        self.next_max = match last {
            Some(ts) if page.len() == PAGE_SIZE && ts > 0 => Some(ts - 1),
            _ => None,
        };
        Ok(())
    }
}

impl Iterator for HistoryIter {
    type Item = ChronoResult<Timestamp>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            if let Err(e) = self.fill() {
                self.next_max = None;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

impl std::fmt::Debug for HistoryIter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryIter")
            .field("table", &self.table)
            .field("next_max", &self.next_max)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}
