//! Volatile in-memory backend

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::{apply_batch, scan_table, BatchOp, ScanRange, StorageBackend, StorageResult, Table};

/// Sorted tables held in memory. `flush()` is a no-op.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, table: &str, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.get(table).and_then(|t| t.get(key).cloned()))
    }

    fn write_batch(&self, table: &str, ops: Vec<BatchOp>) -> StorageResult<()> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let entry = tables.entry(table.to_string()).or_default();
        apply_batch(entry, ops);
        if entry.is_empty() {
            tables.remove(table);
        }
        Ok(())
    }

    fn scan(&self, table: &str, range: &ScanRange) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables
            .get(table)
            .map(|t| scan_table(t, range))
            .unwrap_or_default())
    }

    fn tables(&self) -> StorageResult<Vec<String>> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn flush(&self) -> StorageResult<()> {
        Ok(())
    }
}
