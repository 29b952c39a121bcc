//! Single-token WAL slot

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use super::token::WalToken;
use crate::backend::StorageBackend;
use crate::error::ChronoResult;

const TOKEN_KEY: &[u8] = b"token";

/// Holds at most one pending commit token for one branch.
///
/// Access is its own small critical section, independent of the commit
/// lock, so recovery and diagnostics can read the slot while a commit is
/// stuck.
pub struct WalSlot {
    backend: Arc<dyn StorageBackend>,
    table: String,
    guard: Mutex<()>,
}

impl fmt::Debug for WalSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalSlot").field("table", &self.table).finish()
    }
}

impl WalSlot {
    pub fn new(backend: Arc<dyn StorageBackend>, branch: &str) -> Self {
        Self {
            backend,
            table: format!("{}::wal", branch),
            guard: Mutex::new(()),
        }
    }

    /// Stores `token` and flushes. Replaces any previous token.
    pub fn set(&self, token: &WalToken) -> ChronoResult<()> {
        let frame = token.encode()?;
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        self.backend.put(&self.table, TOKEN_KEY, &frame)?;
        self.backend.flush()?;
        debug!(
            branch = %token.branch,
            timestamp = token.timestamp,
            kind = ?token.kind,
            entries = token.entries.len(),
            "WAL token written"
        );
        Ok(())
    }

    pub fn clear(&self) -> ChronoResult<()> {
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        self.backend.delete(&self.table, TOKEN_KEY)?;
        Ok(())
    }

    /// Returns the pending token, if any.
    pub fn read(&self) -> ChronoResult<Option<WalToken>> {
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        match self.backend.get(&self.table, TOKEN_KEY)? {
            Some(frame) => Ok(Some(WalToken::decode(&frame)?)),
            None => Ok(None),
        }
    }
}
