//! Administrative operations: rollback, WAL recovery, bulk import, index
//! replay and commit queries.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::PoisonError;

use serde_json::Value;
use tracing::{debug, warn};

use super::commit::{entries_to_staged, CommitPhase};
use super::metadata::Order;
use super::TemporalKeyValueStore;
use crate::error::{ChronoError, ChronoResult};
use crate::matrix::MatrixEntry;
use crate::observability::{log_event_with_fields, Event};
use crate::temporal::{Timestamp, MAX_TIMESTAMP};
use crate::wal::WalTokenKind;

/// Committed state of one branch, taken under the commit lock
#[derive(Debug, Clone)]
pub struct CommittedSnapshot {
    pub now: Timestamp,
    pub commits: Vec<(Timestamp, Option<Value>)>,
    pub entries: BTreeMap<String, Vec<MatrixEntry>>,
}

impl TemporalKeyValueStore {
    /// Destructively drops every version, index document and commit after
    /// `timestamp`. Returns the number of matrix versions dropped.
    ///
    /// A timestamp at or after `now` is a no-op. Checking for child
    /// branches is the caller's job.
    pub fn rollback(&self, timestamp: Timestamp) -> ChronoResult<usize> {
        let _guard = self.try_begin()?;
        if self.is_incremental_commit_in_progress() {
            return Err(ChronoError::ConcurrentCommit {
                branch: self.branch.clone(),
                reason: "cannot roll back while an incremental commit is open".to_string(),
            });
        }
        let now = self.now();
        if timestamp >= now {
            return Ok(0);
        }
        if timestamp < self.branching_timestamp() {
            return Err(ChronoError::precondition(format!(
                "cannot roll back branch '{}' to {}, before its branching timestamp {}",
                self.branch,
                timestamp,
                self.branching_timestamp()
            )));
        }

        log_event_with_fields(
            Event::RollbackBegin,
            &[("branch", self.branch.clone()), ("timestamp", timestamp.to_string())],
        );
        let dropped = self.discard_after(timestamp)?;
        let commits = self.commits.rollback(timestamp)?;
        self.refresh_now()?;
        self.context.backend.flush()?;
        log_event_with_fields(
            Event::RollbackComplete,
            &[
                ("branch", self.branch.clone()),
                ("versions", dropped.to_string()),
                ("commits", commits.to_string()),
            ],
        );
        Ok(dropped)
    }

    /// Finishes or discards an interrupted commit found in the WAL slot.
    ///
    /// Everything written after the last recorded commit is dropped first,
    /// then a `Commit` token is re-applied under its timestamp unless that
    /// commit was already recorded. An `Incremental` token is simply
    /// cleared.
    pub fn recover_from_wal(&self) -> ChronoResult<Option<WalTokenKind>> {
        let _guard = self.commit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let token = match self.wal.read()? {
            Some(token) => token,
            None => return Ok(None),
        };
        log_event_with_fields(
            Event::RecoveryWalTokenFound,
            &[
                ("branch", self.branch.clone()),
                ("kind", format!("{:?}", token.kind)),
                ("timestamp", token.timestamp.to_string()),
            ],
        );
        if token.branch != self.branch {
            return Err(ChronoError::Corruption(format!(
                "WAL slot of branch '{}' holds a token of branch '{}'",
                self.branch, token.branch
            )));
        }

        let last = self
            .commits
            .last()?
            .unwrap_or(0)
            .max(self.branching_timestamp());
        let dropped = self.discard_after(last)?;
        debug!(branch = %self.branch, last, dropped, "partial writes discarded");

        match token.kind {
            WalTokenKind::Commit => {
                if token.timestamp < last || token.timestamp == MAX_TIMESTAMP {
                    return Err(ChronoError::Recovery(format!(
                        "WAL token timestamp {} of branch '{}' is before its last commit {}",
                        token.timestamp, self.branch, last
                    )));
                }
                // Equal means the commit was recorded and only the token
                // clear is missing.
                if token.timestamp > last {
                    let staged = entries_to_staged(&token.entries);
                    self.apply_changes(token.timestamp, &staged)?;
                    self.commits.record(token.timestamp, token.metadata.as_ref())?;
                    self.context.backend.flush()?;
                }
                self.set_now(token.timestamp);
                log_event_with_fields(
                    Event::RecoveryRollForward,
                    &[
                        ("branch", self.branch.clone()),
                        ("timestamp", token.timestamp.to_string()),
                        ("entries", token.entries.len().to_string()),
                    ],
                );
            }
            WalTokenKind::Incremental => {
                self.refresh_now()?;
                log_event_with_fields(
                    Event::RecoveryDiscard,
                    &[("branch", self.branch.clone()), ("first", token.timestamp.to_string())],
                );
            }
        }
        self.wal.clear()?;
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = CommitPhase::Idle;
        *self.incremental.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(Some(token.kind))
    }

    /// Bulk-loads versions of one keyspace and registers their timestamps
    /// as commits. Index documents are not derived; the caller marks
    /// indexes dirty.
    pub fn import_versions(&self, keyspace: &str, entries: &[MatrixEntry]) -> ChronoResult<usize> {
        let _guard = self.commit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.is_empty() {
            return Ok(0);
        }
        if let Some(bad) = entries
            .iter()
            .find(|e| e.timestamp == MAX_TIMESTAMP || e.timestamp < self.branching_timestamp())
        {
            return Err(ChronoError::precondition(format!(
                "cannot import version of '{}' at {} into branch '{}'",
                bad.key, bad.timestamp, self.branch
            )));
        }
        self.matrix_or_create(keyspace)?.insert_entries(entries)?;
        let timestamps: BTreeSet<Timestamp> = entries.iter().map(|e| e.timestamp).collect();
        for ts in &timestamps {
            if !self.commits.contains(*ts)? {
                self.commits.record(*ts, None)?;
            }
        }
        self.context.backend.flush()?;
        self.refresh_now()?;
        Ok(entries.len())
    }

    /// Every committed local version per keyspace, ascending, with the
    /// commit timestamps and their metadata. Versions of an open
    /// incremental sequence sit after `now` and are left out.
    pub fn committed_snapshot(&self) -> ChronoResult<CommittedSnapshot> {
        let _guard = self.commit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.now();
        let mut commits = Vec::new();
        for timestamp in self.commits.timestamps_between(0, now, Order::Ascending)? {
            commits.push((timestamp, self.commits.metadata(timestamp)?));
        }
        let mut entries = BTreeMap::new();
        for matrix in self.all_matrices() {
            let committed: Vec<MatrixEntry> = matrix
                .all_entries()?
                .into_iter()
                .filter(|entry| entry.timestamp <= now)
                .collect();
            entries.insert(matrix.keyspace().to_string(), committed);
        }
        Ok(CommittedSnapshot { now, commits, entries })
    }

    /// Re-derives the documents of index `name` from this branch's local
    /// versions, oldest first. Returns the number of versions replayed.
    pub(crate) fn replay_into_index(&self, name: &str) -> ChronoResult<usize> {
        let mut replayed = 0;
        for matrix in self.all_matrices() {
            let mut by_timestamp: BTreeMap<Timestamp, Vec<(String, Option<Value>)>> = BTreeMap::new();
            for entry in matrix.all_entries()? {
                let value = if entry.is_tombstone() {
                    None
                } else {
                    Some(self.context.serializer.deserialize(&entry.value)?)
                };
                by_timestamp.entry(entry.timestamp).or_default().push((entry.key, value));
            }
            for (timestamp, changes) in by_timestamp {
                if timestamp > self.now() {
                    warn!(branch = %self.branch, timestamp, "skipping versions after now during reindex");
                    continue;
                }
                replayed += changes.len();
                let mods = self.context.indexes.derive_for_index(
                    name,
                    &self.branch,
                    timestamp,
                    matrix.keyspace(),
                    &changes,
                )?;
                self.context.indexes.apply_modifications(&mods)?;
            }
        }
        Ok(replayed)
    }

    /// Number of commits in `[from, to]`
    pub fn count_commit_timestamps_between(&self, from: Timestamp, to: Timestamp) -> ChronoResult<usize> {
        self.commits.count_between(from, to)
    }

    /// Commit timestamps in `[from, to]`
    pub fn commit_timestamps_between(
        &self,
        from: Timestamp,
        to: Timestamp,
        order: Order,
    ) -> ChronoResult<Vec<Timestamp>> {
        self.commits.timestamps_between(from, to, order)
    }

    pub fn commit_metadata(&self, timestamp: Timestamp) -> ChronoResult<Option<Value>> {
        self.commits.metadata(timestamp)
    }

    /// Keys of `keyspace` written by the commit at `timestamp`
    pub fn changed_keys_at_commit(&self, timestamp: Timestamp, keyspace: &str) -> ChronoResult<BTreeSet<String>> {
        let matrix = match self.matrix(keyspace) {
            Some(matrix) => matrix,
            None => return Ok(BTreeSet::new()),
        };
        if timestamp == MAX_TIMESTAMP {
            return Err(ChronoError::precondition("commit timestamp must not be the sentinel"));
        }
        Ok(matrix
            .modifications_between(timestamp, timestamp + 1)?
            .into_iter()
            .map(|k| k.key().to_string())
            .collect())
    }
}
