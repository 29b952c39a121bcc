//! Commit coordinator
//!
//! Sequences a transaction's change set into matrix versions and index
//! documents under one timestamp, through the WAL.

use std::collections::BTreeMap;
use std::sync::{MutexGuard, PoisonError, TryLockError};

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::conflict::{ConflictContext, ConflictResolution, Resolution};
use super::TemporalKeyValueStore;
use crate::crash_point::{maybe_crash, points};
use crate::error::{ChronoError, ChronoResult};
use crate::index::IndexModifications;
use crate::observability::{log_event, log_event_with_fields, Event};
use crate::temporal::{QualifiedKey, Timestamp};
use crate::wal::{WalEntry, WalToken};

/// Serialized changes grouped by keyspace; `None` is a removal.
pub(crate) type StagedChanges = BTreeMap<String, BTreeMap<String, Option<Vec<u8>>>>;

/// Where the in-flight commit of a store currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPhase {
    Idle,
    WalWritten,
    MatricesUpdated,
    Indexed,
}

/// An open incremental sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IncrementalState {
    pub owner: Uuid,
    pub first: Timestamp,
    pub last: Timestamp,
}

/// Everything the coordinator needs from a transaction.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    /// Transaction identity; ties incremental steps together
    pub owner: Uuid,
    /// Timestamp the transaction reads at
    pub read_timestamp: Timestamp,
    pub changes: BTreeMap<QualifiedKey, Option<Value>>,
    pub metadata: Option<Value>,
    pub strategy: ConflictResolution,
}

impl CommitRequest {
    pub fn new(owner: Uuid, read_timestamp: Timestamp) -> Self {
        Self {
            owner,
            read_timestamp,
            changes: BTreeMap::new(),
            metadata: None,
            strategy: ConflictResolution::default(),
        }
    }
}

pub(crate) fn staged_to_entries(staged: &StagedChanges) -> Vec<WalEntry> {
    staged
        .iter()
        .flat_map(|(keyspace, changes)| {
            changes.iter().map(move |(key, value)| WalEntry {
                keyspace: keyspace.clone(),
                key: key.clone(),
                value: value.clone(),
            })
        })
        .collect()
}

pub(crate) fn entries_to_staged(entries: &[WalEntry]) -> StagedChanges {
    let mut staged = StagedChanges::new();
    for entry in entries {
        staged
            .entry(entry.keyspace.clone())
            .or_default()
            .insert(entry.key.clone(), entry.value.clone());
    }
    staged
}

impl TemporalKeyValueStore {
    pub(super) fn try_begin(&self) -> ChronoResult<MutexGuard<'_, ()>> {
        match self.commit_lock.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => {
                log_event(Event::CommitRejected, &[("branch", self.branch.as_str()), ("reason", "commit in progress")]);
                Err(ChronoError::ConcurrentCommit {
                    branch: self.branch.clone(),
                    reason: "another commit is in progress".to_string(),
                })
            }
        }
    }

    fn incremental_state(&self) -> Option<IncrementalState> {
        *self.incremental.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_incremental_state(&self, state: Option<IncrementalState>) {
        *self.incremental.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn set_phase(&self, phase: CommitPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    /// Fails if another owner's incremental sequence is open, or if an
    /// interrupted commit is waiting for recovery.
    fn check_exclusive(&self, owner: Uuid) -> ChronoResult<Option<IncrementalState>> {
        match self.incremental_state() {
            Some(state) if state.owner != owner => {
                log_event(
                    Event::CommitRejected,
                    &[("branch", self.branch.as_str()), ("reason", "incremental commit in progress")],
                );
                Err(ChronoError::ConcurrentCommit {
                    branch: self.branch.clone(),
                    reason: "an incremental commit of another transaction is in progress".to_string(),
                })
            }
            Some(state) => Ok(Some(state)),
            None => {
                if let Some(token) = self.wal.read()? {
                    return Err(ChronoError::Recovery(format!(
                        "branch '{}' has an interrupted commit at {} awaiting recovery",
                        self.branch, token.timestamp
                    )));
                }
                Ok(None)
            }
        }
    }

    /// Picks the next timestamp strictly after `floor`.
    fn next_timestamp(&self, floor: Timestamp) -> ChronoResult<Timestamp> {
        let timestamp = self.context.clock.next_after(floor);
        if timestamp <= floor {
            return Err(ChronoError::precondition(format!(
                "timestamp space exhausted on branch '{}'",
                self.branch
            )));
        }
        Ok(timestamp)
    }

    fn serialize_changes(
        &self,
        changes: &BTreeMap<QualifiedKey, Option<Value>>,
    ) -> ChronoResult<StagedChanges> {
        let mut staged = StagedChanges::new();
        for (qualified, value) in changes {
            let bytes = match value {
                Some(v) => Some(self.context.serializer.serialize(v)?),
                None => None,
            };
            staged
                .entry(qualified.keyspace().to_string())
                .or_default()
                .insert(qualified.key().to_string(), bytes);
        }
        Ok(staged)
    }

    fn deserialize_opt(&self, bytes: Option<&Vec<u8>>) -> ChronoResult<Option<Value>> {
        bytes.map(|b| self.context.serializer.deserialize(b)).transpose()
    }

    /// Applies the conflict strategy to every key with a local version in
    /// `(read_timestamp, now]`.
    fn resolve_conflicts(
        &self,
        staged: &mut StagedChanges,
        read_timestamp: Timestamp,
        strategy: &ConflictResolution,
    ) -> ChronoResult<()> {
        let now = self.now();
        if read_timestamp >= now {
            return Ok(());
        }
        for (keyspace, changes) in staged.iter_mut() {
            let Some(matrix) = self.matrix(keyspace) else {
                continue;
            };
            let mut dropped = Vec::new();
            for (key, value) in changes.iter_mut() {
                let current = matrix.get(now, key)?;
                let target_timestamp = current.period().lower_bound();
                if !current.is_hit() || target_timestamp <= read_timestamp {
                    continue;
                }
                match strategy {
                    ConflictResolution::DoNotMerge => {
                        return Err(ChronoError::Conflict {
                            keyspace: keyspace.clone(),
                            key: key.clone(),
                            transaction_timestamp: read_timestamp,
                            modified_at: target_timestamp,
                        })
                    }
                    ConflictResolution::OverwriteWithSource => {}
                    ConflictResolution::OverwriteWithTarget => dropped.push(key.clone()),
                    ConflictResolution::Custom(resolver) => {
                        let context = ConflictContext {
                            keyspace: keyspace.clone(),
                            key: key.clone(),
                            transaction_timestamp: read_timestamp,
                            target_timestamp,
                            source: self.deserialize_opt(value.as_ref())?,
                            target: self.deserialize_opt(current.value())?,
                        };
                        match resolver.resolve(&context)? {
                            Resolution::KeepSource => {}
                            Resolution::KeepTarget => dropped.push(key.clone()),
                            Resolution::Replace(replacement) => {
                                *value = match replacement {
                                    Some(v) => Some(self.context.serializer.serialize(&v)?),
                                    None => None,
                                };
                            }
                        }
                    }
                }
            }
            for key in dropped {
                changes.remove(&key);
            }
        }
        Ok(())
    }

    /// Drops entries that would store what is already visible at `at`.
    fn eliminate_duplicates(&self, staged: &mut StagedChanges, at: Timestamp) -> ChronoResult<()> {
        if !self.context.duplicate_version_elimination {
            return Ok(());
        }
        for (keyspace, changes) in staged.iter_mut() {
            let mut unchanged = Vec::new();
            for (key, value) in changes.iter() {
                let current = self.get(at, keyspace, key)?;
                if current.value() == value.as_ref() {
                    unchanged.push(key.clone());
                }
            }
            for key in unchanged {
                changes.remove(&key);
            }
        }
        staged.retain(|_, changes| !changes.is_empty());
        Ok(())
    }

    /// Writes `staged` into the matrices and the index at `timestamp`.
    pub(crate) fn apply_changes(&self, timestamp: Timestamp, staged: &StagedChanges) -> ChronoResult<()> {
        for (keyspace, changes) in staged {
            self.matrix_or_create(keyspace)?.put(timestamp, changes)?;
        }
        self.set_phase(CommitPhase::MatricesUpdated);
        log_event_with_fields(
            Event::CommitMatricesUpdated,
            &[("branch", self.branch.clone()), ("keyspaces", staged.len().to_string())],
        );
        maybe_crash(points::COMMIT_AFTER_MATRICES);

        let mut mods = IndexModifications::default();
        for (keyspace, changes) in staged {
            let values = changes
                .iter()
                .map(|(key, bytes)| Ok((key.clone(), self.deserialize_opt(bytes.as_ref())?)))
                .collect::<ChronoResult<Vec<_>>>()?;
            mods.extend(
                self.context
                    .indexes
                    .derive_modifications(&self.branch, timestamp, keyspace, &values)?,
            );
        }
        self.context.indexes.apply_modifications(&mods)?;
        self.set_phase(CommitPhase::Indexed);
        log_event_with_fields(
            Event::CommitIndexed,
            &[("branch", self.branch.clone()), ("modifications", mods.len().to_string())],
        );
        maybe_crash(points::COMMIT_AFTER_INDEX);
        Ok(())
    }

    /// Discards matrix versions and index documents after `timestamp`.
    pub(crate) fn discard_after(&self, timestamp: Timestamp) -> ChronoResult<usize> {
        let mut dropped = 0;
        for matrix in self.all_matrices() {
            dropped += matrix.rollback(timestamp)?;
        }
        self.context.indexes.rollback(&self.branch, timestamp)?;
        Ok(dropped)
    }

    /// Values of every key written by the open incremental sequence, as of
    /// its last step.
    fn collect_intermediate(&self, state: &IncrementalState) -> ChronoResult<StagedChanges> {
        let mut staged = StagedChanges::new();
        for matrix in self.all_matrices() {
            for version in matrix.modifications_between(state.first, state.last.saturating_add(1))? {
                let current = matrix.get(state.last, version.key())?;
                staged
                    .entry(matrix.keyspace().to_string())
                    .or_default()
                    .insert(version.key().to_string(), current.into_value());
            }
        }
        Ok(staged)
    }

    /// Commits `request` under one fresh timestamp and returns it.
    ///
    /// If the owner has an open incremental sequence, its intermediate
    /// versions are folded into this commit. An empty change set without
    /// metadata is a no-op returning `now`.
    pub fn commit(&self, request: CommitRequest) -> ChronoResult<Timestamp> {
        let _guard = self.try_begin()?;
        let state = self.check_exclusive(request.owner)?;

        let mut staged = match &state {
            Some(state) => self.collect_intermediate(state)?,
            None => StagedChanges::new(),
        };
        for (keyspace, changes) in self.serialize_changes(&request.changes)? {
            staged.entry(keyspace).or_default().extend(changes);
        }
        self.resolve_conflicts(&mut staged, request.read_timestamp, &request.strategy)?;
        let now = self.now();
        self.eliminate_duplicates(&mut staged, now)?;

        if staged.is_empty() && request.metadata.is_none() {
            if let Some(state) = state {
                self.discard_after(now)?;
                self.wal.clear()?;
                self.set_incremental_state(None);
                debug!(branch = %self.branch, first = state.first, "incremental sequence ended without changes");
            }
            return Ok(now);
        }

        let floor = state.map(|s| s.last).unwrap_or(now).max(now);
        let timestamp = self.next_timestamp(floor)?;
        log_event_with_fields(
            Event::CommitBegin,
            &[("branch", self.branch.clone()), ("timestamp", timestamp.to_string())],
        );

        let token = WalToken::commit(
            self.branch.clone(),
            timestamp,
            staged_to_entries(&staged),
            request.metadata.clone(),
        );
        self.wal.set(&token)?;
        self.set_phase(CommitPhase::WalWritten);
        log_event_with_fields(
            Event::CommitWalWritten,
            &[("branch", self.branch.clone()), ("entries", token.entries.len().to_string())],
        );
        maybe_crash(points::COMMIT_AFTER_WAL);

        if state.is_some() {
            self.discard_after(now)?;
        }
        let result = self.finish_commit(timestamp, &staged, request.metadata.as_ref());
        if state.is_some() {
            self.set_incremental_state(None);
        }
        result?;
        Ok(timestamp)
    }

    fn finish_commit(
        &self,
        timestamp: Timestamp,
        staged: &StagedChanges,
        metadata: Option<&Value>,
    ) -> ChronoResult<()> {
        self.apply_changes(timestamp, staged)?;
        self.commits.record(timestamp, metadata)?;
        self.context.backend.flush()?;
        self.set_now(timestamp);
        maybe_crash(points::COMMIT_BEFORE_WAL_CLEAR);
        self.wal.clear()?;
        self.set_phase(CommitPhase::Idle);
        log_event_with_fields(
            Event::CommitComplete,
            &[("branch", self.branch.clone()), ("timestamp", timestamp.to_string())],
        );
        Ok(())
    }

    /// Writes `request` under an intermediate timestamp that is not exposed
    /// as `now`. Returns the intermediate timestamp the owner should read
    /// at from now on. A flush with nothing to write returns the read
    /// timestamp unchanged.
    pub fn commit_incremental(&self, request: CommitRequest) -> ChronoResult<Timestamp> {
        let _guard = self.try_begin()?;
        let state = self.check_exclusive(request.owner)?;
        let now = self.now();
        let floor = state.map(|s| s.last).unwrap_or(now);

        let mut staged = self.serialize_changes(&request.changes)?;
        self.resolve_conflicts(&mut staged, request.read_timestamp, &request.strategy)?;
        self.eliminate_duplicates(&mut staged, floor)?;
        if staged.is_empty() {
            return Ok(state.map(|s| s.last).unwrap_or(request.read_timestamp));
        }

        let timestamp = self.next_timestamp(floor)?;
        // One token covers the whole sequence; later steps write none.
        if state.is_none() {
            self.wal.set(&WalToken::incremental(self.branch.clone(), timestamp))?;
            self.set_phase(CommitPhase::WalWritten);
        }
        self.apply_changes(timestamp, &staged)?;
        self.set_phase(CommitPhase::Idle);

        let next = IncrementalState {
            owner: request.owner,
            first: state.map(|s| s.first).unwrap_or(timestamp),
            last: timestamp,
        };
        self.set_incremental_state(Some(next));
        log_event_with_fields(
            Event::IncrementalCommitStep,
            &[
                ("branch", self.branch.clone()),
                ("timestamp", timestamp.to_string()),
                ("first", next.first.to_string()),
            ],
        );
        Ok(timestamp)
    }

    /// Discards the open incremental sequence of `owner`, if any.
    pub fn cancel_incremental(&self, owner: Uuid) -> ChronoResult<bool> {
        let _guard = self.commit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        match self.incremental_state() {
            Some(state) if state.owner == owner => {
                let dropped = self.discard_after(self.now())?;
                self.wal.clear()?;
                self.set_incremental_state(None);
                log_event_with_fields(
                    Event::IncrementalCommitCancelled,
                    &[("branch", self.branch.clone()), ("versions", dropped.to_string())],
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Returns true while any incremental sequence is open on this store.
    pub fn is_incremental_commit_in_progress(&self) -> bool {
        self.incremental_state().is_some()
    }
}
