//! Branch-aware reads

use std::collections::{BTreeSet, VecDeque};

use super::TemporalKeyValueStore;
use crate::error::{ChronoError, ChronoResult};
use crate::index::{IndexDocument, SearchSpec};
use crate::matrix::{GetResult, HistoryIter};
use crate::temporal::{Period, TemporalKey, Timestamp, MAX_TIMESTAMP};

/// Descending history across a branch and its ancestors.
///
/// Local versions come first, then the parent's versions up to the
/// branching timestamp, and so on up to the master branch.
#[derive(Debug)]
pub struct History {
    segments: VecDeque<HistoryIter>,
}

impl Iterator for History {
    type Item = ChronoResult<Timestamp>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let segment = self.segments.front_mut()?;
            match segment.next() {
                Some(item) => return Some(item),
                None => {
                    self.segments.pop_front();
                }
            }
        }
    }
}

impl TemporalKeyValueStore {
    /// Point-in-time read of raw bytes.
    ///
    /// The returned period contains `timestamp` and is clamped to what is
    /// visible from this branch.
    pub fn get(
        &self,
        timestamp: Timestamp,
        keyspace: &str,
        key: &str,
    ) -> ChronoResult<GetResult<Vec<u8>>> {
        if timestamp == MAX_TIMESTAMP {
            return Err(ChronoError::precondition(
                "cannot read at the open-ended sentinel timestamp",
            ));
        }
        let local = match self.matrix(keyspace) {
            Some(matrix) => matrix.get(timestamp, key)?,
            None => GetResult::miss(
                TemporalKey::new(keyspace, key, timestamp),
                Period::eternal(),
            ),
        };
        let origin = match &self.origin {
            Some(origin) if !local.is_hit() => origin,
            _ => return Ok(local),
        };

        let branching = origin.branching_timestamp;
        let local_ceiling = local.period().upper_bound();
        let inherited = origin.store.get(timestamp.min(branching), keyspace, key)?;
        let parent_period = inherited.period();

        // A parent value still valid at the branching point stays valid on
        // this branch until the first local version.
        let upper = if parent_period.upper_bound() > branching {
            local_ceiling
        } else {
            parent_period.upper_bound().min(local_ceiling)
        };
        let period = Period::new(parent_period.lower_bound(), upper)?;

        let requested = TemporalKey::new(keyspace, key, timestamp);
        let hit = inherited.is_hit();
        let value = inherited.into_value();
        Ok(if hit {
            GetResult::hit(requested, value, period)
        } else {
            GetResult::miss(requested, period)
        })
    }

    /// Versioning timestamps of `key` at or before `timestamp`, descending.
    pub fn history(&self, timestamp: Timestamp, keyspace: &str, key: &str) -> ChronoResult<History> {
        let mut segments = VecDeque::new();
        self.collect_history(timestamp, keyspace, key, &mut segments)?;
        Ok(History { segments })
    }

    fn collect_history(
        &self,
        timestamp: Timestamp,
        keyspace: &str,
        key: &str,
        segments: &mut VecDeque<HistoryIter>,
    ) -> ChronoResult<()> {
        if let Some(matrix) = self.matrix(keyspace) {
            segments.push_back(matrix.history(timestamp, key)?);
        }
        if let Some(origin) = &self.origin {
            let inherited = timestamp.min(origin.branching_timestamp);
            origin.store.collect_history(inherited, keyspace, key, segments)?;
        }
        Ok(())
    }

    /// Keys with a value at `timestamp`.
    pub fn keys(&self, timestamp: Timestamp, keyspace: &str) -> ChronoResult<BTreeSet<String>> {
        let mut keys = match &self.origin {
            Some(origin) => origin
                .store
                .keys(timestamp.min(origin.branching_timestamp), keyspace)?,
            None => BTreeSet::new(),
        };
        if let Some(matrix) = self.matrix(keyspace) {
            let mods = matrix.key_set_modifications(timestamp)?;
            for removed in &mods.removed {
                keys.remove(removed);
            }
            keys.extend(mods.added);
        }
        Ok(keys)
    }

    /// Keyspaces known on this branch or any ancestor.
    pub fn keyspaces(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self.local_keyspaces().into_iter().collect();
        if let Some(origin) = &self.origin {
            names.extend(origin.store.keyspaces());
        }
        names
    }

    /// Keys touched on this branch at or before `timestamp`.
    fn locally_touched(&self, timestamp: Timestamp, keyspace: &str) -> ChronoResult<BTreeSet<String>> {
        match self.matrix(keyspace) {
            Some(matrix) => {
                let mods = matrix.key_set_modifications(timestamp)?;
                Ok(mods.added.into_iter().chain(mods.removed).collect())
            }
            None => Ok(BTreeSet::new()),
        }
    }

    /// Index documents valid at `timestamp` whose value satisfies `spec`.
    pub fn find(
        &self,
        timestamp: Timestamp,
        keyspace: &str,
        index_name: &str,
        spec: &SearchSpec,
    ) -> ChronoResult<Vec<IndexDocument>> {
        let mut docs = self.context.indexes.match_documents(
            timestamp,
            &self.branch,
            keyspace,
            None,
            index_name,
            spec,
        )?;
        if let Some(origin) = &self.origin {
            let inherited = origin.store.find(
                timestamp.min(origin.branching_timestamp),
                keyspace,
                index_name,
                spec,
            )?;
            let touched = self.locally_touched(timestamp, keyspace)?;
            docs.extend(inherited.into_iter().filter(|d| !touched.contains(&d.key)));
        }
        Ok(docs)
    }

    /// Index documents whose validity ended at or before `timestamp`.
    ///
    /// On a branch this includes the ancestors' terminated documents up to
    /// the branching timestamp.
    pub fn find_terminated(
        &self,
        timestamp: Timestamp,
        keyspace: &str,
        index_name: &str,
        spec: &SearchSpec,
    ) -> ChronoResult<Vec<IndexDocument>> {
        let mut docs = self.context.indexes.match_terminated(
            timestamp,
            &self.branch,
            keyspace,
            None,
            index_name,
            spec,
        )?;
        if let Some(origin) = &self.origin {
            let inherited = origin.store.find_terminated(
                timestamp.min(origin.branching_timestamp),
                keyspace,
                index_name,
                spec,
            )?;
            docs.extend(inherited);

            // An inherited document still open at the branching point ends
            // on this branch at the key's first local version.
            let inherited_at = timestamp.min(origin.branching_timestamp);
            let touched = self.locally_touched(timestamp, keyspace)?;
            if !touched.is_empty() {
                for doc in origin.store.find(inherited_at, keyspace, index_name, spec)? {
                    if !touched.contains(&doc.key) {
                        continue;
                    }
                    let first = match self.first_local_version(timestamp, keyspace, &doc.key)? {
                        Some(first) => first,
                        None => continue,
                    };
                    let continued = self
                        .context
                        .indexes
                        .match_documents(first, &self.branch, keyspace, Some(&doc.key), index_name, &SearchSpec::any())?
                        .iter()
                        .any(|local| local.value == doc.value && local.valid_from == first);
                    if !continued {
                        docs.push(doc.terminated_at(first));
                    }
                }
            }
        }
        Ok(docs)
    }

    fn first_local_version(&self, timestamp: Timestamp, keyspace: &str, key: &str) -> ChronoResult<Option<Timestamp>> {
        let matrix = match self.matrix(keyspace) {
            Some(matrix) => matrix,
            None => return Ok(None),
        };
        let mut first = None;
        for version in matrix.history(timestamp, key)? {
            first = Some(version?);
        }
        Ok(first)
    }
}
