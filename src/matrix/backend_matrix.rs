//! Matrix over a `StorageBackend`

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

use tracing::trace;

use super::{GetResult, HistoryIter, KeySetModifications, MatrixEntry, TemporalMatrix};
use crate::backend::codec::{encode_str, encode_u64, prefix_successor, KeyReader};
use crate::backend::{BatchOp, ScanRange, StorageBackend};
use crate::error::{ChronoError, ChronoResult};
use crate::temporal::{Period, TemporalKey, Timestamp, MAX_TIMESTAMP};

/// Versioned key-value table of one keyspace on one branch.
pub struct BackendMatrix {
    backend: Arc<dyn StorageBackend>,
    keyspace: String,
    forward_table: String,
    inverse_table: String,
}

impl fmt::Debug for BackendMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendMatrix")
            .field("keyspace", &self.keyspace)
            .field("forward_table", &self.forward_table)
            .finish()
    }
}

impl BackendMatrix {
    pub fn new(backend: Arc<dyn StorageBackend>, branch: &str, keyspace: &str) -> Self {
        Self {
            backend,
            keyspace: keyspace.to_string(),
            forward_table: format!("{}::matrix::{}", branch, keyspace),
            inverse_table: format!("{}::inverse::{}", branch, keyspace),
        }
    }

    fn key_prefix(key: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(key.len() + 2);
        encode_str(&mut buf, key);
        buf
    }

    fn forward_key(key: &str, timestamp: Timestamp) -> Vec<u8> {
        let mut buf = Self::key_prefix(key);
        encode_u64(&mut buf, timestamp);
        buf
    }

    fn inverse_key(timestamp: Timestamp, key: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(key.len() + 10);
        encode_u64(&mut buf, timestamp);
        encode_str(&mut buf, key);
        buf
    }

    fn decode_forward(raw: &[u8]) -> ChronoResult<(String, Timestamp)> {
        let mut reader = KeyReader::new(raw);
        let key = reader.read_str()?;
        let ts = reader.read_u64()?;
        Ok((key, ts))
    }

    fn decode_inverse(raw: &[u8]) -> ChronoResult<(Timestamp, String)> {
        let mut reader = KeyReader::new(raw);
        let ts = reader.read_u64()?;
        let key = reader.read_str()?;
        Ok((ts, key))
    }

    fn timestamp_bound(timestamp: Timestamp) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8);
        encode_u64(&mut buf, timestamp);
        buf
    }

    /// Writes inverse entries before forward entries, so any forward
    /// version is always reachable from the inverse table.
    fn write_versions(&self, versions: Vec<(String, Timestamp, Vec<u8>)>) -> ChronoResult<()> {
        if versions.is_empty() {
            return Ok(());
        }
        let inverse_ops = versions
            .iter()
            .map(|(key, ts, _)| BatchOp::put(Self::inverse_key(*ts, key), Vec::new()))
            .collect();
        let forward_ops = versions
            .into_iter()
            .map(|(key, ts, value)| BatchOp::put(Self::forward_key(&key, ts), value))
            .collect();
        self.backend.write_batch(&self.inverse_table, inverse_ops)?;
        self.backend.write_batch(&self.forward_table, forward_ops)?;
        Ok(())
    }
}

impl TemporalMatrix for BackendMatrix {
    fn keyspace(&self) -> &str {
        &self.keyspace
    }

    fn get(&self, timestamp: Timestamp, key: &str) -> ChronoResult<GetResult<Vec<u8>>> {
        if timestamp == MAX_TIMESTAMP {
            return Err(ChronoError::precondition(
                "cannot read at the open-ended sentinel timestamp",
            ));
        }
        let requested = TemporalKey::new(self.keyspace.clone(), key, timestamp);
        let prefix = Self::key_prefix(key);
        let at = Self::forward_key(key, timestamp);

        let floor_range = ScanRange::new(Bound::Included(prefix.clone()), Bound::Included(at.clone()))
            .reversed()
            .limited(1);
        let floor = self.backend.scan(&self.forward_table, &floor_range)?.pop();

        let ceiling_end = match prefix_successor(&prefix) {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };
        let ceiling_range = ScanRange::new(Bound::Excluded(at), ceiling_end).limited(1);
        let ceiling = match self.backend.scan(&self.forward_table, &ceiling_range)?.pop() {
            Some((raw, _)) => Self::decode_forward(&raw)?.1,
            None => MAX_TIMESTAMP,
        };

        match floor {
            None => Ok(GetResult::miss(requested, Period::new(0, ceiling)?)),
            Some((raw, value)) => {
                let (_, floor_ts) = Self::decode_forward(&raw)?;
                let period = Period::new(floor_ts, ceiling)?;
                let value = if value.is_empty() { None } else { Some(value) };
                Ok(GetResult::hit(requested, value, period))
            }
        }
    }

    fn put(
        &self,
        timestamp: Timestamp,
        contents: &BTreeMap<String, Option<Vec<u8>>>,
    ) -> ChronoResult<()> {
        if timestamp == MAX_TIMESTAMP {
            return Err(ChronoError::precondition(
                "the open-ended sentinel is not a valid commit timestamp",
            ));
        }
        let mut versions = Vec::with_capacity(contents.len());
        for (key, value) in contents {
            let bytes = match value {
                Some(v) if v.is_empty() => {
                    return Err(ChronoError::precondition(format!(
                        "zero-length value for key '{}' is reserved for tombstones",
                        key
                    )))
                }
                Some(v) => v.clone(),
                None => Vec::new(),
            };
            versions.push((key.clone(), timestamp, bytes));
        }
        trace!(keyspace = %self.keyspace, timestamp, count = versions.len(), "matrix put");
        self.write_versions(versions)
    }

    fn insert_entries(&self, entries: &[MatrixEntry]) -> ChronoResult<()> {
        self.write_versions(
            entries
                .iter()
                .map(|e| (e.key.clone(), e.timestamp, e.value.clone()))
                .collect(),
        )
    }

    fn history(&self, max_time: Timestamp, key: &str) -> ChronoResult<HistoryIter> {
        Ok(HistoryIter::new(
            Arc::clone(&self.backend),
            self.forward_table.clone(),
            Self::key_prefix(key),
            max_time,
        ))
    }

    fn key_set_modifications(&self, timestamp: Timestamp) -> ChronoResult<KeySetModifications> {
        // Forward order is (key, timestamp): the last qualifying version of
        // each key group is its state at `timestamp`.
        let mut latest: BTreeMap<String, bool> = BTreeMap::new();
        for (raw, value) in self.backend.scan(&self.forward_table, &ScanRange::all())? {
            let (key, ts) = Self::decode_forward(&raw)?;
            if ts <= timestamp {
                latest.insert(key, !value.is_empty());
            }
        }
        let mut result = KeySetModifications::default();
        for (key, present) in latest {
            if present {
                result.added.insert(key);
            } else {
                result.removed.insert(key);
            }
        }
        Ok(result)
    }

    fn modifications_between(
        &self,
        low: Timestamp,
        high: Timestamp,
    ) -> ChronoResult<Vec<TemporalKey>> {
        if low >= high {
            return Ok(Vec::new());
        }
        let range = ScanRange::new(
            Bound::Included(Self::timestamp_bound(low)),
            Bound::Excluded(Self::timestamp_bound(high)),
        );
        self.backend
            .scan(&self.inverse_table, &range)?
            .into_iter()
            .map(|(raw, _)| -> ChronoResult<TemporalKey> {
                let (ts, key) = Self::decode_inverse(&raw)?;
                Ok(TemporalKey::new(self.keyspace.clone(), key, ts))
            })
            .collect()
    }

    fn rollback(&self, timestamp: Timestamp) -> ChronoResult<usize> {
        if timestamp == MAX_TIMESTAMP {
            return Ok(0);
        }
        let range = ScanRange::new(
            Bound::Excluded(Self::timestamp_bound(timestamp)),
            Bound::Unbounded,
        );
        let doomed = self.backend.scan(&self.inverse_table, &range)?;
        if doomed.is_empty() {
            return Ok(0);
        }
        let mut forward_ops = Vec::with_capacity(doomed.len());
        let mut inverse_ops = Vec::with_capacity(doomed.len());
        for (raw, _) in doomed {
            let (ts, key) = Self::decode_inverse(&raw)?;
            forward_ops.push(BatchOp::delete(Self::forward_key(&key, ts)));
            inverse_ops.push(BatchOp::delete(raw));
        }
        let count = forward_ops.len();
        self.backend.write_batch(&self.forward_table, forward_ops)?;
        self.backend.write_batch(&self.inverse_table, inverse_ops)?;
        Ok(count)
    }

    fn all_entries(&self) -> ChronoResult<Vec<MatrixEntry>> {
        let mut entries = Vec::new();
        for (raw, value) in self.backend.scan(&self.forward_table, &ScanRange::all())? {
            let (key, timestamp) = Self::decode_forward(&raw)?;
            entries.push(MatrixEntry {
                key,
                timestamp,
                value,
            });
        }
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.key.cmp(&b.key)));
        Ok(entries)
    }

    fn last_timestamp(&self) -> ChronoResult<Option<Timestamp>> {
        let range = ScanRange::all().reversed().limited(1);
        match self.backend.scan(&self.inverse_table, &range)?.pop() {
            Some((raw, _)) => Ok(Some(Self::decode_inverse(&raw)?.0)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn matrix() -> BackendMatrix {
        BackendMatrix::new(Arc::new(MemoryBackend::new()), "master", "default")
    }

    fn put(m: &BackendMatrix, ts: Timestamp, key: &str, value: Option<&str>) {
        let mut contents = BTreeMap::new();
        contents.insert(key.to_string(), value.map(|v| v.as_bytes().to_vec()));
        m.put(ts, &contents).unwrap();
    }

    #[test]
    fn test_get_before_first_version_is_miss() {
        let m = matrix();
        put(&m, 10, "k", Some("a"));
        let result = m.get(5, "k").unwrap();
        assert!(!result.is_hit());
        assert_eq!(result.period(), Period::new(0, 10).unwrap());
    }

    #[test]
    fn test_get_uses_floor_and_ceiling() {
        let m = matrix();
        put(&m, 10, "k", Some("a"));
        put(&m, 20, "k", Some("b"));

        let first = m.get(15, "k").unwrap();
        assert_eq!(first.value(), Some(&b"a".to_vec()));
        assert_eq!(first.period(), Period::new(10, 20).unwrap());

        let second = m.get(20, "k").unwrap();
        assert_eq!(second.value(), Some(&b"b".to_vec()));
        assert!(second.period().is_open_ended());
    }

    #[test]
    fn test_tombstone_is_hit_without_value() {
        let m = matrix();
        put(&m, 1, "k", Some("a"));
        put(&m, 2, "k", None);
        let result = m.get(3, "k").unwrap();
        assert!(result.is_hit());
        assert!(result.value().is_none());
        let history: Vec<_> = m.history(3, "k").unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(history, vec![2, 1]);
    }

    #[test]
    fn test_empty_value_is_rejected() {
        let m = matrix();
        let mut contents = BTreeMap::new();
        contents.insert("k".to_string(), Some(Vec::new()));
        assert!(m.put(1, &contents).is_err());
    }

    #[test]
    fn test_keys_with_shared_prefix_do_not_mix() {
        let m = matrix();
        put(&m, 1, "a", Some("1"));
        put(&m, 2, "ab", Some("2"));
        assert_eq!(m.get(5, "a").unwrap().period(), Period::open_ended_from(1).unwrap());
        let history: Vec<_> = m.history(5, "a").unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(history, vec![1]);
    }

    #[test]
    fn test_history_pages_through_many_versions() {
        let m = matrix();
        for ts in 1..=200 {
            put(&m, ts, "k", Some("v"));
        }
        let history: Vec<_> = m.history(150, "k").unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(history.len(), 150);
        assert_eq!(history[0], 150);
        assert_eq!(history[149], 1);
    }

    #[test]
    fn test_key_set_modifications() {
        let m = matrix();
        put(&m, 1, "a", Some("1"));
        put(&m, 2, "b", Some("2"));
        put(&m, 3, "a", None);
        let mods = m.key_set_modifications(2).unwrap();
        assert!(mods.added.contains("a") && mods.added.contains("b"));
        let mods = m.key_set_modifications(3).unwrap();
        assert!(mods.removed.contains("a"));
        assert!(mods.added.contains("b"));
    }

    #[test]
    fn test_modifications_between_is_half_open() {
        let m = matrix();
        put(&m, 1, "a", Some("1"));
        put(&m, 2, "b", Some("2"));
        put(&m, 3, "c", Some("3"));
        let keys: Vec<_> = m
            .modifications_between(1, 3)
            .unwrap()
            .into_iter()
            .map(|k| k.key().to_string())
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_rollback_drops_later_versions() {
        let m = matrix();
        put(&m, 1, "a", Some("1"));
        put(&m, 2, "a", Some("2"));
        put(&m, 3, "b", Some("3"));
        assert_eq!(m.rollback(1).unwrap(), 2);
        assert_eq!(m.get(10, "a").unwrap().value(), Some(&b"1".to_vec()));
        assert!(!m.get(10, "b").unwrap().is_hit());
        assert!(m.modifications_between(2, 10).unwrap().is_empty());
        assert_eq!(m.last_timestamp().unwrap(), Some(1));
    }

    #[test]
    fn test_insert_entries_is_idempotent() {
        let m = matrix();
        let entries = vec![
            MatrixEntry { key: "x".into(), timestamp: 2, value: b"2".to_vec() },
            MatrixEntry { key: "x".into(), timestamp: 1, value: b"1".to_vec() },
        ];
        m.insert_entries(&entries).unwrap();
        m.insert_entries(&entries).unwrap();
        let all = m.all_entries().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].timestamp, 1);
    }
}
