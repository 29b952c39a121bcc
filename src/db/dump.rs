//! Dump export and import
//!
//! A dump is a JSON-lines stream. Each branch record is followed by that
//! branch's commits and local versions; branches appear parents first, so
//! a dump can be imported in one pass.
//!
//! ```text
//! {"type":"header","format":"chronodb-dump","version":1}
//! {"type":"branch","name":"master","parent":null,"branching_timestamp":0}
//! {"type":"commit","branch":"master","timestamp":3,"metadata":"init"}
//! {"type":"entry","branch":"master","keyspace":"default","key":"k","timestamp":3,"value":"InYi"}
//! ```
//!
//! Values are the stored bytes, base64-encoded; a `null` value is a
//! tombstone.

use std::collections::BTreeMap;
use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::branch::{BranchManager, BranchMetadata};
use crate::error::{ChronoError, ChronoResult};
use crate::matrix::MatrixEntry;
use crate::serialization::base64_bytes;
use crate::temporal::Timestamp;

const DUMP_FORMAT: &str = "chronodb-dump";
const DUMP_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DumpRecord {
    Header {
        format: String,
        version: u32,
    },
    Branch {
        name: String,
        parent: Option<String>,
        branching_timestamp: Timestamp,
    },
    Commit {
        branch: String,
        timestamp: Timestamp,
        #[serde(default)]
        metadata: Option<Value>,
    },
    Entry {
        branch: String,
        keyspace: String,
        key: String,
        timestamp: Timestamp,
        #[serde(with = "base64_bytes", default)]
        value: Option<Vec<u8>>,
    },
}

/// Counts reported by export and import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpStats {
    pub branches: usize,
    pub commits: usize,
    pub entries: usize,
}

fn write_record<W: Write>(writer: &mut W, record: &DumpRecord) -> ChronoResult<()> {
    serde_json::to_writer(&mut *writer, record)?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// Writes every branch with its local history.
pub(crate) fn export<W: Write>(branches: &BranchManager, writer: &mut W) -> ChronoResult<DumpStats> {
    let mut stats = DumpStats::default();
    write_record(
        writer,
        &DumpRecord::Header {
            format: DUMP_FORMAT.to_string(),
            version: DUMP_VERSION,
        },
    )?;
    for branch in branches.branches() {
        let metadata = branch.metadata();
        write_record(
            writer,
            &DumpRecord::Branch {
                name: metadata.name.clone(),
                parent: metadata.parent.clone(),
                branching_timestamp: metadata.branching_timestamp,
            },
        )?;
        stats.branches += 1;

        let snapshot = branch.store().committed_snapshot()?;
        for (timestamp, commit_metadata) in snapshot.commits {
            write_record(
                writer,
                &DumpRecord::Commit {
                    branch: metadata.name.clone(),
                    timestamp,
                    metadata: commit_metadata,
                },
            )?;
            stats.commits += 1;
        }
        for (keyspace, entries) in snapshot.entries {
            for entry in entries {
                let value = if entry.is_tombstone() { None } else { Some(entry.value) };
                write_record(
                    writer,
                    &DumpRecord::Entry {
                        branch: metadata.name.clone(),
                        keyspace: keyspace.clone(),
                        key: entry.key,
                        timestamp: entry.timestamp,
                        value,
                    },
                )?;
                stats.entries += 1;
            }
        }
    }
    writer.flush()?;
    Ok(stats)
}

/// History of one branch collected from the stream
#[derive(Debug, Default)]
struct PendingBranch {
    commits: Vec<(Timestamp, Option<Value>)>,
    entries: BTreeMap<String, Vec<MatrixEntry>>,
}

/// Loads a dump. Branches that already exist receive the versions; new
/// branches are created first. Index documents are not derived.
pub(crate) fn import<R: BufRead>(branches: &BranchManager, reader: R) -> ChronoResult<DumpStats> {
    let mut stats = DumpStats::default();
    let mut current: Option<(String, PendingBranch)> = None;
    let mut header_seen = false;

    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: DumpRecord = serde_json::from_str(&line).map_err(|e| {
            ChronoError::Corruption(format!("dump line {}: {}", number + 1, e))
        })?;
        match record {
            DumpRecord::Header { format, version } => {
                if format != DUMP_FORMAT || version != DUMP_VERSION {
                    return Err(ChronoError::Corruption(format!(
                        "unsupported dump format {} version {}",
                        format, version
                    )));
                }
                header_seen = true;
            }
            _ if !header_seen => {
                return Err(ChronoError::Corruption("dump does not start with a header".to_string()));
            }
            DumpRecord::Branch {
                name,
                parent,
                branching_timestamp,
            } => {
                if let Some((previous, pending)) = current.take() {
                    apply(branches, &previous, pending, &mut stats)?;
                }
                if !branches.exists(&name) {
                    match parent {
                        Some(parent) => {
                            branches.create_branch(BranchMetadata::child(name.clone(), parent, branching_timestamp))?;
                        }
                        None => {
                            branches.create_master_branch()?;
                        }
                    }
                }
                stats.branches += 1;
                current = Some((name, PendingBranch::default()));
            }
            DumpRecord::Commit {
                branch,
                timestamp,
                metadata,
            } => {
                let pending = pending_for(&mut current, &branch)?;
                pending.commits.push((timestamp, metadata));
            }
            DumpRecord::Entry {
                branch,
                keyspace,
                key,
                timestamp,
                value,
            } => {
                let pending = pending_for(&mut current, &branch)?;
                pending.entries.entry(keyspace).or_default().push(MatrixEntry {
                    key,
                    timestamp,
                    value: value.unwrap_or_default(),
                });
            }
        }
    }
    if let Some((previous, pending)) = current.take() {
        apply(branches, &previous, pending, &mut stats)?;
    }
    Ok(stats)
}

fn pending_for<'a>(
    current: &'a mut Option<(String, PendingBranch)>,
    branch: &str,
) -> ChronoResult<&'a mut PendingBranch> {
    match current {
        Some((name, pending)) if name == branch => Ok(pending),
        _ => Err(ChronoError::Corruption(format!(
            "dump record for branch '{}' outside its branch section",
            branch
        ))),
    }
}

fn apply(
    branches: &BranchManager,
    name: &str,
    pending: PendingBranch,
    stats: &mut DumpStats,
) -> ChronoResult<()> {
    let store = branches.get_branch(name)?.store().clone();
    for (keyspace, entries) in &pending.entries {
        stats.entries += store.import_versions(keyspace, entries)?;
    }
    for (timestamp, metadata) in &pending.commits {
        store.commits().record(*timestamp, metadata.as_ref())?;
        stats.commits += 1;
    }
    store.refresh_now()?;
    Ok(())
}
