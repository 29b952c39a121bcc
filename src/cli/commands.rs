//! CLI command implementations
//!
//! Each command opens the database, runs, and closes it cleanly, so an
//! operator command never leaves indexes dirty behind it.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde_json::{json, Value};

use crate::db::{ChronoConfig, ChronoDb};
use crate::temporal::MAX_TIMESTAMP;
use crate::tkvs::Order;
use crate::txn::TransactionConfig;

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::write_response;

/// Loads the configuration at `path`.
pub fn load_config(path: &Path) -> CliResult<ChronoConfig> {
    if !path.exists() {
        return Err(CliError::Config(format!(
            "config file not found: {}",
            path.display()
        )));
    }
    Ok(ChronoConfig::load(path)?)
}

/// Runs `command` against a database opened from `config` and writes the
/// JSON response to `out`.
pub fn run_command<W: Write>(command: &Command, config: ChronoConfig, out: &mut W) -> CliResult<()> {
    let db = ChronoDb::open(config)?;
    let data = execute(&db, command);
    db.close()?;
    write_response(out, data?)
}

fn upper_bound(timestamp: u64) -> Value {
    if timestamp == MAX_TIMESTAMP {
        Value::Null
    } else {
        json!(timestamp)
    }
}

fn execute(db: &ChronoDb, command: &Command) -> CliResult<Value> {
    match command {
        Command::Branches => {
            let branches: Vec<Value> = db
                .branch_manager()
                .branches()
                .iter()
                .map(|b| {
                    json!({
                        "name": b.name(),
                        "parent": b.metadata().parent,
                        "branching_timestamp": b.branching_timestamp(),
                        "now": b.now(),
                    })
                })
                .collect();
            Ok(json!(branches))
        }

        Command::Get {
            branch,
            keyspace,
            key,
            at,
        } => {
            let tx = open_reader(db, branch, *at)?;
            let result = tx.get_result(keyspace, key)?;
            let period = result.period();
            Ok(json!({
                "branch": branch,
                "keyspace": keyspace,
                "key": key,
                "timestamp": tx.timestamp(),
                "value": result.value(),
                "valid_from": period.lower_bound(),
                "valid_to": upper_bound(period.upper_bound()),
            }))
        }

        Command::Put {
            branch,
            keyspace,
            key,
            value,
            metadata,
        } => {
            let value: Value = serde_json::from_str(value)?;
            let mut tx = db.tx_on(branch)?;
            tx.put(keyspace, key, value)?;
            let timestamp = tx.commit(parse_metadata(metadata.as_deref())?)?;
            Ok(json!({ "branch": branch, "key": key, "timestamp": timestamp }))
        }

        Command::Remove {
            branch,
            keyspace,
            key,
            metadata,
        } => {
            let mut tx = db.tx_on(branch)?;
            tx.remove(keyspace, key)?;
            let timestamp = tx.commit(parse_metadata(metadata.as_deref())?)?;
            Ok(json!({ "branch": branch, "key": key, "timestamp": timestamp }))
        }

        Command::History {
            branch,
            keyspace,
            key,
            at,
        } => {
            let tx = open_reader(db, branch, *at)?;
            let timestamps = tx
                .history(keyspace, key)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(json!({ "key": key, "history": timestamps }))
        }

        Command::Commits {
            branch,
            from,
            to,
            descending,
        } => {
            let tx = open_reader(db, branch, None)?;
            let to = to.unwrap_or_else(|| tx.timestamp());
            let order = if *descending { Order::Descending } else { Order::Ascending };
            let mut commits = Vec::new();
            for timestamp in tx.commit_timestamps_between(*from, to, order)? {
                commits.push(json!({
                    "timestamp": timestamp,
                    "metadata": tx.commit_metadata(timestamp)?,
                }));
            }
            Ok(json!(commits))
        }

        Command::Rollback { branch, to } => {
            let dropped = db.rollback_branch(branch, *to)?;
            Ok(json!({ "branch": branch, "now": db.get_branch(branch)?.now(), "versions_dropped": dropped }))
        }

        Command::Reindex { index } => match index {
            Some(name) => {
                let versions = db.reindex(name)?;
                Ok(json!({ "index": name, "versions": versions }))
            }
            None => Ok(json!({ "indexes": db.reindex_all()? })),
        },

        Command::Export { output } => {
            let mut writer = BufWriter::new(File::create(output)?);
            let stats = db.export_dump(&mut writer)?;
            Ok(json!({
                "branches": stats.branches,
                "commits": stats.commits,
                "entries": stats.entries,
            }))
        }

        Command::Import { input } => {
            let reader = BufReader::new(File::open(input)?);
            let stats = db.import_dump(reader)?;
            Ok(json!({
                "branches": stats.branches,
                "commits": stats.commits,
                "entries": stats.entries,
            }))
        }

        Command::Compact => Ok(json!({ "bytes": db.compact()? })),
    }
}

fn parse_metadata(metadata: Option<&str>) -> CliResult<Option<Value>> {
    Ok(metadata.map(serde_json::from_str).transpose()?)
}

fn open_reader(db: &ChronoDb, branch: &str, at: Option<u64>) -> CliResult<crate::txn::Transaction> {
    let mut config = TransactionConfig::default().read_only();
    config.timestamp = at;
    Ok(db.tx_with(branch, config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temporal::ClockKind;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> ChronoConfig {
        ChronoConfig::file(dir.path().join("data")).with_clock(ClockKind::Logical)
    }

    fn run(command: Command, config: ChronoConfig) -> Value {
        let mut out = Vec::new();
        run_command(&command, config, &mut out).unwrap();
        let response: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(response["status"], "ok");
        response["data"].clone()
    }

    fn seed(config: &ChronoConfig) {
        run(
            Command::Put {
                branch: "master".into(),
                keyspace: "default".into(),
                key: "Hello".into(),
                value: "\"World\"".into(),
                metadata: Some("\"seed\"".into()),
            },
            config.clone(),
        );
    }

    #[test]
    fn test_get_and_commits() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        seed(&config);

        let data = run(
            Command::Get {
                branch: "master".into(),
                keyspace: "default".into(),
                key: "Hello".into(),
                at: None,
            },
            config.clone(),
        );
        assert_eq!(data["value"], "World");
        assert!(data["valid_to"].is_null());

        let commits = run(
            Command::Commits {
                branch: "master".into(),
                from: 0,
                to: None,
                descending: false,
            },
            config,
        );
        assert_eq!(commits[0]["metadata"], "seed");
    }

    #[test]
    fn test_export_import_round_trip() {
        let dir = TempDir::new().unwrap();
        let source = config(&dir);
        seed(&source);
        let dump = dir.path().join("dump.jsonl");
        let exported = run(Command::Export { output: dump.clone() }, source);
        assert_eq!(exported["entries"], 1);

        let target = ChronoConfig::file(dir.path().join("copy")).with_clock(ClockKind::Logical);
        run(Command::Import { input: dump }, target.clone());
        let branches = run(Command::Branches, target);
        assert_eq!(branches[0]["name"], "master");
        assert_eq!(branches[0]["now"], 1);
    }

    #[test]
    fn test_remove_and_history() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        seed(&config);
        let removed = run(
            Command::Remove {
                branch: "master".into(),
                keyspace: "default".into(),
                key: "Hello".into(),
                metadata: None,
            },
            config.clone(),
        );
        assert_eq!(removed["timestamp"], 2);

        let history = run(
            Command::History {
                branch: "master".into(),
                keyspace: "default".into(),
                key: "Hello".into(),
                at: None,
            },
            config,
        );
        assert_eq!(history["history"], json!([2, 1]));
    }

    #[test]
    fn test_invalid_value_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let mut out = Vec::new();
        let err = run_command(
            &Command::Put {
                branch: "master".into(),
                keyspace: "default".into(),
                key: "k".into(),
                value: "not json".into(),
                metadata: None,
            },
            config(&dir),
            &mut out,
        )
        .unwrap_err();
        assert_eq!(err.code_str(), "CHRONO_CLI_IO_ERROR");
    }

    #[test]
    fn test_unknown_branch_is_reported() {
        let dir = TempDir::new().unwrap();
        let mut out = Vec::new();
        let err = run_command(
            &Command::Rollback {
                branch: "nope".into(),
                to: 0,
            },
            config(&dir),
            &mut out,
        )
        .unwrap_err();
        assert_eq!(err.code_str(), "CHRONO_UNKNOWN_BRANCH");
        assert!(out.is_empty());
    }

    #[test]
    fn test_missing_config_file() {
        let dir = TempDir::new().unwrap();
        let err = load_config(&dir.path().join("missing.json")).unwrap_err();
        assert_eq!(err.code_str(), "CHRONO_CLI_CONFIG_ERROR");
    }
}
