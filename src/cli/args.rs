//! CLI argument definitions using clap
//!
//! Commands:
//! - chronodb --config <path> branches
//! - chronodb --config <path> get --key <key> [--branch] [--keyspace] [--at]
//! - chronodb --config <path> put --key <key> --value <json> [--branch] [--keyspace] [--metadata]
//! - chronodb --config <path> remove --key <key> [--branch] [--keyspace] [--metadata]
//! - chronodb --config <path> history --key <key> [--branch] [--keyspace] [--at]
//! - chronodb --config <path> commits [--branch] [--from] [--to] [--descending]
//! - chronodb --config <path> rollback --branch <name> --to <timestamp>
//! - chronodb --config <path> reindex [--index <name>]
//! - chronodb --config <path> export --output <path>
//! - chronodb --config <path> import --input <path>
//! - chronodb --config <path> compact

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// chronodb - an embeddable temporal key-value store
#[derive(Parser, Debug)]
#[command(name = "chronodb")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./chronodb.json")]
    pub config: PathBuf,

    /// Emit log lines as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List branches with their origin and current timestamp
    Branches,

    /// Read one value at a point in time
    Get {
        #[arg(long, default_value = "master")]
        branch: String,
        #[arg(long, default_value = "default")]
        keyspace: String,
        #[arg(long)]
        key: String,
        /// Timestamp to read at (default: the branch's now)
        #[arg(long)]
        at: Option<u64>,
    },

    /// Commit one value
    Put {
        #[arg(long, default_value = "master")]
        branch: String,
        #[arg(long, default_value = "default")]
        keyspace: String,
        #[arg(long)]
        key: String,
        /// JSON value
        #[arg(long)]
        value: String,
        /// JSON commit metadata
        #[arg(long)]
        metadata: Option<String>,
    },

    /// Commit the removal of one key
    Remove {
        #[arg(long, default_value = "master")]
        branch: String,
        #[arg(long, default_value = "default")]
        keyspace: String,
        #[arg(long)]
        key: String,
        #[arg(long)]
        metadata: Option<String>,
    },

    /// List the versioning timestamps of one key, newest first
    History {
        #[arg(long, default_value = "master")]
        branch: String,
        #[arg(long, default_value = "default")]
        keyspace: String,
        #[arg(long)]
        key: String,
        #[arg(long)]
        at: Option<u64>,
    },

    /// List commits in an inclusive timestamp range
    Commits {
        #[arg(long, default_value = "master")]
        branch: String,
        #[arg(long, default_value_t = 0)]
        from: u64,
        /// Upper bound (default: the branch's now)
        #[arg(long)]
        to: Option<u64>,
        #[arg(long)]
        descending: bool,
    },

    /// Destructively roll a branch back to a timestamp
    Rollback {
        #[arg(long)]
        branch: String,
        #[arg(long)]
        to: u64,
    },

    /// Rebuild one index, or every index with a configured indexer
    Reindex {
        #[arg(long)]
        index: Option<String>,
    },

    /// Write a JSON-lines dump of every branch
    Export {
        #[arg(long)]
        output: PathBuf,
    },

    /// Load a JSON-lines dump
    Import {
        #[arg(long)]
        input: PathBuf,
    },

    /// Rewrite the journal without overwritten or deleted entries
    Compact,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
