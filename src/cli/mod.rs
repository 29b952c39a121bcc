//! CLI module for chronodb
//!
//! Operator commands against a database described by a JSON config file:
//! - branches: list the branch tree
//! - get / history: point-in-time reads
//! - commits: commit timestamps and metadata
//! - rollback: destructive rollback of a branch
//! - reindex: rebuild secondary indexes
//! - export / import: JSON-lines dumps
//! - compact: reclaim journal space
//!
//! Every command writes one JSON object to stdout.

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{load_config, run_command};
pub use errors::{CliError, CliResult};
pub use io::{write_error, write_response};
