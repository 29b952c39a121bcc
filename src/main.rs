//! chronodb CLI entry point
//!
//! This is a minimal entrypoint that:
//! 1. Parses CLI arguments
//! 2. Installs the log subscriber (`CHRONODB_LOG`, default `info`)
//! 3. Dispatches to CLI commands
//! 4. Prints errors to stdout as JSON and exits non-zero on failure
//!
//! Logs go to stderr so stdout carries only command output.

use std::io;

use chronodb::cli::{self, Cli, CliError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_env("CHRONODB_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(io::stderr))
            .init();
    }
}

fn run(args: Cli) -> Result<(), CliError> {
    let config = cli::load_config(&args.config)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    cli::run_command(&args.command, config, &mut out)
}

fn main() {
    let args = Cli::parse_args();
    init_logging(args.log_json);
    if let Err(e) = run(args) {
        let mut out = io::stdout();
        let _ = cli::write_error(&mut out, e.code_str(), e.message());
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
