//! Crash test harness for subprocess management
//!
//! Runs the `chronodb` binary against a file-backed data directory with a
//! crash point armed, then reopens the directory in-process.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use chronodb::crash_point::CRASH_POINT_ENV;
use chronodb::ChronoDb;
use chronodb::ChronoConfig;
use serde_json::json;
use tempfile::TempDir;

/// Result of one CLI invocation
#[derive(Debug)]
pub struct CrashTestResult {
    /// Whether the process died instead of exiting normally
    pub crashed: bool,
    pub exit_status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
}

/// A data directory plus the config file that points the CLI at it.
pub struct CrashHarness {
    dir: TempDir,
    config_path: PathBuf,
}

impl CrashHarness {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = dir.path().join("chronodb.json");
        let config = json!({
            "backend": "file",
            "data_dir": dir.path().join("data"),
            "clock": "logical",
            "indexes": [
                { "name": "name", "field": "name", "value_type": "string" }
            ]
        });
        fs::write(&config_path, serde_json::to_vec_pretty(&config).unwrap())
            .expect("Failed to write config");
        Self { dir, config_path }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    pub fn config(&self) -> ChronoConfig {
        ChronoConfig::load(&self.config_path).expect("Failed to load config")
    }

    /// Opens the database in-process, running recovery.
    pub fn open(&self) -> ChronoDb {
        ChronoDb::open(self.config()).expect("Failed to open database after crash")
    }

    /// Runs one CLI command, optionally with a crash point armed.
    pub fn run_cli(&self, args: &[&str], crash_point: Option<&str>) -> CrashTestResult {
        let mut command = Command::new(env!("CARGO_BIN_EXE_chronodb"));
        command.arg("--config").arg(&self.config_path).args(args);
        match crash_point {
            Some(point) => command.env(CRASH_POINT_ENV, point),
            None => command.env_remove(CRASH_POINT_ENV),
        };
        execute(command)
    }
}

fn execute(mut command: Command) -> CrashTestResult {
    match command.output() {
        Ok(output) => CrashTestResult {
            // abort() leaves no exit code
            crashed: output.status.code().is_none(),
            exit_status: Some(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        },
        Err(e) => CrashTestResult {
            crashed: false,
            exit_status: None,
            stdout: String::new(),
            stderr: format!("Failed to execute: {}", e),
        },
    }
}

/// Report crash test failure
pub fn report_failure(crash_point: &str, operation: &str, result: &CrashTestResult) {
    eprintln!("=== CRASH TEST FAILURE ===");
    eprintln!("Crash point: {}", crash_point);
    eprintln!("Operation: {}", operation);
    eprintln!("Exit status: {:?}", result.exit_status);
    eprintln!("stdout:\n{}", result.stdout);
    eprintln!("stderr:\n{}", result.stderr);
    eprintln!("==========================");
}

/// True if the journal of `data_dir` exists and is non-empty.
pub fn journal_exists(data_dir: &Path) -> bool {
    fs::metadata(data_dir.join("journal.log"))
        .map(|m| m.len() > 0)
        .unwrap_or(false)
}
