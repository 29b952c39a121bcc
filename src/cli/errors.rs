//! CLI error type
//!
//! Every CLI error ends the process with a non-zero exit code and one
//! `{"status": "error", "code", "message"}` line on stdout.

use std::io;

use thiserror::Error;

use crate::error::ChronoError;

#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration file missing, unreadable or invalid
    #[error("CHRONO_CLI_CONFIG_ERROR: {0}")]
    Config(String),

    /// Files, stdout, or JSON given on the command line
    #[error("CHRONO_CLI_IO_ERROR: {0}")]
    Io(String),

    /// The store rejected the command; keeps the store's error code
    #[error("{code}: {message}")]
    Store { code: &'static str, message: String },
}

impl CliError {
    pub fn code_str(&self) -> &'static str {
        match self {
            CliError::Config(_) => "CHRONO_CLI_CONFIG_ERROR",
            CliError::Io(_) => "CHRONO_CLI_IO_ERROR",
            CliError::Store { code, .. } => code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CliError::Config(message) | CliError::Io(message) => message,
            CliError::Store { message, .. } => message,
        }
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        CliError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Io(format!("JSON error: {}", e))
    }
}

impl From<ChronoError> for CliError {
    fn from(e: ChronoError) -> Self {
        match e {
            ChronoError::Config(message) => CliError::Config(message),
            other => CliError::Store {
                code: other.code(),
                message: other.to_string(),
            },
        }
    }
}

pub type CliResult<T> = Result<T, CliError>;
