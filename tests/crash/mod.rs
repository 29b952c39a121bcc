//! Crash testing framework for chronodb
//!
//! - Crash injection at deterministic points via `CHRONODB_CRASH_POINT`
//! - Subprocess management
//! - Post-crash validation through a regular open

pub mod harness;
pub mod scenarios;

pub use harness::*;
