//! Crash point injection for durability testing
//!
//! Crash points are enabled through the `CHRONODB_CRASH_POINT` environment
//! variable. When the named point is reached the process terminates via
//! `std::process::abort()`: no cleanup, no unwinding, no catching.
//!
//! ```bash
//! CHRONODB_CRASH_POINT=commit_after_wal chronodb --config db.json import --input dump.jsonl
//! ```

use std::sync::OnceLock;

pub const CRASH_POINT_ENV: &str = "CHRONODB_CRASH_POINT";

static CRASH_POINT: OnceLock<Option<String>> = OnceLock::new();

#[inline]
fn get_crash_point() -> Option<&'static str> {
    CRASH_POINT
        .get_or_init(|| std::env::var(CRASH_POINT_ENV).ok())
        .as_deref()
}

/// Returns true if `CHRONODB_CRASH_POINT` equals `name`.
#[inline]
pub fn crash_point_enabled(name: &str) -> bool {
    get_crash_point().map(|p| p == name).unwrap_or(false)
}

/// Aborts the process if the named crash point is enabled.
#[inline]
pub fn maybe_crash(name: &str) {
    if crash_point_enabled(name) {
        eprintln!("[CRASH] Triggering crash at point: {}", name);
        std::process::abort();
    }
}

/// Crash points of the commit protocol
pub mod points {
    /// WAL token durable, no matrix touched
    pub const COMMIT_AFTER_WAL: &str = "commit_after_wal";
    /// Matrices written, index not yet updated
    pub const COMMIT_AFTER_MATRICES: &str = "commit_after_matrices";
    /// Index updated, commit metadata not yet recorded
    pub const COMMIT_AFTER_INDEX: &str = "commit_after_index";
    /// Metadata recorded and `now` advanced, token still present
    pub const COMMIT_BEFORE_WAL_CLEAR: &str = "commit_before_wal_clear";

    pub fn all() -> &'static [&'static str] {
        &[
            COMMIT_AFTER_WAL,
            COMMIT_AFTER_MATRICES,
            COMMIT_AFTER_INDEX,
            COMMIT_BEFORE_WAL_CLEAR,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crash_point_disabled_by_default() {
        assert!(!crash_point_enabled("test_point"));
        maybe_crash("test_point");
    }

    #[test]
    fn test_crash_point_names_are_lowercase_with_underscores() {
        for point in points::all() {
            assert!(
                point.chars().all(|c| c.is_lowercase() || c == '_'),
                "Crash point '{}' should be lowercase with underscores",
                point
            );
        }
    }
}
