//! Begin/complete logging around an operation

use std::time::Instant;

/// Logs `{name}_BEGIN` on creation and `{name}_COMPLETE` or
/// `{name}_FAILED` when finished. Dropping an unfinished scope logs
/// `{name}_INCOMPLETE` at WARN.
pub struct ObservationScope {
    name: &'static str,
    started: Instant,
    finished: bool,
}

impl ObservationScope {
    pub fn new(name: &'static str) -> Self {
        tracing::info!(event = %format!("{}_BEGIN", name));
        Self {
            name,
            started: Instant::now(),
            finished: false,
        }
    }

    pub fn complete(mut self, fields: &[(&str, String)]) {
        self.finished = true;
        let details = fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::info!(
            event = %format!("{}_COMPLETE", self.name),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "{}",
            details
        );
    }

    pub fn fail(mut self, reason: &str) {
        self.finished = true;
        tracing::error!(event = %format!("{}_FAILED", self.name), reason);
    }
}

impl Drop for ObservationScope {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                event = %format!("{}_INCOMPLETE", self.name),
                reason = "scope dropped without completion"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_lifecycle() {
        let scope = ObservationScope::new("REINDEX");
        scope.complete(&[("documents", "3".to_string())]);
        ObservationScope::new("ROLLBACK").fail("busy");
        drop(ObservationScope::new("DUMP"));
    }
}
