//! Observability
//!
//! Typed lifecycle events emitted through `tracing`. The library never
//! installs a subscriber; the binary does (see `main.rs`).
//!
//! ```ignore
//! use chronodb::observability::{log_event, Event};
//!
//! log_event(Event::CommitComplete, &[("branch", "master"), ("timestamp", "42")]);
//! ```

mod events;
mod scope;

pub use events::Event;
pub use scope::ObservationScope;

/// Emits `event` at a level derived from its class.
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    let details = format_fields(fields);
    if event.is_fatal() {
        tracing::error!(event = event.as_str(), "{}", details);
    } else if event.is_warning() {
        tracing::warn!(event = event.as_str(), "{}", details);
    } else {
        tracing::info!(event = event.as_str(), "{}", details);
    }
}

/// Same as [`log_event`] with owned field values.
pub fn log_event_with_fields(event: Event, fields: &[(&str, String)]) {
    let borrowed: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
    log_event(event, &borrowed);
}

fn format_fields(fields: &[(&str, &str)]) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_fields_is_ordered() {
        assert_eq!(format_fields(&[("a", "1"), ("b", "two")]), "a=1 b=two");
        assert_eq!(format_fields(&[]), "");
    }

    #[test]
    fn test_log_without_subscriber_is_noop() {
        log_event(Event::CommitComplete, &[("branch", "master")]);
        log_event_with_fields(Event::RecoveryFailed, &[("reason", "test".to_string())]);
    }
}
