//! Telemetry error taxonomy built on the shared generic error classifier.
//!
//! Unlike the hook engine's classifier, the telemetry side never grades
//! severity distinctly per category — it only counts and disables — so
//! every category here returns the default `Medium` severity.

use codex_protocol::error_classifier::ErrorCategory;
use codex_protocol::error_classifier::ErrorClassifier;

#[derive(Debug, Clone, Copy)]
pub enum TelemetryErrorCategory {
    Storage,
    Instrumentation,
    Serialization,
    Collection,
}

impl ErrorCategory for TelemetryErrorCategory {
    fn key(&self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::Instrumentation => "instrumentation",
            Self::Serialization => "serialization",
            Self::Collection => "collection",
        }
    }
}

pub type TelemetryErrorClassifier = ErrorClassifier<TelemetryErrorCategory>;

/// Record a storage-subsystem error under a `"storage_{operation}"`
/// component key, returning whether persistent storage for this session
/// should now be considered disabled.
pub fn handle_storage_error(
    classifier: &TelemetryErrorClassifier,
    operation: &str,
    message: impl Into<String>,
) -> bool {
    let component = format!("storage_{operation}");
    let disabled = classifier.record(&component, TelemetryErrorCategory::Storage, message);
    if disabled {
        classifier.disable_component("persistent_storage");
    }
    disabled
}

/// Instrumentation failures disable their component immediately, rather
/// than waiting for the error-count threshold: a broken instrumentation
/// wrapper can otherwise emit unbounded spurious spans on every tool call.
pub fn handle_instrumentation_error(
    classifier: &TelemetryErrorClassifier,
    component: &str,
    message: impl Into<String>,
) {
    classifier.record(component, TelemetryErrorCategory::Instrumentation, message);
    classifier.disable_component(component);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_key_format_matches_reference() {
        let classifier = TelemetryErrorClassifier::new(2);
        assert!(!handle_storage_error(&classifier, "flush", "disk full"));
        assert!(handle_storage_error(&classifier, "flush", "disk full again"));
        assert!(classifier.is_component_disabled("persistent_storage"));
    }

    #[test]
    fn instrumentation_error_disables_immediately() {
        let classifier = TelemetryErrorClassifier::default();
        handle_instrumentation_error(&classifier, "agent_wrapper", "patch failed");
        assert!(classifier.is_component_disabled("agent_wrapper"));
    }
}
