//! Generic ring-buffer error classifier shared by the hook engine and the
//! telemetry pipeline.
//!
//! The hook engine and telemetry pipeline each need an independent error
//! classifier that differs only in its category taxonomy and in whether it
//! grades severity. Both keep a bounded ring of recent errors, per-component
//! counters, and disable a component outright once its counter crosses a
//! threshold. This module factors that shape out into one generic type so
//! each subsystem only has to supply its own category enum.

use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Ring buffer capacity for recent errors: a fixed 100-entry FIFO buffer.
const RING_CAPACITY: usize = 100;

/// How many errors a single component may record before it is disabled for
/// the remainder of the session.
const DEFAULT_MAX_ERRORS_PER_COMPONENT: u32 = 10;

/// Severity grade attached to a recorded error. The telemetry-side
/// taxonomy does not distinguish severities; its categories should all map
/// to [`Severity::Medium`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A category that can be recorded by an [`ErrorClassifier`].
pub trait ErrorCategory: Clone + std::fmt::Debug + Send + Sync + 'static {
    /// Stable string key used for per-component counting, e.g. `"timeout"`
    /// or `"storage"`.
    fn key(&self) -> &'static str;

    /// Severity grade, used only to pick a tracing log level. Categories
    /// that don't distinguish severity should return [`Severity::Medium`].
    fn severity(&self) -> Severity {
        Severity::Medium
    }
}

/// One recorded error, retained in the ring buffer for diagnostics.
#[derive(Debug, Clone)]
pub struct ErrorRecord<C> {
    pub component: String,
    pub category: C,
    pub message: String,
}

struct Inner<C> {
    counts: HashMap<String, u32>,
    disabled_components: HashSet<String>,
    corrupted_files: HashSet<String>,
    ring: VecDeque<ErrorRecord<C>>,
}

impl<C> Default for Inner<C> {
    fn default() -> Self {
        Self {
            counts: HashMap::new(),
            disabled_components: HashSet::new(),
            corrupted_files: HashSet::new(),
            ring: VecDeque::new(),
        }
    }
}

/// Summary snapshot returned by [`ErrorClassifier::summary`].
#[derive(Debug, Clone)]
pub struct ErrorSummary {
    pub error_counts: HashMap<String, u32>,
    pub disabled_components: Vec<String>,
    pub corrupted_files: Vec<String>,
    pub total_errors: u32,
}

/// Thread-safe error classifier: records errors by component, throttles a
/// component once it has recorded `max_errors_per_component` errors, and
/// keeps a bounded ring of recent errors for diagnostics.
pub struct ErrorClassifier<C> {
    inner: Mutex<Inner<C>>,
    max_errors_per_component: u32,
}

impl<C: ErrorCategory> Default for ErrorClassifier<C> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ERRORS_PER_COMPONENT)
    }
}

impl<C: ErrorCategory> ErrorClassifier<C> {
    pub fn new(max_errors_per_component: u32) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_errors_per_component,
        }
    }

    /// Record an error against `component`, returning `true` if this call
    /// just crossed the threshold and disabled the component.
    pub fn record(&self, component: &str, category: C, message: impl Into<String>) -> bool {
        let message = message.into();
        let key = format!("{}_{}", component, category.key());
        let severity = category.severity();

        let mut inner = self.inner.lock().expect("error classifier lock poisoned");
        let count = inner.counts.entry(key).or_insert(0);
        *count += 1;
        let crossed = *count >= self.max_errors_per_component;
        if crossed {
            inner.disabled_components.insert(component.to_string());
        }

        if inner.ring.len() >= RING_CAPACITY {
            inner.ring.pop_front();
        }
        inner.ring.push_back(ErrorRecord {
            component: component.to_string(),
            category: category.clone(),
            message: message.clone(),
        });
        drop(inner);

        match severity {
            Severity::Low => tracing::debug!(component, %message, "classified error"),
            Severity::Medium => tracing::warn!(component, %message, "classified error"),
            Severity::High => tracing::warn!(component, %message, "classified error (high severity)"),
            Severity::Critical => tracing::error!(component, %message, "classified error (critical)"),
        }

        crossed
    }

    /// Unconditionally disable `component`, independent of its error count
    /// (used for instrumentation failures, which disable immediately rather
    /// than waiting for the threshold).
    pub fn disable_component(&self, component: &str) {
        self.inner
            .lock()
            .expect("error classifier lock poisoned")
            .disabled_components
            .insert(component.to_string());
    }

    pub fn is_component_disabled(&self, component: &str) -> bool {
        self.inner
            .lock()
            .expect("error classifier lock poisoned")
            .disabled_components
            .contains(component)
    }

    pub fn mark_file_corrupted(&self, path: &str) {
        self.inner
            .lock()
            .expect("error classifier lock poisoned")
            .corrupted_files
            .insert(path.to_string());
    }

    pub fn is_file_corrupted(&self, path: &str) -> bool {
        self.inner
            .lock()
            .expect("error classifier lock poisoned")
            .corrupted_files
            .contains(path)
    }

    pub fn recent_errors(&self) -> Vec<ErrorRecord<C>> {
        self.inner
            .lock()
            .expect("error classifier lock poisoned")
            .ring
            .iter()
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> ErrorSummary {
        let inner = self.inner.lock().expect("error classifier lock poisoned");
        ErrorSummary {
            error_counts: inner.counts.clone(),
            disabled_components: inner.disabled_components.iter().cloned().collect(),
            corrupted_files: inner.corrupted_files.iter().cloned().collect(),
            total_errors: inner.counts.values().sum(),
        }
    }

    pub fn reset(&self) {
        *self.inner.lock().expect("error classifier lock poisoned") = Inner::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy)]
    enum TestCategory {
        Storage,
    }

    impl ErrorCategory for TestCategory {
        fn key(&self) -> &'static str {
            "storage"
        }
    }

    #[test]
    fn disables_component_after_threshold() {
        let classifier: ErrorClassifier<TestCategory> = ErrorClassifier::new(3);
        assert!(!classifier.record("store", TestCategory::Storage, "e1"));
        assert!(!classifier.record("store", TestCategory::Storage, "e2"));
        assert!(classifier.record("store", TestCategory::Storage, "e3"));
        assert!(classifier.is_component_disabled("store"));
    }

    #[test]
    fn ring_buffer_is_bounded() {
        let classifier: ErrorClassifier<TestCategory> = ErrorClassifier::new(1_000_000);
        for i in 0..150 {
            classifier.record("x", TestCategory::Storage, format!("e{i}"));
        }
        assert_eq!(classifier.recent_errors().len(), RING_CAPACITY);
    }

    #[test]
    fn corrupted_file_tracking() {
        let classifier: ErrorClassifier<TestCategory> = ErrorClassifier::default();
        assert!(!classifier.is_file_corrupted("a.json"));
        classifier.mark_file_corrupted("a.json");
        assert!(classifier.is_file_corrupted("a.json"));
    }
}
