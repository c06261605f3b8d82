//! Hook-engine error taxonomy built on the shared generic error classifier.

use codex_protocol::error_classifier::ErrorCategory;
use codex_protocol::error_classifier::ErrorClassifier;
use codex_protocol::error_classifier::Severity;

/// Failure categories a hook dispatch can hit. `CallbackError` covers
/// failures raised by an in-process native hook function, since this
/// runtime has no embedded scripting interpreter to attribute a separate
/// category to.
#[derive(Debug, Clone, Copy)]
pub enum HookErrorCategory {
    Timeout,
    ScriptError,
    CallbackError,
    ConfigurationError,
    PermissionError,
    ValidationError,
    SystemError,
}

impl ErrorCategory for HookErrorCategory {
    fn key(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ScriptError => "script_error",
            Self::CallbackError => "callback_error",
            Self::ConfigurationError => "configuration_error",
            Self::PermissionError => "permission_error",
            Self::ValidationError => "validation_error",
            Self::SystemError => "system_error",
        }
    }

    fn severity(&self) -> Severity {
        match self {
            Self::Timeout | Self::ScriptError | Self::CallbackError | Self::ConfigurationError => {
                Severity::Medium
            }
            Self::PermissionError => Severity::High,
            Self::ValidationError => Severity::Low,
            Self::SystemError => Severity::Critical,
        }
    }
}

pub type HookErrorClassifier = ErrorClassifier<HookErrorCategory>;
