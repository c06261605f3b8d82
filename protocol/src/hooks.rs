//! Wire formats for the hook engine.
//!
//! `HookEventContext` is what gets written to a script hook's standard
//! input; `HookOutput` is what a script hook may write to standard output
//! (it can equivalently signal its decision through its exit code alone —
//! see [`crate::hooks::HookActionConfig`] and the script runner). Both
//! follow the JSON shapes in the external-interfaces section of the
//! design: tagged `decision` strings, a legacy `stopReason` alias, and the
//! usual optional/boolean defaults.

use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use strum_macros::Display;
use strum_macros::EnumString;

/// The four lifecycle points a hook can observe.
///
/// `Display`/`EnumString` give the same stable `PascalCase` string
/// identifiers as the `serde` wire form, for call sites (config
/// validation, log fields) that want the tool-name-style string without
/// round-tripping through JSON.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "PascalCase")]
#[strum(serialize_all = "PascalCase")]
pub enum HookEventName {
    PreToolUse,
    PostToolUse,
    PostToolError,
    UserPromptSubmit,
}

impl HookEventName {
    pub const ALL: [HookEventName; 4] = [
        HookEventName::PreToolUse,
        HookEventName::PostToolUse,
        HookEventName::PostToolError,
        HookEventName::UserPromptSubmit,
    ];
}

/// JSON object written to a script hook's stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookEventContext {
    pub session_id: String,
    pub cwd: String,
    pub hook_event_name: HookEventName,
    pub tool_name: String,
    pub tool_input: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_response: Option<serde_json::Value>,
}

/// Decision a hook (script or callback) can return.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HookDecision {
    Allow,
    Deny,
    Ask,
    Block,
}

/// JSON object a script hook may write to stdout.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HookOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<HookDecision>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Legacy alias for `reason`, read if `reason` is absent.
    #[serde(rename = "stopReason", skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,

    #[serde(rename = "additionalContext", skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,

    #[serde(rename = "continue", default = "default_true")]
    pub continue_execution: bool,

    #[serde(rename = "suppressOutput", default)]
    pub suppress_output: bool,
}

fn default_true() -> bool {
    true
}

impl HookOutput {
    /// `reason`, falling back to the legacy `stopReason` alias.
    pub fn effective_reason(&self) -> Option<&str> {
        self.reason
            .as_deref()
            .or(self.stop_reason.as_deref())
    }
}

/// A single configured action a hook group executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HookActionConfig {
    Command {
        command: String,
        #[serde(default = "default_timeout_secs")]
        timeout: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        working_directory: Option<String>,
    },
    /// Invokes a function previously registered into the in-process native
    /// hook registry by name, for in-process callback hooks that don't
    /// need a child process.
    Native { function: String },
}

fn default_timeout_secs() -> u64 {
    60
}

/// One matcher + the actions it triggers, for a single event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookGroup {
    #[serde(default)]
    pub matcher: String,
    pub hooks: Vec<HookActionConfig>,
}

/// Settings shared across all hooks of a configuration source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookSettings {
    #[serde(default = "default_timeout_secs")]
    pub default_timeout: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_hooks: u64,
    #[serde(default)]
    pub enable_performance_monitoring: bool,
}

fn default_max_concurrent() -> u64 {
    5
}

impl Default for HookSettings {
    fn default() -> Self {
        Self {
            default_timeout: default_timeout_secs(),
            max_concurrent_hooks: default_max_concurrent(),
            enable_performance_monitoring: false,
        }
    }
}

/// Complete hooks configuration: the schema in the external-interfaces
/// section, consumed either from a single TOML file (native format) or
/// merged from the JSON cascade (see `codex_hooks::config`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HooksConfig {
    #[serde(default)]
    pub hooks: HashMap<HookEventName, Vec<HookGroup>>,
    #[serde(default)]
    pub hook_settings: HookSettings,
}
