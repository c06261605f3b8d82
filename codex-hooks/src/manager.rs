//! The hook engine's single authoritative entry point: a process-wide
//! singleton (`once_cell::sync::Lazy<RwLock<HookManager>>`) that owns the
//! registry, runners, and error classifiers, and exposes `trigger` as the
//! one call site wrappers and integration code actually use.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use codex_protocol::error_classifier::ErrorSummary;
use codex_protocol::hooks::HookEventContext;
use codex_protocol::hooks::HookEventName;
use codex_protocol::hooks::HooksConfig;
use futures::future::join_all;
use once_cell::sync::Lazy;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::RwLock;

use crate::aggregator::aggregate;
use crate::callback_runner::CallbackRunner;
use crate::config;
use crate::config::ConfigError;
use crate::decision::HookResult;
use crate::error::HookErrorCategory;
use crate::error::HookErrorClassifier;
use crate::registry::CallbackHook;
use crate::registry::HookRegistry;
use crate::registry::NativeHookFn;
use crate::registry::RegistryCounts;
use crate::registry::RegistryError;
use crate::script_runner::ScriptRunner;

/// Diagnostic snapshot returned by [`HookManager::statistics`].
#[derive(Debug)]
pub struct ManagerStatistics {
    pub per_event: HashMap<HookEventName, RegistryCounts>,
    pub pattern_cache_size: usize,
    pub manager_errors: ErrorSummary,
    pub script_runner_errors: ErrorSummary,
}

pub struct HookManager {
    session_id: String,
    registry: HookRegistry,
    script_runner: ScriptRunner,
    callback_runner: CallbackRunner,
    errors: Arc<HookErrorClassifier>,
    script_errors: Arc<HookErrorClassifier>,
    config_path: std::sync::Mutex<Option<PathBuf>>,
    config_loaded: AsyncMutex<bool>,
    enabled: AtomicBool,
    debug_mode: AtomicBool,
}

impl HookManager {
    pub fn new() -> Self {
        let errors = Arc::new(HookErrorClassifier::default());
        let script_errors = Arc::new(HookErrorClassifier::default());
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            registry: HookRegistry::new(),
            script_runner: ScriptRunner::new(script_errors.clone()),
            callback_runner: CallbackRunner::new(errors.clone()),
            errors,
            script_errors,
            config_path: std::sync::Mutex::new(None),
            config_loaded: AsyncMutex::new(false),
            enabled: AtomicBool::new(true),
            debug_mode: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Point this manager at a native TOML config file, to be lazily loaded
    /// on the first `trigger` call (or via `reload_configuration`).
    pub fn set_config_path(&self, path: PathBuf) {
        *self.config_path.lock().expect("config path lock poisoned") = Some(path);
    }

    pub fn set_debug_mode(&self, enabled: bool) {
        self.debug_mode.store(enabled, Ordering::SeqCst);
    }

    pub fn is_debug_mode(&self) -> bool {
        self.debug_mode.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn ensure_configuration_loaded(&self) {
        let mut loaded = self.config_loaded.lock().await;
        if *loaded {
            return;
        }
        *loaded = true;

        let path = self
            .config_path
            .lock()
            .expect("config path lock poisoned")
            .clone();
        let Some(path) = path else { return };

        match config::load_config_from_file(&path) {
            Ok(parsed) => self.register_script_hooks(&parsed),
            Err(err) => {
                self.errors
                    .record("hook_manager", HookErrorCategory::ConfigurationError, err.to_string());
                tracing::warn!(error = %err, "failed to load hook configuration; continuing with zero hooks");
            }
        }
    }

    fn register_script_hooks(&self, parsed: &HooksConfig) {
        for (event, group) in config::script_hooks(parsed) {
            for action in &group.hooks {
                if let codex_protocol::hooks::HookActionConfig::Command {
                    command,
                    timeout,
                    working_directory,
                } = action
                {
                    let hook = crate::registry::ScriptHook {
                        matcher: group.matcher.clone(),
                        command: command.clone(),
                        timeout: *timeout,
                        working_directory: working_directory.clone(),
                    };
                    if let Err(err) = self.registry.register_script(event, hook) {
                        tracing::warn!(error = %err, "skipping invalid script hook registration");
                    }
                }
                // `Native` actions are registered programmatically via
                // `register_callback`, not discovered from a config file.
            }
        }
    }

    /// Register an in-process callback hook (`HooksConfig`'s `native`
    /// counterpart has no interpreter to invoke, so native-looking entries
    /// in a loaded config must be paired with a call to this method under
    /// the same function name at startup).
    pub fn register_callback(
        &self,
        event: HookEventName,
        matcher: impl Into<String>,
        function: NativeHookFn,
        timeout: u64,
    ) -> Result<(), RegistryError> {
        self.registry.register_callback(
            event,
            CallbackHook {
                matcher: matcher.into(),
                function,
                timeout,
            },
        )
    }

    /// Drop all script hooks and re-load configuration. Callback hooks
    /// (programmatic, not configured) are left untouched.
    pub async fn reload_configuration(&self) {
        self.registry.clear_scripts();
        *self.config_loaded.lock().await = false;
        self.ensure_configuration_loaded().await;
    }

    pub fn clear_all_hooks(&self) {
        self.registry.clear(None);
    }

    pub fn clear_error_statistics(&self) {
        self.errors.reset();
        self.script_errors.reset();
    }

    pub async fn shutdown(&self) {
        self.set_enabled(false);
    }

    pub fn statistics(&self) -> ManagerStatistics {
        let per_event = HookEventName::ALL
            .iter()
            .map(|event| (*event, self.registry.counts(Some(*event))))
            .collect();
        ManagerStatistics {
            per_event,
            pattern_cache_size: self.registry.pattern_cache_size(),
            manager_errors: self.errors.summary(),
            script_runner_errors: self.script_errors.summary(),
        }
    }

    /// The main entry point: run every hook matching `(event, tool_name)`
    /// and return the aggregated result.
    pub async fn trigger(
        &self,
        event: HookEventName,
        tool_name: &str,
        tool_input: Value,
        tool_response: Option<Value>,
    ) -> HookResult {
        if !self.is_enabled() {
            return HookResult::allow();
        }

        self.ensure_configuration_loaded().await;

        let context = HookEventContext {
            session_id: self.session_id.clone(),
            cwd: std::env::current_dir()
                .map(|dir| dir.display().to_string())
                .unwrap_or_default(),
            hook_event_name: event,
            tool_name: tool_name.to_string(),
            tool_input,
            tool_response,
        };

        let (scripts, callbacks) = self.registry.matched(event, tool_name);
        if scripts.is_empty() && callbacks.is_empty() {
            let mut result = HookResult::allow();
            result.no_hooks_executed = true;
            return result;
        }

        let script_futures = scripts
            .iter()
            .map(|hook| self.script_runner.run(hook, &context));
        let callback_futures = callbacks
            .iter()
            .map(|hook| self.callback_runner.run(hook, &context));

        let (script_results, callback_results) =
            tokio::join!(join_all(script_futures), join_all(callback_futures));

        let mut all_results = script_results;
        all_results.extend(callback_results);

        aggregate(&all_results)
    }
}

impl Default for HookManager {
    fn default() -> Self {
        Self::new()
    }
}

static HOOK_MANAGER: Lazy<RwLock<HookManager>> = Lazy::new(|| RwLock::new(HookManager::new()));

/// Replace the global manager (used for explicit configuration at startup,
/// and by tests via [`reset_instance`]).
pub async fn initialize(manager: HookManager) {
    *HOOK_MANAGER.write().await = manager;
}

pub async fn trigger_hook(
    event: HookEventName,
    tool_name: &str,
    tool_input: Value,
    tool_response: Option<Value>,
) -> HookResult {
    HOOK_MANAGER
        .read()
        .await
        .trigger(event, tool_name, tool_input, tool_response)
        .await
}

pub async fn register_callback(
    event: HookEventName,
    matcher: impl Into<String>,
    function: NativeHookFn,
    timeout: u64,
) -> Result<(), RegistryError> {
    HOOK_MANAGER
        .read()
        .await
        .register_callback(event, matcher, function, timeout)
}

pub async fn reload_configuration() {
    HOOK_MANAGER.read().await.reload_configuration().await;
}

pub async fn clear_all_hooks() {
    HOOK_MANAGER.read().await.clear_all_hooks();
}

pub async fn clear_error_statistics() {
    HOOK_MANAGER.read().await.clear_error_statistics();
}

pub async fn set_debug_mode(enabled: bool) {
    HOOK_MANAGER.read().await.set_debug_mode(enabled);
}

pub async fn enable_hooks() {
    HOOK_MANAGER.read().await.set_enabled(true);
}

pub async fn disable_hooks() {
    HOOK_MANAGER.read().await.set_enabled(false);
}

pub async fn is_enabled() -> bool {
    HOOK_MANAGER.read().await.is_enabled()
}

pub async fn statistics() -> ManagerStatistics {
    HOOK_MANAGER.read().await.statistics()
}

pub async fn shutdown() {
    HOOK_MANAGER.read().await.shutdown().await;
}

/// Reset the global manager to a fresh instance. Tests only.
pub async fn reset_instance() {
    HOOK_MANAGER.read().await.shutdown().await;
    *HOOK_MANAGER.write().await = HookManager::new();
}
