//! Hook registry: per-event ordered lists of script and callback hooks,
//! plus the single shared pattern matcher they're matched through.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use codex_protocol::hooks::HookEventContext;
use codex_protocol::hooks::HookEventName;

use crate::decision::HookResult;
use crate::matcher::PatternMatcher;

/// A function registered into the in-process callback registry. Unregister
/// is by identity (`Arc::ptr_eq`), not by value equality.
pub type NativeHookFn = Arc<dyn Fn(&HookEventContext) -> HookResult + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptHook {
    pub matcher: String,
    pub command: String,
    pub timeout: u64,
    pub working_directory: Option<String>,
}

#[derive(Clone)]
pub struct CallbackHook {
    pub matcher: String,
    pub function: NativeHookFn,
    pub timeout: u64,
}

impl PartialEq for CallbackHook {
    fn eq(&self, other: &Self) -> bool {
        self.matcher == other.matcher
            && self.timeout == other.timeout
            && Arc::ptr_eq(&self.function, &other.function)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("matcher must not be empty")]
    EmptyMatcher,
    #[error("timeout must be positive")]
    NonPositiveTimeout,
    #[error("command must not be empty")]
    EmptyCommand,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryCounts {
    pub script: usize,
    pub callback: usize,
    pub total: usize,
}

#[derive(Default)]
struct Tables {
    scripts: HashMap<HookEventName, Vec<ScriptHook>>,
    callbacks: HashMap<HookEventName, Vec<CallbackHook>>,
}

/// Owns both hook tables and the one pattern cache used to match them. The
/// reference kept two disconnected matcher instances (one in the registry,
/// one in the manager), so clearing the manager's cache silently missed the
/// registry's real one; this type closes that gap by being the sole owner.
pub struct HookRegistry {
    tables: Mutex<Tables>,
    matcher: PatternMatcher,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            matcher: PatternMatcher::new(),
        }
    }

    pub fn register_script(
        &self,
        event: HookEventName,
        hook: ScriptHook,
    ) -> Result<(), RegistryError> {
        if hook.matcher.is_empty() {
            return Err(RegistryError::EmptyMatcher);
        }
        if hook.timeout == 0 {
            return Err(RegistryError::NonPositiveTimeout);
        }
        if hook.command.trim().is_empty() {
            return Err(RegistryError::EmptyCommand);
        }
        self.tables
            .lock()
            .expect("hook registry lock poisoned")
            .scripts
            .entry(event)
            .or_default()
            .push(hook);
        Ok(())
    }

    pub fn register_callback(
        &self,
        event: HookEventName,
        hook: CallbackHook,
    ) -> Result<(), RegistryError> {
        if hook.matcher.is_empty() {
            return Err(RegistryError::EmptyMatcher);
        }
        if hook.timeout == 0 {
            return Err(RegistryError::NonPositiveTimeout);
        }
        self.tables
            .lock()
            .expect("hook registry lock poisoned")
            .callbacks
            .entry(event)
            .or_default()
            .push(hook);
        Ok(())
    }

    pub fn remove_script(&self, event: HookEventName, hook: &ScriptHook) -> bool {
        let mut tables = self.tables.lock().expect("hook registry lock poisoned");
        if let Some(list) = tables.scripts.get_mut(&event) {
            if let Some(index) = list.iter().position(|h| h == hook) {
                list.remove(index);
                return true;
            }
        }
        false
    }

    pub fn remove_callback(&self, event: HookEventName, hook: &CallbackHook) -> bool {
        let mut tables = self.tables.lock().expect("hook registry lock poisoned");
        if let Some(list) = tables.callbacks.get_mut(&event) {
            if let Some(index) = list.iter().position(|h| h == hook) {
                list.remove(index);
                return true;
            }
        }
        false
    }

    /// Matching script hooks followed by matching callback hooks, both in
    /// registration order.
    pub fn matched(&self, event: HookEventName, tool_name: &str) -> (Vec<ScriptHook>, Vec<CallbackHook>) {
        let tables = self.tables.lock().expect("hook registry lock poisoned");
        let scripts = tables
            .scripts
            .get(&event)
            .map(|list| {
                list.iter()
                    .filter(|h| self.matcher.matches(&h.matcher, tool_name))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let callbacks = tables
            .callbacks
            .get(&event)
            .map(|list| {
                list.iter()
                    .filter(|h| self.matcher.matches(&h.matcher, tool_name))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        (scripts, callbacks)
    }

    pub fn list(&self, event: Option<HookEventName>) -> (Vec<ScriptHook>, Vec<CallbackHook>) {
        let tables = self.tables.lock().expect("hook registry lock poisoned");
        match event {
            Some(event) => (
                tables.scripts.get(&event).cloned().unwrap_or_default(),
                tables.callbacks.get(&event).cloned().unwrap_or_default(),
            ),
            None => (
                tables.scripts.values().flatten().cloned().collect(),
                tables.callbacks.values().flatten().cloned().collect(),
            ),
        }
    }

    pub fn clear(&self, event: Option<HookEventName>) {
        let mut tables = self.tables.lock().expect("hook registry lock poisoned");
        match event {
            Some(event) => {
                tables.scripts.remove(&event);
                tables.callbacks.remove(&event);
            }
            None => {
                tables.scripts.clear();
                tables.callbacks.clear();
            }
        }
        self.matcher.clear_cache();
    }

    /// Drop every *script* hook (used by `reload_configuration`), preserving
    /// programmatically registered callback hooks untouched.
    pub fn clear_scripts(&self) {
        self.tables
            .lock()
            .expect("hook registry lock poisoned")
            .scripts
            .clear();
        self.matcher.clear_cache();
    }

    pub fn counts(&self, event: Option<HookEventName>) -> RegistryCounts {
        let (scripts, callbacks) = self.list(event);
        RegistryCounts {
            script: scripts.len(),
            callback: callbacks.len(),
            total: scripts.len() + callbacks.len(),
        }
    }

    pub fn pattern_cache_size(&self) -> usize {
        self.matcher.cache_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(matcher: &str) -> ScriptHook {
        ScriptHook {
            matcher: matcher.to_string(),
            command: "true".to_string(),
            timeout: 10,
            working_directory: None,
        }
    }

    #[test]
    fn matches_preserve_insertion_order_scripts_then_callbacks() {
        let registry = HookRegistry::new();
        registry
            .register_script(HookEventName::PreToolUse, script("File*"))
            .unwrap();
        registry
            .register_script(HookEventName::PreToolUse, script("*"))
            .unwrap();
        registry
            .register_callback(
                HookEventName::PreToolUse,
                CallbackHook {
                    matcher: "*".to_string(),
                    function: Arc::new(|_ctx| HookResult::allow()),
                    timeout: 5,
                },
            )
            .unwrap();

        let (scripts, callbacks) = registry.matched(HookEventName::PreToolUse, "FileWrite");
        assert_eq!(scripts.len(), 2);
        assert_eq!(scripts[0].matcher, "File*");
        assert_eq!(callbacks.len(), 1);
    }

    #[test]
    fn register_script_rejects_empty_matcher() {
        let registry = HookRegistry::new();
        let bad = ScriptHook {
            matcher: String::new(),
            ..script("*")
        };
        assert!(registry
            .register_script(HookEventName::PreToolUse, bad)
            .is_err());
    }

    #[test]
    fn clear_resets_pattern_cache_too() {
        let registry = HookRegistry::new();
        registry
            .register_script(HookEventName::PreToolUse, script("File.*"))
            .unwrap();
        registry.matched(HookEventName::PreToolUse, "FileWrite");
        assert_eq!(registry.pattern_cache_size(), 1);
        registry.clear(None);
        assert_eq!(registry.pattern_cache_size(), 0);
    }

    #[test]
    fn clear_scripts_preserves_callbacks() {
        let registry = HookRegistry::new();
        registry
            .register_script(HookEventName::PreToolUse, script("*"))
            .unwrap();
        registry
            .register_callback(
                HookEventName::PreToolUse,
                CallbackHook {
                    matcher: "*".to_string(),
                    function: Arc::new(|_ctx| HookResult::allow()),
                    timeout: 5,
                },
            )
            .unwrap();

        registry.clear_scripts();

        let counts = registry.counts(Some(HookEventName::PreToolUse));
        assert_eq!(counts.script, 0);
        assert_eq!(counts.callback, 1);
    }
}
