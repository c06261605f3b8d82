//! Hook configuration loading: a native TOML format (`load_config_from_file`)
//! plus a JSON multi-source cascade (a user-level settings file, project
//! `settings.json`, project `settings.local.json`), both producing the same
//! [`HooksConfig`].

use std::path::Path;
use std::path::PathBuf;

use codex_protocol::hooks::HookActionConfig;
use codex_protocol::hooks::HookEventName;
use codex_protocol::hooks::HookGroup;
use codex_protocol::hooks::HookSettings;
use codex_protocol::hooks::HooksConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path} as TOML: {source}")]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to parse {path} as JSON: {source}")]
    JsonParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration in {path}: {reason}")]
    Validation { path: PathBuf, reason: String },
}

/// Load a single native `HooksConfig` file (TOML).
pub fn load_config_from_file(path: impl AsRef<Path>) -> Result<HooksConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
        path: path.to_path_buf(),
        source,
    })
}

/// The three cascade candidates, lowest to highest precedence: a user-level
/// config, a project-level config, and a project-level local override meant
/// for untracked, developer-specific settings layered on top of it.
pub fn cascade_paths(project_root: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".ai_agents").join("settings.json"));
    }
    paths.push(project_root.join("settings.json"));
    paths.push(project_root.join("settings.local.json"));
    paths
}

/// Load and merge the JSON configuration cascade. A candidate that doesn't
/// exist is silently skipped; one that exists but fails to parse or
/// validate is a hard error. Hook lists are appended per event across
/// sources in cascade order; `hook_settings` is merged key-by-key, with a
/// later source's key overwriting an earlier source's same key but leaving
/// keys the later source doesn't mention untouched.
///
/// The merge happens at the raw `serde_json::Value` level, before
/// deserializing into `HooksConfig`: every `HookSettings` field carries a
/// serde default, so merging already-deserialized structs would silently
/// reset any key a later source omits back to its default instead of
/// preserving an earlier source's value for it.
pub fn load_config_cascade(project_root: &Path) -> Result<HooksConfig, ConfigError> {
    let mut merged_hooks = serde_json::Map::new();
    let mut merged_settings = serde_json::Map::new();

    for path in cascade_paths(project_root) {
        if !path.exists() {
            continue;
        }
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let value: serde_json::Value =
            serde_json::from_str(&content).map_err(|source| ConfigError::JsonParse {
                path: path.clone(),
                source,
            })?;
        validate_configuration(&value, &path)?;

        if let Some(hooks) = value.get("hooks").and_then(|h| h.as_object()) {
            for (event_name, groups) in hooks {
                let Some(groups) = groups.as_array() else {
                    continue;
                };
                let entry = merged_hooks
                    .entry(event_name.clone())
                    .or_insert_with(|| serde_json::Value::Array(Vec::new()));
                if let serde_json::Value::Array(existing) = entry {
                    existing.extend(groups.iter().cloned());
                }
            }
        }

        if let Some(settings) = value.get("hook_settings").and_then(|s| s.as_object()) {
            for (key, setting_value) in settings {
                merged_settings.insert(key.clone(), setting_value.clone());
            }
        }
    }

    let merged_value = serde_json::Value::Object(serde_json::Map::from_iter([
        ("hooks".to_string(), serde_json::Value::Object(merged_hooks)),
        (
            "hook_settings".to_string(),
            serde_json::Value::Object(merged_settings),
        ),
    ]));

    serde_json::from_value(merged_value).map_err(|source| ConfigError::JsonParse {
        path: project_root.to_path_buf(),
        source,
    })
}

/// Validate the raw JSON shape before attempting to deserialize it into
/// [`HooksConfig`], so a malformed cascade source fails with a descriptive
/// error rather than a generic serde message.
pub fn validate_configuration(value: &serde_json::Value, path: &Path) -> Result<(), ConfigError> {
    let fail = |reason: &str| {
        Err(ConfigError::Validation {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        })
    };

    let Some(top) = value.as_object() else {
        return fail("top-level value must be an object");
    };

    if let Some(hooks) = top.get("hooks") {
        let Some(hooks) = hooks.as_object() else {
            return fail("`hooks` must be an object");
        };
        for (event_name, groups) in hooks {
            if HookEventName::ALL
                .iter()
                .all(|name| name.to_string() != *event_name)
            {
                return fail(&format!("`{event_name}` is not a valid hook event name"));
            }
            let Some(groups) = groups.as_array() else {
                return fail(&format!("`hooks.{event_name}` must be an array"));
            };
            for group in groups {
                let Some(group) = group.as_object() else {
                    return fail("each hook group must be an object");
                };
                match group.get("matcher").and_then(|m| m.as_str()) {
                    Some(matcher) if !matcher.is_empty() => {}
                    _ => return fail("each hook group needs a non-empty string `matcher`"),
                }
                let Some(hook_list) = group.get("hooks").and_then(|h| h.as_array()) else {
                    return fail("each hook group needs a `hooks` array");
                };
                for hook in hook_list {
                    validate_hook_entry(hook, path)?;
                }
            }
        }
    }

    if let Some(settings) = top.get("hook_settings") {
        let Some(settings) = settings.as_object() else {
            return fail("`hook_settings` must be an object");
        };
        for key in ["default_timeout", "max_concurrent_hooks"] {
            if let Some(value) = settings.get(key) {
                if !value.as_u64().is_some_and(|n| n > 0) {
                    return fail(&format!("`hook_settings.{key}` must be a positive integer"));
                }
            }
        }
        if let Some(value) = settings.get("enable_performance_monitoring") {
            if !value.is_boolean() {
                return fail("`hook_settings.enable_performance_monitoring` must be a boolean");
            }
        }
    }

    Ok(())
}

fn validate_hook_entry(hook: &serde_json::Value, path: &Path) -> Result<(), ConfigError> {
    let fail = |reason: &str| {
        Err(ConfigError::Validation {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        })
    };
    let Some(hook) = hook.as_object() else {
        return fail("each hook must be an object");
    };
    match hook.get("type").and_then(|t| t.as_str()) {
        Some("command") => match hook.get("command").and_then(|c| c.as_str()) {
            Some(command) if !command.is_empty() => {}
            _ => return fail("a `command` hook needs a non-empty `command` string"),
        },
        Some("python") | Some("native") => {}
        _ => return fail("a hook's `type` must be `command` or `native`"),
    }
    if let Some(timeout) = hook.get("timeout") {
        if !timeout.as_u64().is_some_and(|n| n > 0) {
            return fail("a hook's `timeout` must be a positive integer");
        }
    }
    Ok(())
}

/// Every configured `command` hook in `config`, ready to register. `native`
/// actions are not discovered here: they name a function that must already
/// be registered into the in-process callback registry by the caller, via
/// [`crate::manager::HookManager::register_callback`].
pub fn script_hooks(config: &HooksConfig) -> Vec<(HookEventName, HookGroup)> {
    config
        .hooks
        .iter()
        .flat_map(|(event, groups)| groups.iter().map(move |group| (*event, group.clone())))
        .collect()
}

pub fn default_settings() -> HookSettings {
    HookSettings::default()
}

pub fn is_command_hook(action: &HookActionConfig) -> bool {
    matches!(action, HookActionConfig::Command { .. })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_native_toml_format() {
        let toml_content = r#"
[[hooks.PreToolUse]]
matcher = "local_shell"

[[hooks.PreToolUse.hooks]]
type = "command"
command = "./validate.sh"
timeout = 5
"#;
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), toml_content).unwrap();
        let config = load_config_from_file(file.path()).unwrap();
        assert!(config.hooks.contains_key(&HookEventName::PreToolUse));
    }

    #[test]
    fn cascade_skips_missing_files_and_returns_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_cascade(dir.path()).unwrap();
        assert!(config.hooks.is_empty());
    }

    #[test]
    fn cascade_appends_hook_lists_and_overwrites_settings() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("settings.json"),
            r#"{"hooks":{"PreToolUse":[{"matcher":"*","hooks":[{"type":"command","command":"a.sh","timeout":5}]}]},"hook_settings":{"default_timeout":30}}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("settings.local.json"),
            r#"{"hooks":{"PreToolUse":[{"matcher":"File*","hooks":[{"type":"command","command":"b.sh","timeout":5}]}]},"hook_settings":{"default_timeout":90}}"#,
        )
        .unwrap();

        let config = load_config_cascade(dir.path()).unwrap();
        let groups = config.hooks.get(&HookEventName::PreToolUse).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(config.hook_settings.default_timeout, 90);
    }

    #[test]
    fn cascade_merges_hook_settings_per_key_instead_of_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("settings.json"),
            r#"{"hook_settings":{"max_concurrent_hooks":10}}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("settings.local.json"),
            r#"{"hook_settings":{"default_timeout":45}}"#,
        )
        .unwrap();

        let config = load_config_cascade(dir.path()).unwrap();
        assert_eq!(config.hook_settings.max_concurrent_hooks, 10);
        assert_eq!(config.hook_settings.default_timeout, 45);
    }

    #[test]
    fn cascade_rejects_invalid_matcher() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("settings.json"),
            r#"{"hooks":{"PreToolUse":[{"matcher":"","hooks":[]}]}}"#,
        )
        .unwrap();
        assert!(load_config_cascade(dir.path()).is_err());
    }
}
