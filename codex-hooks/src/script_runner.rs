//! Runs a shell command with the hook context on standard input, enforces a
//! wall-clock timeout against the whole process group, and turns its exit
//! status and output into a [`HookResult`].

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use codex_protocol::hooks::HookDecision;
use codex_protocol::hooks::HookEventContext;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::decision::HookResult;
use crate::error::HookErrorCategory;
use crate::error::HookErrorClassifier;
use crate::registry::ScriptHook;

pub struct ScriptRunner {
    errors: Arc<HookErrorClassifier>,
}

impl ScriptRunner {
    pub fn new(errors: Arc<HookErrorClassifier>) -> Self {
        Self { errors }
    }

    pub async fn run(&self, hook: &ScriptHook, context: &HookEventContext) -> HookResult {
        let args = match shlex::split(&hook.command) {
            Some(args) if !args.is_empty() => args,
            _ => {
                self.errors.record(
                    "script_runner",
                    HookErrorCategory::ValidationError,
                    "empty command",
                );
                return HookResult::error("Empty command");
            }
        };

        let working_directory = hook
            .working_directory
            .as_deref()
            .filter(|dir| std::path::Path::new(dir).exists())
            .map(str::to_string)
            .unwrap_or_else(|| context.cwd.clone());

        let mut command = Command::new(&args[0]);
        command
            .args(&args[1..])
            .current_dir(&working_directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            unsafe {
                command.pre_exec(|| {
                    nix::unistd::setsid()
                        .map_err(|err| std::io::Error::from_raw_os_error(err as i32))?;
                    Ok(())
                });
            }
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                self.errors
                    .record("script_runner", HookErrorCategory::SystemError, err.to_string());
                return HookResult::error(format!("Failed to start hook command: {err}"));
            }
        };

        let payload = match serde_json::to_vec(context) {
            Ok(payload) => payload,
            Err(err) => {
                self.errors.record(
                    "script_runner",
                    HookErrorCategory::SystemError,
                    err.to_string(),
                );
                return HookResult::error(format!("Failed to serialize hook context: {err}"));
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(&payload).await;
        }

        let pid = child.id();
        let timeout = Duration::from_secs(hook.timeout);

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => self.interpret_output(hook, &output),
            Ok(Err(err)) => {
                self.errors
                    .record("script_runner", HookErrorCategory::SystemError, err.to_string());
                HookResult::error(format!("Failed to run hook command: {err}"))
            }
            Err(_) => {
                self.kill_process_group(pid).await;
                self.errors.record(
                    "script_runner",
                    HookErrorCategory::Timeout,
                    format!("timeout after {}s", hook.timeout),
                );
                HookResult::error(format!(
                    "Timeout after {}s executing: {}",
                    hook.timeout, hook.command
                ))
            }
        }
    }

    #[cfg(unix)]
    async fn kill_process_group(&self, pid: Option<u32>) {
        use nix::sys::signal::Signal;
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let Some(pid) = pid else { return };
        let pgid = Pid::from_raw(pid as i32);
        let _ = killpg(pgid, Signal::SIGTERM);
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = killpg(pgid, Signal::SIGKILL);
    }

    #[cfg(not(unix))]
    async fn kill_process_group(&self, _pid: Option<u32>) {
        tracing::warn!("process-group kill is not supported on this platform; a timed-out hook's children may outlive it");
    }

    fn interpret_output(&self, hook: &ScriptHook, output: &std::process::Output) -> HookResult {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if let Ok(serde_json::Value::Object(map)) =
            serde_json::from_str::<serde_json::Value>(stdout.trim())
        {
            return self.from_json_output(&map);
        }

        match output.status.code() {
            Some(0) => HookResult::allow(),
            Some(2) => {
                let reason = if !stderr.trim().is_empty() {
                    stderr.trim().to_string()
                } else {
                    stdout.trim().to_string()
                };
                HookResult::deny(reason)
            }
            Some(126) => {
                self.errors.record(
                    "script_runner",
                    HookErrorCategory::PermissionError,
                    "hook command not executable",
                );
                HookResult::error(format!("Hook command not executable: {}", hook.command))
            }
            Some(127) => {
                self.errors.record(
                    "script_runner",
                    HookErrorCategory::ScriptError,
                    "hook command not found",
                );
                HookResult::error(format!("Hook command not found: {}", hook.command))
            }
            Some(code) => {
                self.errors.record(
                    "script_runner",
                    HookErrorCategory::ScriptError,
                    format!("exit code {code}"),
                );
                HookResult::error(format!(
                    "Hook command exited with code {code}: {}",
                    hook.command
                ))
            }
            None => {
                self.errors.record(
                    "script_runner",
                    HookErrorCategory::SystemError,
                    "hook command terminated by signal",
                );
                HookResult::error(format!(
                    "Hook command terminated by signal: {}",
                    hook.command
                ))
            }
        }
    }

    fn from_json_output(&self, map: &serde_json::Map<String, serde_json::Value>) -> HookResult {
        let decision = match map.get("decision").and_then(|v| v.as_str()) {
            Some("allow") => Some(HookDecision::Allow),
            Some("deny") => Some(HookDecision::Deny),
            Some("ask") => Some(HookDecision::Ask),
            Some("block") => Some(HookDecision::Block),
            Some(other) => {
                tracing::warn!(decision = other, "unknown hook decision, degrading to allow");
                Some(HookDecision::Allow)
            }
            None => None,
        };

        let reason = map
            .get("reason")
            .and_then(|v| v.as_str())
            .or_else(|| map.get("stopReason").and_then(|v| v.as_str()))
            .map(str::to_string)
            .or_else(|| match decision {
                Some(HookDecision::Deny) | Some(HookDecision::Ask) | Some(HookDecision::Block) => {
                    decision.map(|d| format!("{d:?} by hook").to_lowercase())
                }
                _ => None,
            });

        let additional_context = map
            .get("additionalContext")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let continue_execution = map
            .get("continue")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        let suppress_output = map
            .get("suppressOutput")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        HookResult {
            success: true,
            decision,
            reason,
            additional_context,
            suppress_output,
            continue_execution,
            output: None,
            no_hooks_executed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codex_protocol::error_classifier::ErrorClassifier;
    use codex_protocol::hooks::HookEventName;

    fn context() -> HookEventContext {
        HookEventContext {
            session_id: "s1".to_string(),
            cwd: "/tmp".to_string(),
            hook_event_name: HookEventName::PreToolUse,
            tool_name: "local_shell".to_string(),
            tool_input: serde_json::json!({}),
            tool_response: None,
        }
    }

    fn runner() -> ScriptRunner {
        ScriptRunner::new(Arc::new(ErrorClassifier::default()))
    }

    #[tokio::test]
    async fn exit_code_zero_allows() {
        let hook = ScriptHook {
            matcher: "*".to_string(),
            command: "true".to_string(),
            timeout: 5,
            working_directory: None,
        };
        let result = runner().run(&hook, &context()).await;
        assert!(result.success);
        assert!(!result.should_block());
    }

    #[tokio::test]
    async fn exit_code_two_denies_with_stderr_reason() {
        let hook = ScriptHook {
            matcher: "*".to_string(),
            command: "sh -c 'echo no writes 1>&2; exit 2'".to_string(),
            timeout: 5,
            working_directory: None,
        };
        let result = runner().run(&hook, &context()).await;
        assert_eq!(result.decision, Some(HookDecision::Deny));
        assert_eq!(result.reason.as_deref(), Some("no writes"));
    }

    #[tokio::test]
    async fn json_stdout_is_parsed_into_decision() {
        let hook = ScriptHook {
            matcher: "*".to_string(),
            command: r#"sh -c "echo '{\"decision\":\"ask\",\"reason\":\"confirm\"}'""#.to_string(),
            timeout: 5,
            working_directory: None,
        };
        let result = runner().run(&hook, &context()).await;
        assert_eq!(result.decision, Some(HookDecision::Ask));
        assert_eq!(result.reason.as_deref(), Some("confirm"));
    }

    #[tokio::test]
    async fn timeout_kills_process_group_and_reports_timeout() {
        let hook = ScriptHook {
            matcher: "*".to_string(),
            command: "sleep 10".to_string(),
            timeout: 1,
            working_directory: None,
        };
        let started = std::time::Instant::now();
        let result = runner().run(&hook, &context()).await;
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!result.success);
        assert_eq!(
            result.reason.as_deref(),
            Some("Timeout after 1s executing: sleep 10")
        );
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let hook = ScriptHook {
            matcher: "*".to_string(),
            command: "   ".to_string(),
            timeout: 5,
            working_directory: None,
        };
        let result = runner().run(&hook, &context()).await;
        assert!(!result.success);
        assert_eq!(result.reason.as_deref(), Some("Empty command"));
    }
}
