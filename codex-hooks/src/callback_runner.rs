//! Runs an in-process callback hook with a per-call timeout.
//!
//! Each call gets its own `tokio::task::spawn_blocking`, never a shared
//! worker pool, so no misbehaving hook can corrupt state shared with
//! another call.

use std::sync::Arc;
use std::time::Duration;

use codex_protocol::hooks::HookEventContext;

use crate::decision::HookResult;
use crate::error::HookErrorCategory;
use crate::error::HookErrorClassifier;
use crate::registry::CallbackHook;

pub struct CallbackRunner {
    errors: Arc<HookErrorClassifier>,
}

impl CallbackRunner {
    pub fn new(errors: Arc<HookErrorClassifier>) -> Self {
        Self { errors }
    }

    pub async fn run(&self, hook: &CallbackHook, context: &HookEventContext) -> HookResult {
        let function = hook.function.clone();
        let context = context.clone();
        let timeout = Duration::from_secs(hook.timeout);

        let task = tokio::task::spawn_blocking(move || function(&context));

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                self.errors.record(
                    "callback_runner",
                    HookErrorCategory::CallbackError,
                    join_error.to_string(),
                );
                HookResult::error(format!("Callback hook panicked: {join_error}"))
            }
            Err(_) => {
                self.errors.record(
                    "callback_runner",
                    HookErrorCategory::Timeout,
                    format!("timeout after {}s", hook.timeout),
                );
                HookResult::error(format!("Callback hook timed out after {}s", hook.timeout))
            }
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

    fn runner() -> CallbackRunner {
        CallbackRunner::new(Arc::new(ErrorClassifier::default()))
    }

    #[tokio::test]
    async fn successful_callback_is_returned_as_is() {
        let hook = CallbackHook {
            matcher: "*".to_string(),
            function: Arc::new(|_ctx| HookResult::deny("nope")),
            timeout: 5,
        };
        let result = runner().run(&hook, &context()).await;
        assert_eq!(result.reason.as_deref(), Some("nope"));
    }

    #[tokio::test]
    async fn slow_callback_times_out() {
        let hook = CallbackHook {
            matcher: "*".to_string(),
            function: Arc::new(|_ctx| {
                std::thread::sleep(Duration::from_secs(5));
                HookResult::allow()
            }),
            timeout: 1,
        };
        let started = std::time::Instant::now();
        let result = runner().run(&hook, &context()).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!result.success);
    }

    #[tokio::test]
    async fn panicking_callback_is_classified_as_error() {
        let hook = CallbackHook {
            matcher: "*".to_string(),
            function: Arc::new(|_ctx| panic!("boom")),
            timeout: 5,
        };
        let result = runner().run(&hook, &context()).await;
        assert!(!result.success);
        assert!(result.reason.unwrap().contains("panicked"));
    }
}
