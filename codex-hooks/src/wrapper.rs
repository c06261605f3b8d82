//! Tool call-site wrapper: decorates any async tool callable so that hooks
//! run before, after, or on error.
//!
//! Because the core deals in a generic `serde_json::Value` tool input and
//! result (the tool body itself is out of scope), this is expressed as a
//! free function over `FnOnce(Value) -> Future<Output = Result<Value, E>>`
//! rather than a decorator macro — the natural Rust shape for "wrap any
//! callable," performing both the hook trigger calls and the result-merge
//! and block-check logic around them.

use std::future::Future;

use codex_protocol::hooks::HookEventName;
use serde_json::Value;
use serde_json::json;

use crate::manager::HookManager;

/// Run `tool` wrapped in `PRE_TOOL_USE` / `POST_TOOL_USE` / `POST_TOOL_ERROR`
/// hooks.
///
/// - If the pre-hook blocks, the tool body never runs and `Ok(blocked)` is
///   returned, where `blocked` is the structured `blocked_response` map.
/// - If `tool` itself fails, `POST_TOOL_ERROR` fires and the original error
///   is re-raised unchanged — no hook can mask or replace it.
/// - Otherwise `POST_TOOL_USE` fires and, if any hook actually ran, its
///   feedback is folded into the tool's result via `HookResult::merge`.
pub async fn call_tool<F, Fut, E>(
    manager: &HookManager,
    tool_name: &str,
    tool_input: Value,
    tool: F,
) -> Result<Value, E>
where
    F: FnOnce(Value) -> Fut,
    Fut: Future<Output = Result<Value, E>>,
    E: std::fmt::Display,
{
    let pre_result = manager
        .trigger(
            HookEventName::PreToolUse,
            tool_name,
            tool_input.clone(),
            None,
        )
        .await;

    if pre_result.should_block() {
        return Ok(pre_result.blocked_response());
    }
    let pre_hook_executed = !pre_result.no_hooks_executed;

    let raw = match tool(tool_input.clone()).await {
        Ok(raw) => raw,
        Err(err) => {
            manager
                .trigger(
                    HookEventName::PostToolError,
                    tool_name,
                    tool_input,
                    Some(json!({
                        "error": err.to_string(),
                        "error_type": std::any::type_name::<E>(),
                    })),
                )
                .await;
            return Err(err);
        }
    };

    let post_result = manager
        .trigger(
            HookEventName::PostToolUse,
            tool_name,
            tool_input,
            Some(raw.clone()),
        )
        .await;
    let post_hook_executed = !post_result.no_hooks_executed;

    if pre_hook_executed || post_hook_executed {
        Ok(post_result.merge(raw))
    } else {
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codex_protocol::hooks::HookDecision;
    use std::sync::Arc;

    fn manager_with_callback(
        event: HookEventName,
        function: crate::registry::NativeHookFn,
    ) -> HookManager {
        let manager = HookManager::new();
        manager.register_callback(event, "*", function, 5).unwrap();
        manager
    }

    #[tokio::test]
    async fn pre_hook_denial_blocks_tool_body() {
        let manager = manager_with_callback(
            HookEventName::PreToolUse,
            Arc::new(|_ctx| crate::decision::HookResult::deny("no writes")),
        );
        let mut tool_called = false;
        let result: Result<Value, String> = call_tool(&manager, "FileWrite", json!({"path": "/tmp/x"}), |_input| async {
            tool_called = true;
            Ok(json!({"ok": true}))
        })
        .await;

        let response = result.unwrap();
        assert!(!tool_called);
        assert_eq!(response["blocked"], json!(true));
        assert_eq!(response["decision"], json!("deny"));
        assert_eq!(
            response["message"],
            json!("Tool execution was denied: no writes")
        );
    }

    #[tokio::test]
    async fn post_hook_context_is_merged_into_result() {
        let manager = manager_with_callback(
            HookEventName::PostToolUse,
            Arc::new(|_ctx| {
                let mut r = crate::decision::HookResult::allow();
                r.decision = Some(HookDecision::Allow);
                r.additional_context = Some("tokens=5".to_string());
                r
            }),
        );

        let result: Result<Value, String> =
            call_tool(&manager, "Echo", json!({}), |_input| async { Ok(json!({"result": "hi"})) }).await;

        let merged = result.unwrap();
        assert_eq!(merged["agent_context_injection"], json!("tokens=5"));
        assert_eq!(merged["hook_feedback"]["decision"], json!("allow"));
    }

    #[tokio::test]
    async fn tool_error_propagates_unchanged_and_fires_post_error_hook() {
        let manager = HookManager::new();
        let result: Result<Value, String> =
            call_tool(&manager, "Explode", json!({}), |_input| async {
                Err("boom".to_string())
            })
            .await;
        assert_eq!(result.unwrap_err(), "boom");
    }

    #[tokio::test]
    async fn no_hooks_returns_raw_result_verbatim() {
        let manager = HookManager::new();
        let result: Result<Value, String> =
            call_tool(&manager, "Echo", json!({}), |_input| async { Ok(json!({"result": "hi"})) }).await;
        assert_eq!(result.unwrap(), json!({"result": "hi"}));
    }
}
