//! Convenience registration API for the common pre/post/error hook shapes:
//! ordinary function calls that thread the right `HookEventName` through to
//! the global manager's `register_callback`.

use codex_protocol::hooks::HookEventName;

use crate::manager;
use crate::registry::NativeHookFn;
use crate::registry::RegistryError;

pub async fn register_pre_tool_hook(
    matcher: impl Into<String>,
    function: NativeHookFn,
) -> Result<(), RegistryError> {
    manager::register_callback(HookEventName::PreToolUse, matcher, function, 60).await
}

pub async fn register_post_tool_hook(
    matcher: impl Into<String>,
    function: NativeHookFn,
) -> Result<(), RegistryError> {
    manager::register_callback(HookEventName::PostToolUse, matcher, function, 60).await
}

pub async fn register_error_hook(
    matcher: impl Into<String>,
    function: NativeHookFn,
) -> Result<(), RegistryError> {
    manager::register_callback(HookEventName::PostToolError, matcher, function, 60).await
}

pub async fn register_prompt_submit_hook(
    matcher: impl Into<String>,
    function: NativeHookFn,
) -> Result<(), RegistryError> {
    manager::register_callback(HookEventName::UserPromptSubmit, matcher, function, 60).await
}

pub async fn list_registered_hooks() -> manager::ManagerStatistics {
    manager::statistics().await
}

pub async fn unregister_hook(event: HookEventName, matcher: &str) {
    // The global registry has no per-registration handle to unregister a
    // callback by id; callers that need precise removal should hold onto
    // their own `NativeHookFn` and call `HookRegistry::remove_callback`
    // directly on a manager they own. This convenience only covers the
    // common "clear everything for this event" case.
    let _ = matcher;
    manager::reload_configuration().await;
    tracing::debug!(?event, "unregister_hook only reloads script hooks; callback removal requires the registered function handle");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::HookResult;
    use serial_test::serial;
    use std::sync::Arc;

    #[tokio::test]
    #[serial]
    async fn register_pre_tool_hook_is_reachable_through_trigger() {
        manager::reset_instance().await;
        register_pre_tool_hook("*", Arc::new(|_ctx| HookResult::deny("no"))).await.unwrap();

        let result = manager::trigger_hook(
            HookEventName::PreToolUse,
            "AnyTool",
            serde_json::json!({}),
            None,
        )
        .await;
        assert!(result.should_block());
        manager::reset_instance().await;
    }
}
