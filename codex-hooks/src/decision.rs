//! Hook result type and the fixed rules for turning it into tool-call control
//! flow (`should_block`, `blocked_response`, `merge`).

use codex_protocol::hooks::HookDecision;
use serde_json::Value;
use serde_json::json;

/// Outcome of running a single hook, or of aggregating several.
///
/// `no_hooks_executed` is a first-class field rather than a dynamic
/// attribute probed after the fact: it is the only way to distinguish "no
/// matching hooks" from "every matching hook said allow."
#[derive(Debug, Clone)]
pub struct HookResult {
    pub success: bool,
    pub decision: Option<HookDecision>,
    pub reason: Option<String>,
    pub additional_context: Option<String>,
    pub suppress_output: bool,
    pub continue_execution: bool,
    pub output: Option<String>,
    pub no_hooks_executed: bool,
}

impl HookResult {
    pub fn allow() -> Self {
        Self {
            success: true,
            decision: None,
            reason: None,
            additional_context: None,
            suppress_output: false,
            continue_execution: true,
            output: None,
            no_hooks_executed: false,
        }
    }

    pub fn allow_with(
        additional_context: Option<String>,
        suppress_output: bool,
        output: Option<String>,
    ) -> Self {
        Self {
            decision: Some(HookDecision::Allow),
            additional_context,
            suppress_output,
            output,
            ..Self::allow()
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            decision: None,
            reason: Some(reason.into()),
            additional_context: None,
            suppress_output: false,
            continue_execution: true,
            output: None,
            no_hooks_executed: false,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            decision: Some(HookDecision::Deny),
            reason: Some(reason.into()),
            continue_execution: false,
            ..Self::allow()
        }
    }

    /// `ask` keeps `continue_execution = true` even though it blocks the
    /// tool: `should_block` is the authoritative gate at the call site, and
    /// this field stays true because the decision is pending, not denied.
    pub fn ask(reason: impl Into<String>) -> Self {
        Self {
            decision: Some(HookDecision::Ask),
            reason: Some(reason.into()),
            ..Self::allow()
        }
    }

    pub fn block(reason: impl Into<String>, output: Option<String>) -> Self {
        Self {
            decision: Some(HookDecision::Block),
            reason: Some(reason.into()),
            output,
            ..Self::allow()
        }
    }

    /// Whether the tool call-site wrapper should refuse to run the tool.
    pub fn should_block(&self) -> bool {
        matches!(self.decision, Some(HookDecision::Deny) | Some(HookDecision::Ask))
            || !self.continue_execution
            || (!self.success && self.decision != Some(HookDecision::Allow))
    }

    fn response_type(&self) -> &'static str {
        match self.decision {
            Some(HookDecision::Deny) => "denied",
            Some(HookDecision::Ask) => "confirmation_required",
            Some(HookDecision::Block) => "blocked",
            _ if !self.success => "hook_error",
            _ => "blocked",
        }
    }

    fn message(&self) -> String {
        let reason = self.reason.as_deref().unwrap_or("no reason given");
        match self.decision {
            Some(HookDecision::Deny) => format!("Tool execution was denied: {reason}"),
            Some(HookDecision::Ask) => format!("Tool execution requires confirmation: {reason}"),
            _ if !self.success => format!("Hook execution failed: {reason}"),
            _ => format!("Tool execution was blocked: {reason}"),
        }
    }

    /// Structured response returned instead of running the tool at all.
    pub fn blocked_response(&self) -> Value {
        json!({
            "blocked": true,
            "decision": self.decision,
            "reason": self.reason,
            "output": self.output,
            "additional_context": self.additional_context,
            "type": self.response_type(),
            "message": self.message(),
        })
    }

    /// Fold this result's feedback into an already-produced tool result.
    pub fn merge(&self, tool_result: Value) -> Value {
        let mut map = match tool_result {
            Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("result".to_string(), other);
                map
            }
        };

        if self.decision == Some(HookDecision::Block) {
            map.insert("hook_blocked".to_string(), json!(true));
        }

        if self.decision == Some(HookDecision::Allow) {
            if let Some(ctx) = &self.additional_context {
                map.insert("agent_context_injection".to_string(), json!(ctx));
            }
        }

        if self.suppress_output {
            let original = Value::Object(std::mem::take(&mut map));
            map.insert("original_result".to_string(), original.clone());
            map.insert("original_tool_output".to_string(), original);
            if let Some(output) = &self.output {
                map.insert("output".to_string(), json!(output));
            }
        }

        let mut hook_feedback = serde_json::Map::new();
        hook_feedback.insert("success".to_string(), json!(self.success));
        if let Some(decision) = self.decision {
            hook_feedback.insert("decision".to_string(), json!(decision));
        }
        if let Some(reason) = &self.reason {
            hook_feedback.insert("reason".to_string(), json!(reason));
        }
        if let Some(output) = &self.output {
            hook_feedback.insert("output".to_string(), json!(output));
        }
        if let Some(ctx) = &self.additional_context {
            hook_feedback.insert("additional_context".to_string(), json!(ctx));
        }
        map.insert("hook_feedback".to_string(), Value::Object(hook_feedback));

        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_does_not_block() {
        assert!(!HookResult::allow().should_block());
    }

    #[test]
    fn deny_blocks_and_sets_continue_false() {
        let result = HookResult::deny("no writes");
        assert!(result.should_block());
        assert!(!result.continue_execution);
    }

    #[test]
    fn ask_blocks_but_keeps_continue_execution_true() {
        let result = HookResult::ask("need approval");
        assert!(result.should_block());
        assert!(result.continue_execution);
    }

    #[test]
    fn block_does_not_block_the_tool() {
        let result = HookResult::block("heads up", None);
        assert!(!result.should_block());
    }

    #[test]
    fn failed_hook_without_allow_decision_blocks() {
        let result = HookResult::error("boom");
        assert!(result.should_block());
    }

    #[test]
    fn blocked_response_matches_denial_scenario() {
        let result = HookResult::deny("no writes");
        let response = result.blocked_response();
        assert_eq!(response["blocked"], json!(true));
        assert_eq!(response["type"], json!("denied"));
        assert_eq!(
            response["message"],
            json!("Tool execution was denied: no writes")
        );
    }

    #[test]
    fn merge_exposes_additional_context_as_agent_injection() {
        let result = HookResult::allow_with(Some("tokens=5".to_string()), false, None);
        let merged = result.merge(json!({"result": "hi"}));
        assert_eq!(merged["agent_context_injection"], json!("tokens=5"));
        assert_eq!(merged["hook_feedback"]["decision"], json!("allow"));
    }

    #[test]
    fn merge_moves_original_result_aside_when_suppressed() {
        let mut result = HookResult::allow_with(None, true, Some("replacement".to_string()));
        result.decision = Some(HookDecision::Allow);
        let merged = result.merge(json!({"result": "hi"}));
        assert_eq!(merged["original_result"]["result"], json!("hi"));
        assert_eq!(merged["output"], json!("replacement"));
    }
}
