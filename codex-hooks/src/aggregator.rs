//! Merge `n >= 0` hook results into one, by fixed precedence. Pure and
//! referentially transparent: a plain function over `&[HookResult]`, never
//! touching shared state.

use codex_protocol::hooks::HookDecision;

use crate::decision::HookResult;

fn joined_reasons(results: &[&HookResult], decision: HookDecision) -> Option<String> {
    let reasons: Vec<&str> = results
        .iter()
        .filter(|r| r.decision == Some(decision))
        .filter_map(|r| r.reason.as_deref())
        .collect();
    if reasons.is_empty() {
        None
    } else {
        Some(reasons.join("; "))
    }
}

fn joined_outputs(results: &[&HookResult], decision: HookDecision) -> Option<String> {
    let outputs: Vec<&str> = results
        .iter()
        .filter(|r| r.decision == Some(decision))
        .filter_map(|r| r.output.as_deref())
        .collect();
    if outputs.is_empty() {
        None
    } else {
        Some(outputs.join("; "))
    }
}

/// Aggregate every hook result dispatched for one trigger into one decision.
pub fn aggregate(results: &[HookResult]) -> HookResult {
    if results.is_empty() {
        return HookResult::allow();
    }

    let successful: Vec<&HookResult> = results.iter().filter(|r| r.success).collect();
    if successful.is_empty() {
        let reasons: Vec<&str> = results.iter().filter_map(|r| r.reason.as_deref()).collect();
        return HookResult::error(format!("All hooks failed: {}", reasons.join("; ")));
    }

    if let Some(reason) = joined_reasons(&successful, HookDecision::Deny) {
        return HookResult::deny(format!("Denied by hooks: {reason}"));
    }
    if let Some(reason) = joined_reasons(&successful, HookDecision::Ask) {
        return HookResult::ask(format!("Confirmation required: {reason}"));
    }
    if let Some(reason) = joined_reasons(&successful, HookDecision::Block) {
        let output = joined_outputs(&successful, HookDecision::Block);
        return HookResult::block(format!("Blocked with feedback: {reason}"), output);
    }

    let contexts: Vec<&str> = successful
        .iter()
        .filter_map(|r| r.additional_context.as_deref())
        .collect();
    let outputs: Vec<&str> = successful.iter().filter_map(|r| r.output.as_deref()).collect();
    let suppress = successful.iter().any(|r| r.suppress_output);

    HookResult::allow_with(
        (!contexts.is_empty()).then(|| contexts.join("; ")),
        suppress,
        (!outputs.is_empty()).then(|| outputs.join("; ")),
    )
}
