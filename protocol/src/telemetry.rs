//! Wire format for the telemetry pipeline: the session/task/agent/tool/LLM
//! call hierarchy persisted by `codex-telemetry`'s data store and, before
//! that, accumulated by its collector.
//!
//! Every type here is a plain serde data model with no behavior beyond the
//! additive-composition helpers the design calls out explicitly
//! (`TokenUsage::add`, `TelemetrySession::add_task`, the two `total_tokens`
//! roll-ups). Field order matches declaration order, which is what gives the
//! JSON output its determinism (no `HashMap`-keyed top level maps).

use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;

/// Terminal and in-flight states shared by tasks, agents, and tool
/// executions. `Partial` is assigned only by a forced finalize to spans that
/// were never explicitly ended; `Interrupted` is assigned by the data
/// store's `force_flush_all` to tasks still `InProgress` at shutdown.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Partial,
    Interrupted,
}

/// Kind of agent an `AgentExecution` span records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Supervisor,
    Micro,
    ToolCalling,
    Code,
    Managed,
}

/// Additive token-usage accumulator. `add` sums counts, recursively merges
/// `model_breakdown`, and sums cost estimates only when both sides provide
/// one (an absent estimate on either side is left as whatever the other side
/// had, rather than treating "unknown" as zero).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub model_breakdown: HashMap<String, TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cost_estimate: Option<f64>,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            model_breakdown: HashMap::new(),
            cost_estimate: None,
        }
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;

        for (model, usage) in &other.model_breakdown {
            self.model_breakdown
                .entry(model.clone())
                .or_default()
                .add(usage);
        }

        self.cost_estimate = match (self.cost_estimate, other.cost_estimate) {
            (Some(a), Some(b)) => Some(a + b),
            (None, Some(b)) => Some(b),
            (existing, None) => existing,
        };
    }
}

/// Environment snapshot captured once at session start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Environment {
    pub os_type: String,
    pub os_version: String,
    pub runtime_version: String,
    pub working_directory: String,
    pub project_root: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_name: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub environment_variables: HashMap<String, String>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// One LLM call's token usage and timing. `total_tokens` defaults to
/// `prompt_tokens + completion_tokens` when constructed via [`LLMCall::new`];
/// callers supplying a pre-computed total bypass that (matching the
/// reference's tolerance for an explicitly provided total that disagrees
/// with prompt+completion, e.g. when a provider reports extra reasoning
/// tokens).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LLMCall {
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub duration: f64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cost_estimate: Option<f64>,
}

impl LLMCall {
    pub fn new(
        model: impl Into<String>,
        prompt_tokens: u64,
        completion_tokens: u64,
        duration: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self {
            model: model.into(),
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            duration,
            timestamp,
            cost_estimate: None,
        }
    }

    pub fn token_usage(&self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
            model_breakdown: HashMap::new(),
            cost_estimate: self.cost_estimate,
        }
    }
}

/// Code-change metrics attached to a task.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeMetrics {
    #[serde(default)]
    pub files_created: u32,
    #[serde(default)]
    pub files_modified: u32,
    #[serde(default)]
    pub files_deleted: u32,
    #[serde(default)]
    pub lines_added: u64,
    #[serde(default)]
    pub lines_removed: u64,
    #[serde(default)]
    pub lines_modified: u64,
}

/// A single tool invocation's lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolExecution {
    pub name: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub duration: Option<f64>,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
}

impl ToolExecution {
    pub fn new(name: impl Into<String>, start_time: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            name: name.into(),
            start_time,
            end_time: None,
            duration: None,
            status: ExecutionStatus::InProgress,
            error_message: None,
        }
    }
}

/// One agent activation's lifecycle, including the LLM calls and direct
/// tool executions it attributed to itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentExecution {
    pub kind: AgentKind,
    pub name: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub duration: Option<f64>,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub llm_calls: Vec<LLMCall>,
    #[serde(default)]
    pub tools_used: Vec<ToolExecution>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
}

impl AgentExecution {
    pub fn new(
        kind: AgentKind,
        name: impl Into<String>,
        start_time: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            start_time,
            end_time: None,
            duration: None,
            status: ExecutionStatus::InProgress,
            llm_calls: Vec::new(),
            tools_used: Vec::new(),
            error_message: None,
        }
    }

    /// Sum of this agent's own LLM calls' token usage.
    pub fn total_tokens(&self) -> TokenUsage {
        let mut total = TokenUsage::default();
        for call in &self.llm_calls {
            total.add(&call.token_usage());
        }
        total
    }
}

/// A top-level unit of agent work within a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskExecution {
    pub task_id: String,
    pub description: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sop_category: Option<String>,
    #[serde(default)]
    pub agents: Vec<AgentExecution>,
    #[serde(default)]
    pub tools: Vec<ToolExecution>,
    #[serde(default)]
    pub llm_calls: Vec<LLMCall>,
    #[serde(default)]
    pub code_changes: CodeMetrics,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
}

impl TaskExecution {
    pub fn new(
        task_id: impl Into<String>,
        description: impl Into<String>,
        start_time: chrono::DateTime<chrono::Utc>,
        sop_category: Option<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            description: description.into(),
            start_time,
            end_time: None,
            status: ExecutionStatus::InProgress,
            sop_category,
            agents: Vec::new(),
            tools: Vec::new(),
            llm_calls: Vec::new(),
            code_changes: CodeMetrics::default(),
            error_message: None,
        }
    }

    pub fn duration(&self) -> Option<f64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds() as f64 / 1000.0)
    }

    /// Direct LLM-call tokens plus the total tokens of every agent this task
    /// owns.
    pub fn total_tokens(&self) -> TokenUsage {
        let mut total = TokenUsage::default();
        for call in &self.llm_calls {
            total.add(&call.token_usage());
        }
        for agent in &self.agents {
            total.add(&agent.total_tokens());
        }
        total
    }
}

/// The complete record of one process lifetime's telemetry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySession {
    pub session_id: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    pub environment: Environment,
    #[serde(default)]
    pub tasks: Vec<TaskExecution>,
    #[serde(default)]
    pub total_tokens: TokenUsage,
    #[serde(default)]
    pub total_duration: f64,
}

impl TelemetrySession {
    pub fn new(
        session_id: impl Into<String>,
        start_time: chrono::DateTime<chrono::Utc>,
        environment: Environment,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            start_time,
            end_time: None,
            environment,
            tasks: Vec::new(),
            total_tokens: TokenUsage::default(),
            total_duration: 0.0,
        }
    }

    /// Append `task`, folding its token usage and (if ended) its duration
    /// into the session's running totals.
    pub fn add_task(&mut self, task: TaskExecution) {
        self.total_tokens.add(&task.total_tokens());
        if let Some(duration) = task.duration() {
            self.total_duration += duration;
        }
        self.tasks.push(task);
    }

    pub fn session_duration(&self) -> Option<f64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds() as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;

    fn ts(secs: i64) -> chrono::DateTime<chrono::Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn token_usage_adds_and_merges_breakdown() {
        let mut total = TokenUsage::new(10, 5);
        let mut other = TokenUsage::new(3, 2);
        other
            .model_breakdown
            .insert("gpt".to_string(), TokenUsage::new(3, 2));
        other.cost_estimate = Some(0.5);
        total.cost_estimate = Some(1.0);

        total.add(&other);

        assert_eq!(total.prompt_tokens, 13);
        assert_eq!(total.completion_tokens, 7);
        assert_eq!(total.total_tokens, 15);
        assert_eq!(total.cost_estimate, Some(1.5));
        assert_eq!(
            total.model_breakdown.get("gpt").unwrap().total_tokens,
            5
        );
    }

    #[test]
    fn task_total_tokens_includes_direct_and_agent_calls() {
        let mut task = TaskExecution::new("t1", "desc", ts(0), None);
        task.llm_calls.push(LLMCall::new("m", 10, 5, 1.0, ts(0)));

        let mut agent = AgentExecution::new(AgentKind::Micro, "a1", ts(0));
        agent.llm_calls.push(LLMCall::new("m", 100, 50, 1.5, ts(1)));
        task.agents.push(agent);

        assert_eq!(task.total_tokens().total_tokens, 165);
    }

    #[test]
    fn session_add_task_rolls_up_tokens_and_duration() {
        let mut session = TelemetrySession::new("s1", ts(0), Environment::default());
        let mut task = TaskExecution::new("t1", "desc", ts(0), None);
        task.llm_calls.push(LLMCall::new("m", 100, 50, 1.5, ts(0)));
        task.end_time = Some(ts(2));
        task.status = ExecutionStatus::Completed;

        session.add_task(task);

        assert_eq!(session.total_tokens.total_tokens, 150);
        assert_eq!(session.total_duration, 2.0);
        assert_eq!(session.tasks.len(), 1);
    }

    #[test]
    fn session_round_trips_through_json() {
        let mut session = TelemetrySession::new("s1", ts(0), Environment::default());
        let mut task = TaskExecution::new("t1", "desc", ts(0), Some("bugfix".to_string()));
        task.end_time = Some(ts(2));
        task.status = ExecutionStatus::Completed;
        session.add_task(task);

        let json = serde_json::to_string(&session).unwrap();
        let back: TelemetrySession = serde_json::from_str(&json).unwrap();
        assert_eq!(session, back);
    }
}
