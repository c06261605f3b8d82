//! Thread-safe buffer of the current telemetry session, supporting
//! concurrent span management.
//!
//! Every public method is idempotent-safe against "already active" / "not
//! active" callers: such calls are logged and become no-ops rather than
//! raising (telemetry errors must never be observable from tool code).
//! Attachment to "the most recently started active task" is a linear
//! max-by-start-time scan over `active_tasks`, not a secondary ordered
//! index — the active-span maps stay small (bounded by concurrently open
//! spans), so this is the simple choice over a back-pointer structure the
//! data never needed.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use codex_protocol::telemetry::AgentExecution;
use codex_protocol::telemetry::AgentKind;
use codex_protocol::telemetry::CodeMetrics;
use codex_protocol::telemetry::Environment;
use codex_protocol::telemetry::ExecutionStatus;
use codex_protocol::telemetry::LLMCall;
use codex_protocol::telemetry::TaskExecution;
use codex_protocol::telemetry::TelemetrySession;
use codex_protocol::telemetry::ToolExecution;

struct ActiveAgent {
    execution: AgentExecution,
    owner_task_id: Option<String>,
}

struct ActiveTool {
    execution: ToolExecution,
    owner_agent_id: Option<String>,
}

struct Inner {
    session: TelemetrySession,
    active_tasks: HashMap<String, TaskExecution>,
    active_agents: HashMap<String, ActiveAgent>,
    active_tools: HashMap<String, ActiveTool>,
}

pub struct TelemetryCollector {
    inner: Mutex<Inner>,
}

fn seconds_between(start: chrono::DateTime<Utc>, end: chrono::DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}

fn most_recent_active_task_id(active_tasks: &HashMap<String, TaskExecution>) -> Option<String> {
    active_tasks
        .iter()
        .max_by_key(|(_, task)| task.start_time)
        .map(|(id, _)| id.clone())
}

/// End an already-removed agent execution in place and attach it to
/// `task_id` if that task is still active, else the most recently started
/// active task, else drop it with a warning.
fn end_agent_locked(
    inner: &mut Inner,
    agent_id: &str,
    status: ExecutionStatus,
    task_id: Option<&str>,
    error: Option<String>,
) {
    let Some(mut active) = inner.active_agents.remove(agent_id) else {
        tracing::warn!(agent_id, "agent not active, ignoring end");
        return;
    };

    let end = Utc::now();
    active.execution.end_time = Some(end);
    active.execution.duration = Some(seconds_between(active.execution.start_time, end));
    active.execution.status = status;
    active.execution.error_message = error;

    let preferred = task_id
        .map(str::to_string)
        .or_else(|| active.owner_task_id.clone());
    let target = preferred
        .filter(|id| inner.active_tasks.contains_key(id))
        .or_else(|| most_recent_active_task_id(&inner.active_tasks));

    match target {
        Some(id) => {
            if let Some(task) = inner.active_tasks.get_mut(&id) {
                task.agents.push(active.execution);
            }
        }
        None => tracing::warn!(agent_id, "no active task to attach ended agent execution to"),
    }
}

/// End an already-removed tool execution in place, attaching it to
/// `agent_id`'s `tools_used` if active, else the most recent active task's
/// direct `tools` list (tools attach to tasks directly, not nested under an
/// agent, when no agent owns them).
fn end_tool_locked(
    inner: &mut Inner,
    tool_id: &str,
    status: ExecutionStatus,
    agent_id: Option<&str>,
    error: Option<String>,
) {
    let Some(mut active) = inner.active_tools.remove(tool_id) else {
        tracing::warn!(tool_id, "tool not active, ignoring end");
        return;
    };

    let end = Utc::now();
    active.execution.end_time = Some(end);
    active.execution.duration = Some(seconds_between(active.execution.start_time, end));
    active.execution.status = status;
    active.execution.error_message = error;

    let preferred_agent = agent_id
        .map(str::to_string)
        .or_else(|| active.owner_agent_id.clone());
    if let Some(agent_id) = preferred_agent.filter(|id| inner.active_agents.contains_key(id)) {
        if let Some(agent) = inner.active_agents.get_mut(&agent_id) {
            agent.execution.tools_used.push(active.execution);
        }
        return;
    }

    match most_recent_active_task_id(&inner.active_tasks) {
        Some(id) => {
            if let Some(task) = inner.active_tasks.get_mut(&id) {
                task.tools.push(active.execution);
            }
        }
        None => tracing::warn!(tool_id, "no active agent or task to attach ended tool execution to"),
    }
}

impl TelemetryCollector {
    pub fn new(session_id: impl Into<String>, environment: Environment) -> Self {
        Self {
            inner: Mutex::new(Inner {
                session: TelemetrySession::new(session_id, Utc::now(), environment),
                active_tasks: HashMap::new(),
                active_agents: HashMap::new(),
                active_tools: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("telemetry collector lock poisoned")
    }

    pub fn session_id(&self) -> String {
        self.lock().session.session_id.clone()
    }

    pub fn start_task(
        &self,
        task_id: impl Into<String>,
        description: impl Into<String>,
        sop_category: Option<String>,
    ) {
        let task_id = task_id.into();
        let mut inner = self.lock();
        if inner.active_tasks.contains_key(&task_id) {
            tracing::warn!(task_id, "task already active, ignoring duplicate start");
            return;
        }
        let task = TaskExecution::new(task_id.clone(), description, Utc::now(), sop_category);
        inner.active_tasks.insert(task_id, task);
    }

    pub fn end_task(
        &self,
        task_id: &str,
        status: ExecutionStatus,
        error: Option<String>,
        code_changes: Option<CodeMetrics>,
    ) {
        let mut inner = self.lock();
        let Some(mut task) = inner.active_tasks.remove(task_id) else {
            tracing::warn!(task_id, "task not active, ignoring end");
            return;
        };
        task.end_time = Some(Utc::now());
        task.status = status;
        task.error_message = error;
        if let Some(metrics) = code_changes {
            task.code_changes = metrics;
        }
        inner.session.add_task(task);
    }

    pub fn start_agent_execution(
        &self,
        agent_id: impl Into<String>,
        kind: AgentKind,
        name: impl Into<String>,
        task_id: Option<String>,
    ) {
        let agent_id = agent_id.into();
        let mut inner = self.lock();
        if inner.active_agents.contains_key(&agent_id) {
            tracing::warn!(agent_id, "agent already active, ignoring duplicate start");
            return;
        }
        inner.active_agents.insert(
            agent_id,
            ActiveAgent {
                execution: AgentExecution::new(kind, name, Utc::now()),
                owner_task_id: task_id,
            },
        );
    }

    pub fn end_agent_execution(
        &self,
        agent_id: &str,
        status: ExecutionStatus,
        task_id: Option<&str>,
        error: Option<String>,
    ) {
        end_agent_locked(&mut self.lock(), agent_id, status, task_id, error);
    }

    pub fn start_tool_execution(
        &self,
        tool_id: impl Into<String>,
        name: impl Into<String>,
        agent_id: Option<String>,
    ) {
        let tool_id = tool_id.into();
        let mut inner = self.lock();
        if inner.active_tools.contains_key(&tool_id) {
            tracing::warn!(tool_id, "tool already active, ignoring duplicate start");
            return;
        }
        inner.active_tools.insert(
            tool_id,
            ActiveTool {
                execution: ToolExecution::new(name, Utc::now()),
                owner_agent_id: agent_id,
            },
        );
    }

    pub fn end_tool_execution(
        &self,
        tool_id: &str,
        status: ExecutionStatus,
        agent_id: Option<&str>,
        error: Option<String>,
    ) {
        end_tool_locked(&mut self.lock(), tool_id, status, agent_id, error);
    }

    /// Attach priority: `agent_id` -> `task_id` -> most recently started
    /// active task's direct LLM calls.
    pub fn record_llm_call(&self, call: LLMCall, agent_id: Option<&str>, task_id: Option<&str>) {
        let mut inner = self.lock();
        if let Some(agent_id) = agent_id {
            if let Some(agent) = inner.active_agents.get_mut(agent_id) {
                agent.execution.llm_calls.push(call);
                return;
            }
        }
        if let Some(task_id) = task_id {
            if let Some(task) = inner.active_tasks.get_mut(task_id) {
                task.llm_calls.push(call);
                return;
            }
        }
        match most_recent_active_task_id(&inner.active_tasks) {
            Some(id) => {
                if let Some(task) = inner.active_tasks.get_mut(&id) {
                    task.llm_calls.push(call);
                }
            }
            None => tracing::warn!("no active task to attach LLM call to"),
        }
    }

    pub fn record_code_changes(&self, task_id: &str, metrics: CodeMetrics) {
        let mut inner = self.lock();
        match inner.active_tasks.get_mut(task_id) {
            Some(task) => task.code_changes = metrics,
            None => tracing::warn!(task_id, "task not active, ignoring code-change record"),
        }
    }

    /// Start a task and a supervisor-kind agent at once; returns the
    /// synthesized agent id, of the form `"{task_id}_supervisor_{agent_name}"`.
    pub fn start_supervisor_task(
        &self,
        task_id: impl Into<String>,
        description: impl Into<String>,
        agent_name: impl Into<String>,
        sop_category: Option<String>,
    ) -> String {
        let task_id = task_id.into();
        let agent_name = agent_name.into();
        self.start_task(task_id.clone(), description, sop_category);
        let agent_id = format!("{task_id}_supervisor_{agent_name}");
        self.start_agent_execution(
            agent_id.clone(),
            AgentKind::Supervisor,
            agent_name,
            Some(task_id),
        );
        agent_id
    }

    pub fn end_supervisor_task(
        &self,
        task_id: &str,
        agent_id: &str,
        status: ExecutionStatus,
        error: Option<String>,
    ) {
        self.end_agent_execution(agent_id, status, Some(task_id), error.clone());
        self.end_task(task_id, status, error, None);
    }

    /// Record an already-completed agent execution in one call by
    /// back-computing a synthetic start time from `end_time - duration`.
    #[allow(clippy::too_many_arguments)]
    pub fn record_agent_execution(
        &self,
        agent_id: impl Into<String>,
        kind: AgentKind,
        name: impl Into<String>,
        duration_secs: f64,
        status: ExecutionStatus,
        task_id: Option<&str>,
        llm_calls: Vec<LLMCall>,
        error: Option<String>,
    ) {
        let end = Utc::now();
        let start = end - chrono::Duration::milliseconds((duration_secs * 1000.0) as i64);
        let mut execution = AgentExecution::new(kind, name, start);
        execution.end_time = Some(end);
        execution.duration = Some(duration_secs);
        execution.status = status;
        execution.llm_calls = llm_calls;
        execution.error_message = error;

        let agent_id = agent_id.into();
        let mut inner = self.lock();
        inner.active_agents.insert(
            agent_id.clone(),
            ActiveAgent {
                execution,
                owner_task_id: task_id.map(str::to_string),
            },
        );
        end_agent_locked(&mut inner, &agent_id, status, task_id, None);
    }

    /// Record an already-completed tool execution in one call, attaching to
    /// `agent_id` if given else the most recent active task.
    pub fn record_tool_usage(
        &self,
        tool_id: impl Into<String>,
        name: impl Into<String>,
        duration_secs: f64,
        status: ExecutionStatus,
        agent_id: Option<&str>,
        error: Option<String>,
    ) {
        let end = Utc::now();
        let start = end - chrono::Duration::milliseconds((duration_secs * 1000.0) as i64);
        let mut execution = ToolExecution::new(name, start);
        execution.end_time = Some(end);
        execution.duration = Some(duration_secs);
        execution.status = status;
        execution.error_message = error;

        let tool_id = tool_id.into();
        let mut inner = self.lock();
        inner.active_tools.insert(
            tool_id.clone(),
            ActiveTool {
                execution,
                owner_agent_id: agent_id.map(str::to_string),
            },
        );
        end_tool_locked(&mut inner, &tool_id, status, agent_id, None);
    }

    pub fn get_session_data(&self) -> TelemetrySession {
        self.lock().session.clone()
    }

    pub fn get_active_task_ids(&self) -> Vec<String> {
        self.lock().active_tasks.keys().cloned().collect()
    }

    pub fn get_active_agent_ids(&self) -> Vec<String> {
        self.lock().active_agents.keys().cloned().collect()
    }

    pub fn get_active_tool_ids(&self) -> Vec<String> {
        self.lock().active_tools.keys().cloned().collect()
    }

    /// End every still-active task/agent/tool with status `Partial`, set the
    /// session's end time, and return the finalized session. After this
    /// call no further mutation should be attempted on the returned value
    /// through this collector.
    pub fn finalize_session(&self) -> TelemetrySession {
        let mut inner = self.lock();

        let agent_ids: Vec<String> = inner.active_agents.keys().cloned().collect();
        for agent_id in agent_ids {
            end_agent_locked(&mut inner, &agent_id, ExecutionStatus::Partial, None, None);
        }

        let tool_ids: Vec<String> = inner.active_tools.keys().cloned().collect();
        for tool_id in tool_ids {
            end_tool_locked(&mut inner, &tool_id, ExecutionStatus::Partial, None, None);
        }

        let task_ids: Vec<String> = inner.active_tasks.keys().cloned().collect();
        for task_id in task_ids {
            if let Some(mut task) = inner.active_tasks.remove(&task_id) {
                task.end_time = Some(Utc::now());
                task.status = ExecutionStatus::Partial;
                inner.session.add_task(task);
            }
        }

        inner.session.end_time = Some(Utc::now());
        inner.session.clone()
    }

    /// Promote every still in-progress task to `Interrupted` (agents/tools
    /// under it still become `Partial`) and return the session. Distinct
    /// from `finalize_session`: used only by the forced-shutdown path.
    pub fn force_flush(&self) -> TelemetrySession {
        let mut inner = self.lock();

        let agent_ids: Vec<String> = inner.active_agents.keys().cloned().collect();
        for agent_id in agent_ids {
            end_agent_locked(&mut inner, &agent_id, ExecutionStatus::Partial, None, None);
        }
        let tool_ids: Vec<String> = inner.active_tools.keys().cloned().collect();
        for tool_id in tool_ids {
            end_tool_locked(&mut inner, &tool_id, ExecutionStatus::Partial, None, None);
        }

        let task_ids: Vec<String> = inner.active_tasks.keys().cloned().collect();
        for task_id in task_ids {
            if let Some(mut task) = inner.active_tasks.remove(&task_id) {
                task.end_time = Some(Utc::now());
                task.status = ExecutionStatus::Interrupted;
                task.error_message = Some("Session interrupted".to_string());
                inner.session.add_task(task);
            }
        }

        inner.session.end_time = Some(Utc::now());
        inner.session.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> TelemetryCollector {
        TelemetryCollector::new("s1", Environment::default())
    }

    #[test]
    fn round_trip_task_agent_llm_call() {
        let collector = collector();
        collector.start_task("t1", "do the thing", None);
        collector.start_agent_execution("a1", AgentKind::Micro, "worker", Some("t1".to_string()));
        collector.record_llm_call(
            LLMCall::new("m", 100, 50, 1.5, Utc::now()),
            Some("a1"),
            None,
        );
        collector.end_agent_execution("a1", ExecutionStatus::Completed, Some("t1"), None);
        collector.end_task("t1", ExecutionStatus::Completed, None, None);

        let session = collector.get_session_data();
        assert_eq!(session.tasks.len(), 1);
        assert_eq!(session.tasks[0].agents.len(), 1);
        assert_eq!(session.tasks[0].agents[0].llm_calls[0].model, "m");
        assert_eq!(session.total_tokens.total_tokens, 150);
    }

    #[test]
    fn tool_without_agent_attaches_to_most_recent_task() {
        let collector = collector();
        collector.start_task("t1", "desc", None);
        collector.start_tool_execution("tool1", "search", None);
        collector.end_tool_execution("tool1", ExecutionStatus::Completed, None, None);
        collector.end_task("t1", ExecutionStatus::Completed, None, None);

        let session = collector.get_session_data();
        assert_eq!(session.tasks[0].tools.len(), 1);
        assert!(session.tasks[0].agents.is_empty());
    }

    #[test]
    fn finalize_marks_open_spans_partial() {
        let collector = collector();
        collector.start_task("t1", "desc", None);
        collector.start_agent_execution("a1", AgentKind::Micro, "worker", Some("t1".to_string()));

        let session = collector.finalize_session();
        assert_eq!(session.tasks[0].status, ExecutionStatus::Partial);
        assert_eq!(session.tasks[0].agents[0].status, ExecutionStatus::Partial);
        assert!(session.end_time.is_some());
    }

    #[test]
    fn force_flush_marks_tasks_interrupted_and_agents_partial() {
        let collector = collector();
        collector.start_task("t1", "desc", None);
        collector.start_agent_execution("a1", AgentKind::Micro, "worker", Some("t1".to_string()));

        let session = collector.force_flush();
        assert_eq!(session.tasks[0].status, ExecutionStatus::Interrupted);
        assert_eq!(session.tasks[0].agents[0].status, ExecutionStatus::Partial);
        assert_eq!(
            session.tasks[0].error_message.as_deref(),
            Some("Session interrupted")
        );
    }

    #[test]
    fn supervisor_convenience_pair_uses_expected_agent_id_format() {
        let collector = collector();
        let agent_id = collector.start_supervisor_task("t1", "desc", "planner", None);
        assert_eq!(agent_id, "t1_supervisor_planner");
        collector.end_supervisor_task("t1", &agent_id, ExecutionStatus::Completed, None);

        let session = collector.get_session_data();
        assert_eq!(session.tasks[0].agents[0].name, "planner");
    }

    #[test]
    fn double_start_task_is_idempotent_safe() {
        let collector = collector();
        collector.start_task("t1", "first", None);
        collector.start_task("t1", "second", None);
        assert_eq!(collector.get_active_task_ids(), vec!["t1".to_string()]);
    }
}
