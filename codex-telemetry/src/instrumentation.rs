//! Turns any agent into one whose executions open a telemetry span.
//!
//! Instrumenting a model-provider SDK's own call methods is out of scope
//! here (language-model abstraction lives outside this crate); this module
//! only covers wrapping an agent's own `run` entry point.
//!
//! There is no dynamic attribute table to proxy selectively in Rust, so
//! [`InstrumentedAgent`] `Deref`s to the wrapped agent for everything but
//! `run`, which it overrides with span bookkeeping.

use std::ops::Deref;
use std::sync::Arc;

use codex_protocol::telemetry::AgentKind;
use codex_protocol::telemetry::ExecutionStatus;

use crate::collector::TelemetryCollector;

/// Anything instrumentable: a single `run` entry point taking a task
/// description and producing some output or failing.
#[async_trait::async_trait]
pub trait Agent: Send + Sync {
    type Output: Send;

    async fn run(&self, task: &str) -> anyhow::Result<Self::Output>;
}

/// Wraps an `A: Agent`, emitting a `start_agent_execution`/
/// `end_agent_execution` pair around every `run` call. All other behavior
/// is the inner agent's, reached through `Deref`.
pub struct InstrumentedAgent<A: Agent> {
    inner: A,
    agent_name: String,
    agent_kind: AgentKind,
    collector: Arc<TelemetryCollector>,
    task_id: Option<String>,
}

impl<A: Agent> InstrumentedAgent<A> {
    pub fn new(
        inner: A,
        agent_name: impl Into<String>,
        agent_kind: AgentKind,
        collector: Arc<TelemetryCollector>,
        task_id: Option<String>,
    ) -> Self {
        Self {
            inner,
            agent_name: agent_name.into(),
            agent_kind,
            collector,
            task_id,
        }
    }

    pub fn into_inner(self) -> A {
        self.inner
    }
}

impl<A: Agent> Deref for InstrumentedAgent<A> {
    type Target = A;

    fn deref(&self) -> &A {
        &self.inner
    }
}

#[async_trait::async_trait]
impl<A: Agent> Agent for InstrumentedAgent<A> {
    type Output = A::Output;

    async fn run(&self, task: &str) -> anyhow::Result<Self::Output> {
        let agent_id = format!(
            "{:?}_{}_{}",
            self.agent_kind,
            self.agent_name,
            &uuid::Uuid::new_v4().to_string()[..8]
        );
        self.collector.start_agent_execution(
            agent_id.clone(),
            self.agent_kind,
            self.agent_name.clone(),
            self.task_id.clone(),
        );

        match self.inner.run(task).await {
            Ok(output) => {
                self.collector.end_agent_execution(
                    &agent_id,
                    ExecutionStatus::Completed,
                    self.task_id.as_deref(),
                    None,
                );
                Ok(output)
            }
            Err(err) => {
                self.collector.end_agent_execution(
                    &agent_id,
                    ExecutionStatus::Failed,
                    self.task_id.as_deref(),
                    Some(err.to_string()),
                );
                Err(err)
            }
        }
    }
}

/// A scoped resource covering one task's telemetry lifetime. Its `Drop`
/// impl ends the task with a status inferred from whether [`fail`] was
/// called, guaranteed to run on every exit path including panic unwinding.
pub struct TelemetryContext {
    task_id: String,
    collector: Option<Arc<TelemetryCollector>>,
    failure: std::sync::Mutex<Option<String>>,
}

impl TelemetryContext {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn collector(&self) -> Option<&Arc<TelemetryCollector>> {
        self.collector.as_ref()
    }

    /// Record that the wrapped execution failed; the task will be ended
    /// `failed` with this message when the context is dropped, instead of
    /// `completed`.
    pub fn fail(&self, message: impl Into<String>) {
        *self.failure.lock().expect("telemetry context failure lock poisoned") = Some(message.into());
    }
}

impl Drop for TelemetryContext {
    fn drop(&mut self) {
        let Some(collector) = &self.collector else { return };
        let failure = self
            .failure
            .lock()
            .expect("telemetry context failure lock poisoned")
            .take();
        match failure {
            Some(message) => collector.end_task(&self.task_id, ExecutionStatus::Failed, Some(message), None),
            None => collector.end_task(&self.task_id, ExecutionStatus::Completed, None, None),
        }
    }
}

/// The main entry point: resolve the telemetry manager, start a task, and
/// return a guard covering its lifetime. When telemetry is disabled (or
/// setup fails for any reason), the returned context has no collector and
/// its `Drop` is a no-op — callers proceed exactly as if telemetry were
/// never in the picture; a telemetry setup failure must never block agent
/// execution.
pub async fn telemetry_context(
    task: impl Into<String>,
    sop_category: Option<String>,
    task_id: Option<String>,
) -> TelemetryContext {
    let task = task.into();
    let task_id = task_id.unwrap_or_else(|| format!("task_{}", &uuid::Uuid::new_v4().to_string()[..8]));

    let manager = crate::manager::manager().await;
    if !manager.is_enabled() {
        manager.initialize(None).await;
    }
    if !manager.is_enabled() {
        tracing::debug!("telemetry disabled; context has no collector");
        return TelemetryContext {
            task_id,
            collector: None,
            failure: std::sync::Mutex::new(None),
        };
    }

    let Some(collector) = manager.get_collector().await else {
        tracing::debug!("no telemetry collector available; context has no collector");
        return TelemetryContext {
            task_id,
            collector: None,
            failure: std::sync::Mutex::new(None),
        };
    };

    collector.start_task(task_id.clone(), task, sop_category);
    tracing::debug!(task_id = %task_id, "started telemetry task tracking");

    TelemetryContext {
        task_id,
        collector: Some(collector),
        failure: std::sync::Mutex::new(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::TelemetryConfig;
    use crate::manager::TelemetryManager;

    struct Echo;

    #[async_trait::async_trait]
    impl Agent for Echo {
        type Output = String;

        async fn run(&self, task: &str) -> anyhow::Result<String> {
            Ok(format!("did: {task}"))
        }
    }

    struct AlwaysFails;

    #[async_trait::async_trait]
    impl Agent for AlwaysFails {
        type Output = ();

        async fn run(&self, _task: &str) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("boom"))
        }
    }

    #[tokio::test]
    async fn successful_run_ends_agent_execution_completed() {
        let manager = TelemetryManager::new();
        let dir = tempfile::tempdir().unwrap();
        manager
            .initialize(Some(TelemetryConfig {
                storage_dir: Some(dir.path().to_path_buf()),
                ..Default::default()
            }))
            .await;
        let collector = manager.get_collector().await.unwrap();
        collector.start_task("t1", "desc", None);

        let agent = InstrumentedAgent::new(Echo, "worker", AgentKind::Micro, collector.clone(), Some("t1".to_string()));
        let result = agent.run("do it").await.unwrap();
        assert_eq!(result, "did: do it");

        collector.end_task("t1", ExecutionStatus::Completed, None, None);
        let session = collector.get_session_data();
        assert_eq!(session.tasks[0].agents[0].status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn failed_run_ends_agent_execution_failed_and_propagates_error() {
        let manager = TelemetryManager::new();
        let dir = tempfile::tempdir().unwrap();
        manager
            .initialize(Some(TelemetryConfig {
                storage_dir: Some(dir.path().to_path_buf()),
                ..Default::default()
            }))
            .await;
        let collector = manager.get_collector().await.unwrap();
        collector.start_task("t1", "desc", None);

        let agent = InstrumentedAgent::new(AlwaysFails, "worker", AgentKind::Micro, collector, Some("t1".to_string()));
        let err = agent.run("do it").await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn context_drop_ends_task_completed_by_default() {
        let manager = TelemetryManager::new();
        let dir = tempfile::tempdir().unwrap();
        manager
            .initialize(Some(TelemetryConfig {
                storage_dir: Some(dir.path().to_path_buf()),
                ..Default::default()
            }))
            .await;
        let collector = manager.get_collector().await.unwrap();

        {
            let _ctx = TelemetryContext {
                task_id: "t1".to_string(),
                collector: Some(collector.clone()),
                failure: std::sync::Mutex::new(None),
            };
            collector.start_task("t1", "desc", None);
        }

        let session = collector.get_session_data();
        assert_eq!(session.tasks[0].status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn context_drop_ends_task_failed_when_marked() {
        let manager = TelemetryManager::new();
        let dir = tempfile::tempdir().unwrap();
        manager
            .initialize(Some(TelemetryConfig {
                storage_dir: Some(dir.path().to_path_buf()),
                ..Default::default()
            }))
            .await;
        let collector = manager.get_collector().await.unwrap();

        {
            let ctx = TelemetryContext {
                task_id: "t1".to_string(),
                collector: Some(collector.clone()),
                failure: std::sync::Mutex::new(None),
            };
            collector.start_task("t1", "desc", None);
            ctx.fail("kaboom");
        }

        let session = collector.get_session_data();
        assert_eq!(session.tasks[0].status, ExecutionStatus::Failed);
        assert_eq!(session.tasks[0].error_message.as_deref(), Some("kaboom"));
    }
}
