//! Optional best-effort remote telemetry sink.
//!
//! The actual event-submission backend is an external collaborator out of
//! scope for this crate, so the dependency is expressed as a trait: the
//! data store depends only on `RemoteTelemetrySink`, and a no-op default
//! ships so the store works unmodified with nothing configured.

use async_trait::async_trait;
use codex_protocol::telemetry::TelemetrySession;

/// A single best-effort "ship this finalized session somewhere else" call.
/// Implementations must never panic and should treat their own failures as
/// loggable, not fatal — the data store only calls this after its own
/// write has already succeeded.
#[async_trait]
pub trait RemoteTelemetrySink: Send + Sync {
    /// `event_name` is conventionally `"<app>:agent-stats"`; `module` is a
    /// caller-supplied origin tag identifying which subsystem produced the
    /// session.
    async fn send_session(
        &self,
        session_id: &str,
        event_name: &str,
        details: &TelemetrySession,
        module: &str,
    ) -> bool;
}

/// The default sink: accepts everything, sends nothing. Used whenever no
/// sink is configured so the data store's `flush()` path never has to
/// special-case "no sink".
pub struct NoopRemoteTelemetrySink;

#[async_trait]
impl RemoteTelemetrySink for NoopRemoteTelemetrySink {
    async fn send_session(
        &self,
        _session_id: &str,
        _event_name: &str,
        _details: &TelemetrySession,
        _module: &str,
    ) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use codex_protocol::telemetry::Environment;

    #[tokio::test]
    async fn noop_sink_reports_not_sent() {
        let sink = NoopRemoteTelemetrySink;
        let session = TelemetrySession::new("s1", Utc::now(), Environment::default());
        let sent = sink
            .send_session("s1", "app:agent-stats", &session, "sop_agents")
            .await;
        assert!(!sent);
    }
}
