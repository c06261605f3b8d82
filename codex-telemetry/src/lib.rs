//! # Telemetry pipeline
//!
//! Session/task/agent/tool span collection, durable local storage, and the
//! instrumentation helpers that wire the two together.
//!
//! ## Architecture
//!
//! - [`collector`]: thread-safe buffer of the current session's in-flight
//!   and completed spans.
//! - [`store`]: file-based persistence with locking, atomic rename,
//!   auto-flush, and age-based cleanup.
//! - [`remote`]: the optional best-effort sink a finalized session is
//!   forwarded to.
//! - [`environment`]: the one-shot OS/project/environment-variable snapshot
//!   taken at session start.
//! - [`manager`]: the process-wide singleton tying the above together
//!   behind `initialize`/`get_collector`/`shutdown`.
//! - [`instrumentation`]: wraps an arbitrary agent so its executions open a
//!   telemetry span automatically.
//! - [`error`]: the telemetry-specific error taxonomy built on the shared
//!   generic error classifier.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use codex_telemetry::manager;
//!
//! manager::initialize(None).await;
//! let collector = manager::get_collector().await.expect("telemetry enabled");
//! collector.start_task("t1", "review the PR", None);
//! // ... do work ...
//! collector.end_task("t1", codex_protocol::telemetry::ExecutionStatus::Completed, None, None);
//! manager::shutdown().await;
//! ```

pub mod collector;
pub mod environment;
pub mod error;
pub mod instrumentation;
pub mod manager;
pub mod remote;
pub mod store;

#[cfg(feature = "otel")]
pub mod otel;

pub use collector::TelemetryCollector;
pub use instrumentation::Agent;
pub use instrumentation::InstrumentedAgent;
pub use instrumentation::TelemetryContext;
pub use manager::TelemetryConfig;
pub use manager::TelemetryManager;
pub use remote::NoopRemoteTelemetrySink;
pub use remote::RemoteTelemetrySink;
pub use store::StorageStats;
pub use store::TelemetryDataStore;
