//! The telemetry pipeline's single authoritative entry point: a
//! process-wide singleton (an `once_cell::sync::Lazy<RwLock<T>>`, the same
//! pattern `codex_hooks::manager` uses) that owns the data store and
//! current collector, and ensures data survives every exit path.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use codex_protocol::telemetry::Environment;
use codex_protocol::telemetry::TelemetrySession;
use once_cell::sync::Lazy;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::RwLock;

use crate::collector::TelemetryCollector;
use crate::error::TelemetryErrorClassifier;
use crate::remote::NoopRemoteTelemetrySink;
use crate::remote::RemoteTelemetrySink;
use crate::store::StorageStats;
use crate::store::TelemetryDataStore;

/// Construction-time configuration for the telemetry manager: whether
/// telemetry is enabled at all, where sessions are persisted, retention
/// policy, and an optional remote sink.
#[derive(Clone, Default)]
pub struct TelemetryConfig {
    pub enabled: Option<bool>,
    pub storage_dir: Option<PathBuf>,
    pub max_file_age_days: Option<u32>,
    pub auto_cleanup: Option<bool>,
    pub remote_sink: Option<Arc<dyn RemoteTelemetrySink>>,
}

impl std::fmt::Debug for TelemetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryConfig")
            .field("enabled", &self.enabled)
            .field("storage_dir", &self.storage_dir)
            .field("max_file_age_days", &self.max_file_age_days)
            .field("auto_cleanup", &self.auto_cleanup)
            .field("remote_sink", &self.remote_sink.is_some())
            .finish()
    }
}

struct ManagerState {
    data_store: Option<Arc<TelemetryDataStore>>,
    collector: Option<Arc<TelemetryCollector>>,
    session_id: Option<String>,
}

pub struct TelemetryManager {
    config: std::sync::Mutex<TelemetryConfig>,
    enabled: AtomicBool,
    state: AsyncMutex<ManagerState>,
    errors: Arc<TelemetryErrorClassifier>,
    shutdown_guard: AsyncMutex<bool>,
}

impl TelemetryManager {
    pub fn new() -> Self {
        Self {
            config: std::sync::Mutex::new(TelemetryConfig::default()),
            enabled: AtomicBool::new(true),
            state: AsyncMutex::new(ManagerState {
                data_store: None,
                collector: None,
                session_id: None,
            }),
            errors: Arc::new(TelemetryErrorClassifier::default()),
            shutdown_guard: AsyncMutex::new(false),
        }
    }

    fn config(&self) -> TelemetryConfig {
        self.config.lock().expect("telemetry config lock poisoned").clone()
    }

    /// Idempotent: merges `config` over existing configuration, lazily
    /// builds the data store, assigns a session id, and performs an initial
    /// cleanup pass.
    pub async fn initialize(&self, config: Option<TelemetryConfig>) {
        if let Some(incoming) = config {
            let mut guard = self.config.lock().expect("telemetry config lock poisoned");
            if let Some(enabled) = incoming.enabled {
                guard.enabled = Some(enabled);
                self.enabled.store(enabled, Ordering::SeqCst);
            }
            if incoming.storage_dir.is_some() {
                guard.storage_dir = incoming.storage_dir;
            }
            if incoming.max_file_age_days.is_some() {
                guard.max_file_age_days = incoming.max_file_age_days;
            }
            if incoming.auto_cleanup.is_some() {
                guard.auto_cleanup = incoming.auto_cleanup;
            }
            if incoming.remote_sink.is_some() {
                guard.remote_sink = incoming.remote_sink;
            }
        }

        if !self.is_enabled() {
            tracing::info!("telemetry is disabled by configuration");
            return;
        }

        let mut state = self.state.lock().await;
        if state.data_store.is_none() {
            let config = self.config();
            let sink = config
                .remote_sink
                .clone()
                .unwrap_or_else(|| Arc::new(NoopRemoteTelemetrySink));
            let store = TelemetryDataStore::with_remote_sink(
                config.storage_dir,
                config.max_file_age_days,
                self.errors.clone(),
                sink,
            );
            state.data_store = Some(store);
            tracing::debug!("telemetry data store initialized");
        }

        if state.session_id.is_none() {
            let session_id = uuid::Uuid::new_v4().to_string();
            tracing::info!(session_id = %session_id, "telemetry session started");
            state.session_id = Some(session_id);
        }

        if self.config().auto_cleanup.unwrap_or(true) {
            if let Some(store) = state.data_store.clone() {
                let cleaned = store.cleanup_old_files(None).await;
                if cleaned > 0 {
                    tracing::info!(cleaned, "cleaned up old telemetry files");
                }
            }
        }

        tracing::info!("telemetry manager initialized");
    }

    /// Lazily create the collector for the current session. Returns `None`
    /// when telemetry is disabled — callers treat a missing collector as
    /// "do nothing", never as an error.
    pub async fn get_collector(&self) -> Option<Arc<TelemetryCollector>> {
        {
            let state = self.state.lock().await;
            if state.data_store.is_none() {
                drop(state);
                self.initialize(None).await;
            }
        }

        if !self.is_enabled() {
            return None;
        }

        let mut state = self.state.lock().await;
        if state.collector.is_none() {
            let session_id = state
                .session_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            state.collector = Some(Arc::new(TelemetryCollector::new(session_id, Environment::capture())));
        }
        state.collector.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub async fn enable_telemetry(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        self.config.lock().expect("telemetry config lock poisoned").enabled = Some(true);
        if self.state.lock().await.data_store.is_none() {
            self.initialize(None).await;
        }
        tracing::info!("telemetry enabled");
    }

    pub fn disable_telemetry(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.config.lock().expect("telemetry config lock poisoned").enabled = Some(false);
        tracing::info!("telemetry disabled");
    }

    /// Forward the current collector's session data to the data store and
    /// flush, but only when there is actual task data — matches the
    /// reference's "only flush if there's actual data" guard.
    pub async fn flush_data(&self) {
        if !self.is_enabled() {
            return;
        }
        let state = self.state.lock().await;
        let (Some(store), Some(collector)) = (state.data_store.clone(), state.collector.clone()) else {
            return;
        };
        drop(state);

        let session = collector.get_session_data();
        if session.tasks.is_empty() {
            return;
        }
        store.store(session.clone());
        store.flush().await;
        tracing::debug!(session_id = %session.session_id, "flushed telemetry session");
    }

    /// Mark any active tasks interrupted and write immediately, even for an
    /// incomplete session. Used by the shutdown/interrupt path.
    pub async fn force_flush_all_data(&self) {
        if !self.is_enabled() {
            return;
        }
        tracing::info!("force flushing all telemetry data");

        let state = self.state.lock().await;
        let store = state.data_store.clone();
        let collector = state.collector.clone();
        drop(state);

        if let Some(collector) = collector {
            let session = collector.force_flush();
            if let Some(store) = &store {
                store.store(session);
            }
        }
        if let Some(store) = store {
            store.force_flush_all().await;
        }
    }

    /// `collector.finalize_session()` then store + flush.
    pub async fn finalize_current_session(&self) -> Option<TelemetrySession> {
        let state = self.state.lock().await;
        let collector = state.collector.clone()?;
        let store = state.data_store.clone();
        let session_id = state.session_id.clone();
        drop(state);

        let session = collector.finalize_session();
        if let Some(store) = store {
            store.store(session.clone());
            store.flush().await;
        }
        tracing::info!(session_id = ?session_id, "finalized telemetry session");
        Some(session)
    }

    /// Finalize the current session, then start a fresh one: a new session
    /// id, and a dropped collector so the next `get_collector()` builds a
    /// new one against it.
    pub async fn start_new_session(&self) -> String {
        {
            let has_collector = self.state.lock().await.collector.is_some();
            if has_collector {
                self.finalize_current_session().await;
            }
        }

        let mut state = self.state.lock().await;
        let session_id = uuid::Uuid::new_v4().to_string();
        state.session_id = Some(session_id.clone());
        state.collector = None;
        tracing::info!(session_id = %session_id, "started new telemetry session");
        session_id
    }

    pub async fn get_session_data(&self) -> Option<TelemetrySession> {
        if !self.is_enabled() {
            return None;
        }
        let state = self.state.lock().await;
        if let Some(collector) = &state.collector {
            return Some(collector.get_session_data());
        }
        let (store, session_id) = (state.data_store.clone(), state.session_id.clone()?);
        drop(state);
        store?.get(&session_id).await
    }

    pub async fn has_unsaved_data(&self) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let state = self.state.lock().await;
        match &state.collector {
            Some(collector) => !collector.get_session_data().tasks.is_empty(),
            None => false,
        }
    }

    pub async fn get_storage_stats(&self) -> Option<StorageStats> {
        let store = self.state.lock().await.data_store.clone()?;
        Some(store.get_storage_stats().await)
    }

    pub async fn cleanup_old_data(&self, max_age_days: Option<u32>) -> usize {
        let Some(store) = self.state.lock().await.data_store.clone() else {
            return 0;
        };
        store.cleanup_old_files(max_age_days).await
    }

    /// Guarded by a boolean + mutex so concurrent or repeated calls are
    /// safe: the first call force-flushes, finalizes normally, and shuts
    /// down the store; later calls are no-ops.
    pub async fn shutdown(&self) {
        let mut already_shut_down = self.shutdown_guard.lock().await;
        if *already_shut_down {
            return;
        }
        *already_shut_down = true;
        drop(already_shut_down);

        tracing::info!("shutting down telemetry manager");
        self.force_flush_all_data().await;
        self.finalize_current_session().await;

        if let Some(store) = self.state.lock().await.data_store.clone() {
            store.shutdown().await;
        }
        tracing::info!("telemetry manager shutdown complete");
    }
}

impl Default for TelemetryManager {
    fn default() -> Self {
        Self::new()
    }
}

static TELEMETRY_MANAGER: Lazy<RwLock<Arc<TelemetryManager>>> =
    Lazy::new(|| RwLock::new(Arc::new(TelemetryManager::new())));

pub async fn manager() -> Arc<TelemetryManager> {
    TELEMETRY_MANAGER.read().await.clone()
}

pub async fn initialize(config: Option<TelemetryConfig>) {
    manager().await.initialize(config).await;
}

pub async fn get_collector() -> Option<Arc<TelemetryCollector>> {
    manager().await.get_collector().await
}

pub async fn is_enabled() -> bool {
    manager().await.is_enabled()
}

pub async fn shutdown() {
    manager().await.shutdown().await;
}

/// Install signal handlers that log receipt, run `shutdown()`, and then
/// exit the process. `tokio`'s signal API has no portable "restore default
/// disposition and re-raise" primitive, so this calls `std::process::exit`
/// once `shutdown()` completes instead — functionally equivalent from an
/// operator's perspective, since the process still terminates promptly on
/// the same signal. Installation failures are logged and non-fatal, since
/// signal handling is not legal from every execution context.
#[cfg(unix)]
pub fn install_signal_handlers() {
    use tokio::signal::unix::SignalKind;
    use tokio::signal::unix::signal;

    let kinds = [
        ("SIGTERM", SignalKind::terminate()),
        ("SIGHUP", SignalKind::hangup()),
    ];

    for (name, kind) in kinds {
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    tracing::info!(signal = name, "received signal, initiating graceful shutdown");
                    shutdown().await;
                    std::process::exit(1);
                });
            }
            Err(err) => tracing::debug!(signal = name, error = %err, "could not register signal handler"),
        }
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!(signal = "SIGINT", "received signal, initiating graceful shutdown");
            shutdown().await;
            std::process::exit(1);
        }
    });
}

#[cfg(not(unix))]
pub fn install_signal_handlers() {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received ctrl-c, initiating graceful shutdown");
            shutdown().await;
            std::process::exit(1);
        }
    });
}

/// Reset the global manager to a fresh instance. Tests only.
pub async fn reset_instance() {
    manager().await.shutdown().await;
    *TELEMETRY_MANAGER.write().await = Arc::new(TelemetryManager::new());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[tokio::test]
    async fn get_collector_returns_none_when_disabled() {
        let manager = TelemetryManager::new();
        manager.disable_telemetry();
        assert!(manager.get_collector().await.is_none());
    }

    #[tokio::test]
    async fn initialize_with_storage_dir_creates_data_store() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TelemetryManager::new();
        manager
            .initialize(Some(TelemetryConfig {
                storage_dir: Some(dir.path().to_path_buf()),
                ..Default::default()
            }))
            .await;

        let collector = manager.get_collector().await.expect("collector");
        collector.start_task("t1", "desc", None);
        collector.end_task("t1", codex_protocol::telemetry::ExecutionStatus::Completed, None, None);

        assert!(manager.has_unsaved_data().await);
        manager.flush_data().await;

        let stats = manager.get_storage_stats().await.unwrap();
        assert_eq!(stats.disk_files, 1);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TelemetryManager::new();
        manager
            .initialize(Some(TelemetryConfig {
                storage_dir: Some(dir.path().to_path_buf()),
                ..Default::default()
            }))
            .await;
        manager.shutdown().await;
        manager.shutdown().await;
    }

    #[tokio::test]
    #[serial]
    async fn global_singleton_initializes_and_resets() {
        reset_instance().await;
        let dir = tempfile::tempdir().unwrap();
        initialize(Some(TelemetryConfig {
            storage_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        }))
        .await;
        assert!(is_enabled().await);
        reset_instance().await;
    }
}
