//! Durable local storage for telemetry sessions.
//!
//! Storage-directory fallback chain, `.tmp`-then-rename atomic write
//! algorithm, a 60-second auto-flush cadence, and age-based cleanup. A
//! corrupted file is archived (renamed to `.corrupted_<timestamp>`) rather
//! than merely logged and discarded, so a bad read is diagnosable after
//! the fact. Every blocking filesystem call runs on
//! `tokio::task::spawn_blocking` rather than the caller's own thread,
//! since the advisory lock it takes must never stall an async worker.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Local;
use chrono::Utc;
use codex_protocol::telemetry::ExecutionStatus;
use codex_protocol::telemetry::TelemetrySession;

use crate::error::TelemetryErrorClassifier;
use crate::error::handle_storage_error;
use crate::remote::NoopRemoteTelemetrySink;
use crate::remote::RemoteTelemetrySink;

const AUTO_FLUSH_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_MAX_FILE_AGE_DAYS: u32 = 30;

#[derive(Debug, Clone)]
pub struct FileStat {
    pub name: String,
    pub mtime: chrono::DateTime<Utc>,
}

/// Diagnostic snapshot returned by [`TelemetryDataStore::get_storage_stats`].
/// Kept distinct from [`codex_protocol::error_classifier::ErrorSummary`]
/// rather than unified into one "stats" type, since the two describe
/// unrelated subsystems (storage occupancy vs. error counters) that only
/// happen to both be diagnostic.
#[derive(Debug, Clone)]
pub struct StorageStats {
    pub storage_dir: PathBuf,
    pub has_current_session: bool,
    pub disk_files: usize,
    pub total_disk_size_mb: f64,
    pub oldest_file: Option<FileStat>,
    pub newest_file: Option<FileStat>,
}

pub struct TelemetryDataStore {
    storage_dir: Mutex<PathBuf>,
    max_file_age_days: u32,
    current_session: Mutex<Option<TelemetrySession>>,
    auto_flush_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    shutdown_requested: AtomicBool,
    errors: Arc<TelemetryErrorClassifier>,
    remote_sink: Arc<dyn RemoteTelemetrySink>,
}

fn app_name() -> String {
    std::env::var("TELEMETRY_APP_NAME").unwrap_or_else(|_| "codex".to_string())
}

fn default_storage_dir() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    let base = home.join(".cache").join("ept").join("sop_agents");
    base.join(app_name())
}

fn create_dir_restricted(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

fn resolve_storage_dir(explicit: Option<PathBuf>, errors: &TelemetryErrorClassifier) -> PathBuf {
    let candidate = explicit.unwrap_or_else(default_storage_dir);
    if let Err(err) = create_dir_restricted(&candidate) {
        handle_storage_error(errors, "directory_creation", err.to_string());

        let fallback = std::env::temp_dir().join("ept_telemetry");
        match create_dir_restricted(&fallback) {
            Ok(()) => {
                tracing::warn!(path = %fallback.display(), "using fallback storage directory");
                return fallback;
            }
            Err(fallback_err) => handle_storage_error(errors, "fallback_directory", fallback_err.to_string()),
        }

        return match tempfile::Builder::new().prefix("ept_telemetry_").tempdir() {
            Ok(dir) => dir.into_path(),
            Err(_) => std::env::temp_dir(),
        };
    }
    candidate
}

fn session_file_path(storage_dir: &Path, session_id: &str) -> PathBuf {
    let date_prefix = Local::now().format("%Y_%m_%d");
    storage_dir.join(format!("{date_prefix}_{session_id}.json"))
}

fn archive_corrupted_file(path: &Path) {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let mut corrupted = path.as_os_str().to_os_string();
    corrupted.push(format!(".corrupted_{timestamp}"));
    if let Err(err) = std::fs::rename(path, PathBuf::from(corrupted)) {
        tracing::error!(error = %err, path = %path.display(), "failed to archive corrupted telemetry file");
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &std::fs::File) -> std::io::Result<()> {
    nix::fcntl::flock(file, nix::fcntl::FlockArg::LockExclusive)
        .map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))
}

#[cfg(unix)]
fn lock_shared(file: &std::fs::File) -> std::io::Result<()> {
    nix::fcntl::flock(file, nix::fcntl::FlockArg::LockShared)
        .map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &std::fs::File) -> std::io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn lock_shared(_file: &std::fs::File) -> std::io::Result<()> {
    Ok(())
}

fn write_session_file(path: &Path, session: &TelemetrySession, errors: &TelemetryErrorClassifier) -> bool {
    let temp_path = path.with_extension("tmp");

    let json = match serde_json::to_vec(session) {
        Ok(bytes) => bytes,
        Err(err) => {
            handle_storage_error(errors, "serialize", err.to_string());
            return false;
        }
    };

    let result = (|| -> std::io::Result<()> {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        lock_exclusive(&file)?;
        file.write_all(&json)?;
        file.sync_all()
    })();

    if let Err(err) = result {
        let _ = std::fs::remove_file(&temp_path);
        handle_storage_error(errors, "write", err.to_string());
        return false;
    }

    if let Err(err) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        handle_storage_error(errors, "rename", err.to_string());
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(err) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
            handle_storage_error(errors, "chmod", err.to_string());
        }
    }

    true
}

fn read_session_file(path: &Path, errors: &TelemetryErrorClassifier) -> Option<TelemetrySession> {
    if !path.exists() {
        return None;
    }

    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) => {
            handle_storage_error(errors, "read", err.to_string());
            return None;
        }
    };
    if let Err(err) = lock_shared(&file) {
        handle_storage_error(errors, "read_lock", err.to_string());
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            handle_storage_error(errors, "read", err.to_string());
            return None;
        }
    };

    match serde_json::from_str::<TelemetrySession>(&content) {
        Ok(session) => Some(session),
        Err(err) => {
            handle_storage_error(errors, "parse", err.to_string());
            archive_corrupted_file(path);
            None
        }
    }
}

fn cleanup_old_files_blocking(dir: &Path, max_age_days: u32) -> usize {
    let cutoff = std::time::SystemTime::now()
        .checked_sub(Duration::from_secs(u64::from(max_age_days) * 86_400))
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH);

    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };

    let mut cleaned = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let Ok(metadata) = entry.metadata() else { continue };
        let Ok(modified) = metadata.modified() else { continue };
        if modified < cutoff && std::fs::remove_file(&path).is_ok() {
            cleaned += 1;
        }
    }
    cleaned
}

fn scan_storage_dir(dir: &Path) -> (usize, u64, Option<FileStat>, Option<FileStat>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return (0, 0, None, None);
    };

    let mut files: Vec<(String, u64, std::time::SystemTime)> = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let Ok(metadata) = entry.metadata() else { continue };
        let Ok(modified) = metadata.modified() else { continue };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        files.push((name, metadata.len(), modified));
    }

    let total_size: u64 = files.iter().map(|(_, size, _)| size).sum();
    let oldest = files
        .iter()
        .min_by_key(|(_, _, mtime)| *mtime)
        .map(|(name, _, mtime)| to_file_stat(name, *mtime));
    let newest = files
        .iter()
        .max_by_key(|(_, _, mtime)| *mtime)
        .map(|(name, _, mtime)| to_file_stat(name, *mtime));

    (files.len(), total_size, oldest, newest)
}

fn to_file_stat(name: &str, mtime: std::time::SystemTime) -> FileStat {
    FileStat {
        name: name.to_string(),
        mtime: mtime.into(),
    }
}

impl TelemetryDataStore {
    pub fn new(
        storage_dir: Option<PathBuf>,
        max_file_age_days: Option<u32>,
        errors: Arc<TelemetryErrorClassifier>,
    ) -> Arc<Self> {
        Self::with_remote_sink(
            storage_dir,
            max_file_age_days,
            errors,
            Arc::new(NoopRemoteTelemetrySink),
        )
    }

    pub fn with_remote_sink(
        storage_dir: Option<PathBuf>,
        max_file_age_days: Option<u32>,
        errors: Arc<TelemetryErrorClassifier>,
        remote_sink: Arc<dyn RemoteTelemetrySink>,
    ) -> Arc<Self> {
        let resolved = resolve_storage_dir(storage_dir, &errors);
        tracing::debug!(path = %resolved.display(), "telemetry data store initialized");

        let store = Arc::new(Self {
            storage_dir: Mutex::new(resolved),
            max_file_age_days: max_file_age_days.unwrap_or(DEFAULT_MAX_FILE_AGE_DAYS),
            current_session: Mutex::new(None),
            auto_flush_task: Mutex::new(None),
            shutdown_requested: AtomicBool::new(false),
            errors,
            remote_sink,
        });
        store.clone().start_auto_flush();
        store
    }

    fn storage_dir(&self) -> PathBuf {
        self.storage_dir
            .lock()
            .expect("telemetry storage dir lock poisoned")
            .clone()
    }

    pub fn storage_path(&self) -> PathBuf {
        self.storage_dir()
    }

    /// Spawn the 60-second auto-flush loop onto the currently entered Tokio
    /// runtime. A missing runtime (e.g. constructing a store outside any
    /// `#[tokio::main]`/`#[tokio::test]` context) disables auto-flush rather
    /// than panicking.
    fn start_auto_flush(self: Arc<Self>) {
        if self.shutdown_requested.load(Ordering::SeqCst) {
            return;
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::debug!("no tokio runtime active; auto-flush disabled");
                return;
            }
        };

        let store = self.clone();
        let task = handle.spawn(async move {
            let mut interval = tokio::time::interval(AUTO_FLUSH_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                if store.shutdown_requested.load(Ordering::SeqCst) {
                    break;
                }
                if !store.flush().await {
                    tracing::error!("auto-flush failed; continuing on schedule");
                }
            }
        });
        *self
            .auto_flush_task
            .lock()
            .expect("telemetry auto-flush task lock poisoned") = Some(task);
    }

    fn stop_auto_flush(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        if let Some(task) = self
            .auto_flush_task
            .lock()
            .expect("telemetry auto-flush task lock poisoned")
            .take()
        {
            task.abort();
        }
    }

    /// Update the in-memory current session. Does not touch disk.
    pub fn store(&self, session: TelemetrySession) {
        *self
            .current_session
            .lock()
            .expect("telemetry current-session lock poisoned") = Some(session);
    }

    /// In-memory first, else disk.
    pub async fn get(&self, session_id: &str) -> Option<TelemetrySession> {
        {
            let guard = self
                .current_session
                .lock()
                .expect("telemetry current-session lock poisoned");
            if let Some(session) = guard.as_ref() {
                if session.session_id == session_id {
                    return Some(session.clone());
                }
            }
        }

        let path = session_file_path(&self.storage_dir(), session_id);
        let errors = self.errors.clone();
        tokio::task::spawn_blocking(move || read_session_file(&path, &errors))
            .await
            .unwrap_or(None)
    }

    /// Write the current session if any; forward it to the remote sink if
    /// it has been finalized. Returns `false` only on a real I/O failure —
    /// "nothing to flush" is success.
    pub async fn flush(&self) -> bool {
        let session = {
            let guard = self
                .current_session
                .lock()
                .expect("telemetry current-session lock poisoned");
            guard.clone()
        };
        let Some(session) = session else { return true };

        let path = session_file_path(&self.storage_dir(), &session.session_id);
        let errors = self.errors.clone();
        let to_write = session.clone();
        let wrote = tokio::task::spawn_blocking(move || write_session_file(&path, &to_write, &errors))
            .await
            .unwrap_or(false);

        if wrote && session.end_time.is_some() {
            let sink = self.remote_sink.clone();
            let event_name = format!("{}:agent-stats", app_name());
            let session_id = session.session_id.clone();
            tokio::spawn(async move {
                if sink.send_session(&session_id, &event_name, &session, "sop_agents").await {
                    tracing::info!(session_id, "forwarded finalized session to remote sink");
                } else {
                    tracing::debug!(session_id, "remote sink did not accept session");
                }
            });
        }

        wrote
    }

    /// Promote any in-progress tasks in the current session to
    /// `interrupted`, then flush. Used by the shutdown/interrupt path.
    pub async fn force_flush_all(&self) -> bool {
        {
            let mut guard = self
                .current_session
                .lock()
                .expect("telemetry current-session lock poisoned");
            if let Some(session) = guard.as_mut() {
                for task in &mut session.tasks {
                    if task.status == ExecutionStatus::InProgress {
                        task.status = ExecutionStatus::Interrupted;
                        task.end_time = Some(Utc::now());
                        task.error_message = Some("Session interrupted".to_string());
                    }
                }
            }
        }
        self.flush().await
    }

    pub async fn cleanup_old_files(&self, max_age_days: Option<u32>) -> usize {
        let max_age = max_age_days.unwrap_or(self.max_file_age_days);
        let dir = self.storage_dir();
        tokio::task::spawn_blocking(move || cleanup_old_files_blocking(&dir, max_age))
            .await
            .unwrap_or(0)
    }

    pub async fn get_storage_stats(&self) -> StorageStats {
        let dir = self.storage_dir();
        let has_current_session = self
            .current_session
            .lock()
            .expect("telemetry current-session lock poisoned")
            .is_some();

        let scan_dir = dir.clone();
        let (disk_files, total_bytes, oldest_file, newest_file) =
            tokio::task::spawn_blocking(move || scan_storage_dir(&scan_dir))
                .await
                .unwrap_or((0, 0, None, None));

        StorageStats {
            storage_dir: dir,
            has_current_session,
            disk_files,
            total_disk_size_mb: total_bytes as f64 / (1024.0 * 1024.0),
            oldest_file,
            newest_file,
        }
    }

    /// Idempotent: stop the auto-flush loop, flush once more, clean up old
    /// files. Safe to call more than once.
    pub async fn shutdown(&self) {
        tracing::info!("shutting down telemetry data store");
        self.stop_auto_flush();
        if !self.flush().await {
            tracing::error!("failed to flush telemetry data during shutdown");
        }
        self.cleanup_old_files(None).await;
        tracing::info!("telemetry data store shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codex_protocol::telemetry::Environment;
    use codex_protocol::telemetry::TaskExecution;

    fn errors() -> Arc<TelemetryErrorClassifier> {
        Arc::new(TelemetryErrorClassifier::default())
    }

    #[tokio::test]
    async fn write_then_read_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = TelemetryDataStore::new(Some(dir.path().to_path_buf()), Some(30), errors());

        let mut session = TelemetrySession::new("s1", Utc::now(), Environment::default());
        session.add_task(TaskExecution::new("t1", "desc", Utc::now(), None));
        store.store(session.clone());

        assert!(store.flush().await);

        let fetched = store.get("s1").await.expect("session should be found");
        assert_eq!(fetched.session_id, "s1");
        assert_eq!(fetched.tasks.len(), 1);
    }

    #[tokio::test]
    async fn get_falls_back_to_disk_when_not_the_in_memory_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = TelemetryDataStore::new(Some(dir.path().to_path_buf()), Some(30), errors());

        let session = TelemetrySession::new("on-disk", Utc::now(), Environment::default());
        store.store(session);
        store.flush().await;

        store.store(TelemetrySession::new(
            "different",
            Utc::now(),
            Environment::default(),
        ));

        let fetched = store.get("on-disk").await;
        assert!(fetched.is_some());
    }

    #[tokio::test]
    async fn corrupted_file_is_archived_and_read_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = TelemetryDataStore::new(Some(dir.path().to_path_buf()), Some(30), errors());

        let path = session_file_path(dir.path(), "broken");
        std::fs::write(&path, b"not json").unwrap();

        let result = store.get("broken").await;
        assert!(result.is_none());
        assert!(!path.exists());

        let mut archived = std::fs::read_dir(dir.path()).unwrap();
        assert!(archived.any(|entry| entry
            .unwrap()
            .file_name()
            .to_string_lossy()
            .contains(".corrupted_")));
    }

    #[tokio::test]
    async fn force_flush_all_marks_in_progress_tasks_interrupted() {
        let dir = tempfile::tempdir().unwrap();
        let store = TelemetryDataStore::new(Some(dir.path().to_path_buf()), Some(30), errors());

        let mut session = TelemetrySession::new("s1", Utc::now(), Environment::default());
        session.tasks.push(TaskExecution::new("t1", "desc", Utc::now(), None));
        store.store(session);

        assert!(store.force_flush_all().await);
        let fetched = store.get("s1").await.unwrap();
        assert_eq!(fetched.tasks[0].status, ExecutionStatus::Interrupted);
    }

    #[tokio::test]
    async fn cleanup_old_files_removes_stale_json_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = TelemetryDataStore::new(Some(dir.path().to_path_buf()), Some(30), errors());

        let stale = dir.path().join("2000_01_01_old.json");
        std::fs::write(&stale, "{}").unwrap();
        let old_time = std::time::SystemTime::now() - Duration::from_secs(60 * 86_400);
        let file = std::fs::File::open(&stale).unwrap();
        file.set_modified(old_time).unwrap();

        let cleaned = store.cleanup_old_files(Some(30)).await;
        assert_eq!(cleaned, 1);
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn storage_stats_reports_disk_file_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = TelemetryDataStore::new(Some(dir.path().to_path_buf()), Some(30), errors());

        store.store(TelemetrySession::new("s1", Utc::now(), Environment::default()));
        store.flush().await;

        let stats = store.get_storage_stats().await;
        assert_eq!(stats.disk_files, 1);
        assert!(stats.has_current_session);
    }
}
