// Sync orchestration: mediates between UI intent (test connection, upload,
// download, restore) and the provider sync manager, enforcing one state
// machine and error-reporting contract across all providers. Nothing in this
// layer is fatal; every failure is recoverable by an explicit user retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;

use crate::storage::Storage;

use super::remote::build_remote_store;
use super::{
    BackupRecord, ConnectionStatus, RemoteMetadata, RemoteStore, SyncConfig, SyncDirection, SyncError, SyncManager,
    SyncProgress, SyncProviderKind, SyncResult,
};

/// Delay before the frontend is asked to reload after new data arrived.
/// Local in-memory caches are not incrementally reconciled; a reload is the
/// correctness mechanism for downloaded data.
pub const RELOAD_DELAY: Duration = Duration::from_secs(2);

/// Effect hooks supplied by the Tauri layer (event emission) or by tests
/// (call recording).
pub struct SyncEvents {
    pub on_progress: Box<dyn Fn(SyncProviderKind, SyncProgress) + Send + Sync>,
    pub on_status_changed: Box<dyn Fn(SyncProviderKind, ConnectionStatus) + Send + Sync>,
    pub schedule_reload: Box<dyn Fn(Duration) + Send + Sync>,
}

impl Default for SyncEvents {
    fn default() -> Self {
        Self {
            on_progress: Box::new(|_, _| {}),
            on_status_changed: Box::new(|_, _| {}),
            schedule_reload: Box::new(|_| {}),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncReportKind {
    Success,
    Info,
    Warning,
    Error,
    Conflict,
}

/// What the settings UI shows after a sync attempt: toast kind + message,
/// transfer counts, whether a reload is coming, and the log drawer content.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub kind: SyncReportKind,
    pub message: String,
    pub uploaded: u32,
    pub downloaded: u32,
    pub reload_scheduled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub debug_logs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_metadata: Option<RemoteMetadata>,
}

impl SyncReport {
    fn new(kind: SyncReportKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            uploaded: 0,
            downloaded: 0,
            reload_scheduled: false,
            debug_logs: Vec::new(),
            remote_metadata: None,
        }
    }
}

/// Live view for the status dots and the log drawer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusSnapshot {
    pub status: ConnectionStatus,
    pub is_syncing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<SyncProgress>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub debug_logs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

type StoreFactory = Box<dyn Fn(&SyncConfig) -> Result<Box<dyn RemoteStore>, SyncError> + Send + Sync>;

struct UiState {
    status: ConnectionStatus,
    progress: Option<SyncProgress>,
    debug_logs: Vec<String>,
    last_error: Option<String>,
}

pub struct SyncOrchestrator {
    kind: SyncProviderKind,
    storage: Storage,
    events: SyncEvents,
    store_factory: StoreFactory,
    /// Retained across syncs so a finished or failed sync never drops the
    /// authenticated session.
    manager: AsyncMutex<Option<SyncManager>>,
    /// Reentrancy guard; concurrent syncs are rejected, never queued.
    in_flight: AtomicBool,
    state: std::sync::Mutex<UiState>,
    local_write_guard: Arc<AtomicBool>,
}

impl SyncOrchestrator {
    pub fn new(
        kind: SyncProviderKind,
        storage: Storage,
        events: SyncEvents,
        local_write_guard: Arc<AtomicBool>,
    ) -> Self {
        Self::with_factory(kind, storage, events, local_write_guard, Box::new(build_remote_store))
    }

    fn with_factory(
        kind: SyncProviderKind,
        storage: Storage,
        events: SyncEvents,
        local_write_guard: Arc<AtomicBool>,
        store_factory: StoreFactory,
    ) -> Self {
        // Lazy connection: a previously successful config renders as
        // connected without any network contact until the user syncs.
        let initial = match storage.load_sync_config(kind) {
            Ok(Some(config)) if config.last_connection_success() => ConnectionStatus::Connected,
            _ => ConnectionStatus::Disconnected,
        };
        Self {
            kind,
            storage,
            events,
            store_factory,
            manager: AsyncMutex::new(None),
            in_flight: AtomicBool::new(false),
            state: std::sync::Mutex::new(UiState {
                status: initial,
                progress: None,
                debug_logs: Vec::new(),
                last_error: None,
            }),
            local_write_guard,
        }
    }

    pub fn status(&self) -> SyncStatusSnapshot {
        let state = self.state.lock().unwrap();
        SyncStatusSnapshot {
            status: state.status,
            is_syncing: self.in_flight.load(Ordering::SeqCst),
            progress: state.progress.clone(),
            debug_logs: state.debug_logs.clone(),
            last_error: state.last_error.clone(),
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        let changed = {
            let mut state = self.state.lock().unwrap();
            let changed = state.status != status;
            state.status = status;
            changed
        };
        if changed {
            (self.events.on_status_changed)(self.kind, status);
        }
    }

    /// Reuses a live initialized manager without network I/O; otherwise
    /// builds one from the stored config and probes the connection once.
    async fn ensure_connected(&self) -> Result<(), SyncError> {
        let mut guard = self.manager.lock().await;
        if guard.as_ref().map(SyncManager::is_initialized).unwrap_or(false) {
            return Ok(());
        }

        let mut config = match self.storage.load_sync_config(self.kind).map_err(SyncError::Storage)? {
            Some(config) => config,
            None => {
                self.set_status(ConnectionStatus::Error);
                return Err(SyncError::ConfigIncomplete("no configuration saved".to_string()));
            }
        };
        if let Err(e) = config.validate() {
            self.set_status(ConnectionStatus::Error);
            return Err(e);
        }

        self.set_status(ConnectionStatus::Connecting);
        let store = match (self.store_factory)(&config) {
            Ok(store) => store,
            Err(e) => {
                self.set_status(ConnectionStatus::Error);
                return Err(e);
            }
        };
        let mut manager = SyncManager::new(
            self.kind,
            store,
            self.storage.clone(),
            config.encryption_passphrase().map(str::to_string),
            self.local_write_guard.clone(),
        );

        match manager.initialize().await {
            Ok(true) => {
                config.set_last_connection_success(true);
                if let Err(e) = self.storage.save_sync_config(&config) {
                    log::warn!("{}: could not persist connection success: {}", self.kind, e);
                }
                *guard = Some(manager);
                self.set_status(ConnectionStatus::Connected);
                log::info!("{}: connected", self.kind);
                Ok(())
            }
            Ok(false) => {
                self.set_status(ConnectionStatus::Error);
                Err(SyncError::ConnectionFailed("server refused the connection".to_string()))
            }
            Err(e) => {
                self.set_status(ConnectionStatus::Error);
                Err(SyncError::ConnectionFailed(e.to_string()))
            }
        }
    }

    /// Explicit "test connection" button: always performs a fresh probe.
    pub async fn test_connection(&self) -> Result<bool, SyncError> {
        if self.in_flight.load(Ordering::SeqCst) {
            return Err(SyncError::AlreadyInProgress);
        }
        self.begin_attempt();
        {
            let mut guard = self.manager.lock().await;
            if let Some(manager) = guard.as_mut() {
                manager.disconnect();
            }
        }
        match self.ensure_connected().await {
            Ok(()) => Ok(true),
            Err(e) => {
                self.record_connection_failure(&e);
                Err(e)
            }
        }
    }

    pub async fn sync(&self, direction: SyncDirection) -> SyncReport {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Rejected, not queued; the rejected call leaves the in-flight
            // attempt and its diagnostics untouched.
            return SyncReport::new(SyncReportKind::Error, SyncError::AlreadyInProgress.to_string());
        }
        let report = self.run_sync(direction).await;
        self.state.lock().unwrap().progress = None;
        self.in_flight.store(false, Ordering::SeqCst);
        report
    }

    pub async fn restore_backup(&self, key: &str) -> SyncReport {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return SyncReport::new(SyncReportKind::Error, SyncError::AlreadyInProgress.to_string());
        }
        let report = self.run_restore(key).await;
        self.state.lock().unwrap().progress = None;
        self.in_flight.store(false, Ordering::SeqCst);
        report
    }

    pub async fn list_backups(&self) -> Result<Vec<BackupRecord>, SyncError> {
        self.ensure_connected().await?;
        let guard = self.manager.lock().await;
        match guard.as_ref() {
            Some(manager) => manager.list_backups().await,
            None => Err(SyncError::ConnectionFailed("no active sync manager".to_string())),
        }
    }

    pub async fn disconnect(&self) {
        let mut guard = self.manager.lock().await;
        if let Some(manager) = guard.as_mut() {
            manager.disconnect();
        }
        *guard = None;
        if let Ok(Some(mut config)) = self.storage.load_sync_config(self.kind) {
            config.set_last_connection_success(false);
            if let Err(e) = self.storage.save_sync_config(&config) {
                log::warn!("{}: could not persist disconnect: {}", self.kind, e);
            }
        }
        self.set_status(ConnectionStatus::Disconnected);
    }

    /// Called after the settings form saved a new config: the old manager
    /// handle no longer matches what is on disk.
    pub async fn config_updated(&self) {
        let mut guard = self.manager.lock().await;
        *guard = None;
        let status = match self.storage.load_sync_config(self.kind) {
            Ok(Some(config)) if config.last_connection_success() => ConnectionStatus::Connected,
            _ => ConnectionStatus::Disconnected,
        };
        self.set_status(status);
    }

    async fn run_sync(&self, direction: SyncDirection) -> SyncReport {
        self.begin_attempt();
        if let Err(e) = self.ensure_connected().await {
            return self.connection_failure_report(e);
        }

        let outcome = {
            let guard = self.manager.lock().await;
            match guard.as_ref() {
                Some(manager) => {
                    let on_progress = |p: SyncProgress| {
                        self.state.lock().unwrap().progress = Some(p.clone());
                        (self.events.on_progress)(self.kind, p);
                    };
                    manager.sync(direction, &on_progress).await
                }
                None => Err(SyncError::ConnectionFailed("no active sync manager".to_string())),
            }
        };
        self.interpret(outcome)
    }

    async fn run_restore(&self, key: &str) -> SyncReport {
        self.begin_attempt();
        if let Err(e) = self.ensure_connected().await {
            return self.connection_failure_report(e);
        }

        let outcome = {
            let guard = self.manager.lock().await;
            match guard.as_ref() {
                Some(manager) => {
                    let on_progress = |p: SyncProgress| {
                        self.state.lock().unwrap().progress = Some(p.clone());
                        (self.events.on_progress)(self.kind, p);
                    };
                    manager.restore_backup(key, &on_progress).await
                }
                None => Err(SyncError::ConnectionFailed("no active sync manager".to_string())),
            }
        };
        self.interpret(outcome)
    }

    /// Fresh-start invariant: no diagnostic state survives into a new attempt.
    fn begin_attempt(&self) {
        let mut state = self.state.lock().unwrap();
        state.debug_logs.clear();
        state.progress = None;
        state.last_error = None;
    }

    fn record_connection_failure(&self, error: &SyncError) {
        let mut state = self.state.lock().unwrap();
        for hint in connection_hints(self.kind) {
            state.debug_logs.push((*hint).to_string());
        }
        state.debug_logs.push(error.to_string());
        state.last_error = Some(error.to_string());
    }

    fn connection_failure_report(&self, error: SyncError) -> SyncReport {
        self.record_connection_failure(&error);
        let mut report = SyncReport::new(SyncReportKind::Error, error.to_string());
        report.debug_logs = self.state.lock().unwrap().debug_logs.clone();
        report
    }

    /// Turns a manager outcome into the toast/drawer contract. A sync
    /// failure leaves the connection status untouched: the session is still
    /// good, only this attempt failed.
    fn interpret(&self, outcome: Result<SyncResult, SyncError>) -> SyncReport {
        match outcome {
            Err(error) => {
                let message = error.to_string();
                let logs = {
                    let mut state = self.state.lock().unwrap();
                    state.debug_logs.push(message.clone());
                    state.last_error = Some(message.clone());
                    state.debug_logs.clone()
                };
                log::error!("{} sync failed: {}", self.kind, message);
                let mut report = SyncReport::new(SyncReportKind::Error, message);
                report.debug_logs = logs;
                report
            }
            Ok(result) => {
                let logs = {
                    let mut state = self.state.lock().unwrap();
                    state.debug_logs.extend(result.errors.iter().cloned());
                    state.debug_logs.extend(result.debug_logs.iter().cloned());
                    if !result.success && !result.conflict {
                        state.last_error = result.message.clone();
                    }
                    state.debug_logs.clone()
                };

                let mut report = if result.conflict {
                    let mut r = SyncReport::new(
                        SyncReportKind::Conflict,
                        "both local and remote data changed since the last sync",
                    );
                    r.remote_metadata = result.remote_metadata.clone();
                    r
                } else if !result.success {
                    SyncReport::new(
                        SyncReportKind::Error,
                        result.message.clone().unwrap_or_else(|| "sync failed".to_string()),
                    )
                } else if result.downloaded_count > 0 {
                    (self.events.schedule_reload)(RELOAD_DELAY);
                    let message = if result.uploaded_count > 0 {
                        format!(
                            "uploaded {} and downloaded {} items, reloading soon",
                            result.uploaded_count, result.downloaded_count
                        )
                    } else {
                        format!("downloaded {} items, reloading soon", result.downloaded_count)
                    };
                    let mut r = SyncReport::new(SyncReportKind::Success, message);
                    r.reload_scheduled = true;
                    r
                } else if result.uploaded_count > 0 {
                    SyncReport::new(SyncReportKind::Success, format!("uploaded {} items", result.uploaded_count))
                } else if !result.debug_logs.is_empty() {
                    // Zero transfer with diagnostics is suspicious, not a
                    // clean success.
                    SyncReport::new(
                        SyncReportKind::Warning,
                        "sync finished without transferring any data, see the logs",
                    )
                } else {
                    SyncReport::new(SyncReportKind::Info, "already up to date")
                };
                report.uploaded = result.uploaded_count;
                report.downloaded = result.downloaded_count;
                report.debug_logs = logs;
                if report.remote_metadata.is_none() {
                    report.remote_metadata = result.remote_metadata;
                }
                report
            }
        }
    }
}

/// Static troubleshooting hints shown when a provider cannot connect.
fn connection_hints(kind: SyncProviderKind) -> &'static [&'static str] {
    match kind {
        SyncProviderKind::S3 => &[
            "check the endpoint URL and region",
            "verify the access key, secret key and bucket name",
            "make sure the bucket policy allows the configured credentials",
        ],
        SyncProviderKind::Webdav => &[
            "check the server URL format (e.g. https://host/remote.php/dav/files/user)",
            "verify the username and app password",
            "confirm the sync directory exists or can be created",
        ],
        SyncProviderKind::Supabase => &[
            "check the project URL (https://<project>.supabase.co)",
            "verify the anon key",
            "confirm the SQL setup script was run (sync_data and sync_backups tables)",
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::MockRemoteStore;
    use crate::sync::WebDavConfig;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    struct Harness {
        _dir: tempfile::TempDir,
        storage: Storage,
        orchestrator: Arc<SyncOrchestrator>,
        factory_calls: Arc<AtomicUsize>,
        reloads: Arc<Mutex<Vec<Duration>>>,
        statuses: Arc<Mutex<Vec<ConnectionStatus>>>,
    }

    fn webdav_config() -> SyncConfig {
        SyncConfig::Webdav(WebDavConfig {
            url: "https://dav.example.com".into(),
            username: "user".into(),
            password: "pass".into(),
            ..Default::default()
        })
    }

    fn harness(mock: Arc<MockRemoteStore>, config: Option<SyncConfig>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::with_root(dir.path().join("store"));
        if let Some(config) = &config {
            storage.save_sync_config(config).unwrap();
        }
        let factory_calls = Arc::new(AtomicUsize::new(0));
        let reloads: Arc<Mutex<Vec<Duration>>> = Arc::new(Mutex::new(Vec::new()));
        let statuses: Arc<Mutex<Vec<ConnectionStatus>>> = Arc::new(Mutex::new(Vec::new()));

        let events = SyncEvents {
            on_progress: Box::new(|_, _| {}),
            on_status_changed: {
                let statuses = statuses.clone();
                Box::new(move |_, status| statuses.lock().unwrap().push(status))
            },
            schedule_reload: {
                let reloads = reloads.clone();
                Box::new(move |delay| reloads.lock().unwrap().push(delay))
            },
        };
        let factory: StoreFactory = {
            let mock = mock.clone();
            let factory_calls = factory_calls.clone();
            Box::new(move |_| {
                factory_calls.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(mock.clone()))
            })
        };
        let orchestrator = Arc::new(SyncOrchestrator::with_factory(
            SyncProviderKind::Webdav,
            storage.clone(),
            events,
            Arc::new(AtomicBool::new(false)),
            factory,
        ));
        Harness {
            _dir: dir,
            storage,
            orchestrator,
            factory_calls,
            reloads,
            statuses,
        }
    }

    fn remote_archive_json() -> String {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::with_root(dir.path().join("remote"));
        storage.set_dataset("coffeeBeans", r#"[{"id":"r1"}]"#).unwrap();
        crate::data::build_archive(&storage).unwrap().to_json().unwrap()
    }

    #[tokio::test]
    async fn concurrent_sync_is_rejected_not_queued() {
        let mut mock = MockRemoteStore::default();
        mock.delay = Some(Duration::from_millis(200));
        let mock = Arc::new(mock);
        let h = harness(mock.clone(), Some(webdav_config()));
        h.storage.set_dataset("coffeeBeans", "[]").unwrap();

        let first = {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.sync(SyncDirection::Upload).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = h.orchestrator.sync(SyncDirection::Upload).await;
        assert_eq!(second.kind, SyncReportKind::Error);
        assert!(second.message.contains("already in progress"));

        let first = first.await.unwrap();
        assert_eq!(first.kind, SyncReportKind::Success);
        // The rejected call never reached the manager.
        assert_eq!(mock.call_count("read_metadata"), 1);
        assert!(!h.orchestrator.status().is_syncing);
    }

    #[tokio::test]
    async fn persisted_success_renders_connected_without_network() {
        let mock = Arc::new(MockRemoteStore::default());
        let mut config = webdav_config();
        config.set_last_connection_success(true);
        let h = harness(mock.clone(), Some(config));

        assert_eq!(h.orchestrator.status().status, ConnectionStatus::Connected);
        assert_eq!(h.factory_calls.load(Ordering::SeqCst), 0);
        assert!(mock.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn new_attempt_clears_previous_debug_logs() {
        let mock = Arc::new(MockRemoteStore::default());
        let h = harness(mock.clone(), Some(webdav_config()));

        *mock.metadata_error.lock().unwrap() = Some("boom-first-attempt".into());
        let report = h.orchestrator.sync(SyncDirection::Full).await;
        assert_eq!(report.kind, SyncReportKind::Error);
        assert!(h
            .orchestrator
            .status()
            .debug_logs
            .iter()
            .any(|l| l.contains("boom-first-attempt")));

        *mock.metadata_error.lock().unwrap() = None;
        let report = h.orchestrator.sync(SyncDirection::Full).await;
        assert_ne!(report.kind, SyncReportKind::Error);
        let logs = h.orchestrator.status().debug_logs;
        assert!(!logs.iter().any(|l| l.contains("boom-first-attempt")));
    }

    #[tokio::test]
    async fn conflict_mutates_nothing_and_schedules_no_reload() {
        let mock = Arc::new(MockRemoteStore::with_remote(&remote_archive_json(), "2026-02-02T00:00:00Z"));
        let h = harness(mock.clone(), Some(webdav_config()));
        h.storage.set_dataset("coffeeBeans", r#"[{"id":"local"}]"#).unwrap();
        h.storage
            .save_sync_state(
                SyncProviderKind::Webdav,
                &crate::storage::SyncStateRecord {
                    last_sync_at: Some("2026-01-01T00:00:00Z".into()),
                    payload_hash: Some("stale".into()),
                    remote_version: Some("2026-01-01T00:00:00Z".into()),
                },
            )
            .unwrap();

        let report = h.orchestrator.sync(SyncDirection::Full).await;
        assert_eq!(report.kind, SyncReportKind::Conflict);
        assert!(report.remote_metadata.is_some());
        assert!(!report.reload_scheduled);
        assert!(h.reloads.lock().unwrap().is_empty());
        assert_eq!(
            h.storage.get_dataset("coffeeBeans").unwrap().unwrap(),
            r#"[{"id":"local"}]"#
        );
    }

    #[tokio::test]
    async fn download_schedules_reload_upload_does_not() {
        let mock = Arc::new(MockRemoteStore::with_remote(&remote_archive_json(), "2026-02-02T00:00:00Z"));
        let h = harness(mock, Some(webdav_config()));

        let report = h.orchestrator.sync(SyncDirection::Download).await;
        assert_eq!(report.kind, SyncReportKind::Success);
        assert!(report.message.contains("downloaded 1"));
        assert!(report.reload_scheduled);
        assert_eq!(h.reloads.lock().unwrap().as_slice(), &[RELOAD_DELAY]);

        let report = h.orchestrator.sync(SyncDirection::Upload).await;
        assert_eq!(report.kind, SyncReportKind::Success);
        assert!(report.message.contains("uploaded"));
        assert!(!report.reload_scheduled);
        assert_eq!(h.reloads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn zero_transfer_with_logs_is_a_warning() {
        // Empty local store and empty remote: nothing moves, diagnostics
        // explain why.
        let mock = Arc::new(MockRemoteStore::default());
        let h = harness(mock, Some(webdav_config()));

        let report = h.orchestrator.sync(SyncDirection::Full).await;
        assert_eq!(report.kind, SyncReportKind::Warning);
        assert!(!report.debug_logs.is_empty());
    }

    #[tokio::test]
    async fn clean_zero_transfer_is_informational() {
        let mock = Arc::new(MockRemoteStore::default());
        let h = harness(mock, Some(webdav_config()));
        h.storage.set_dataset("coffeeBeans", r#"[{"id":"a"}]"#).unwrap();

        let upload = h.orchestrator.sync(SyncDirection::Upload).await;
        assert_eq!(upload.kind, SyncReportKind::Success);

        let report = h.orchestrator.sync(SyncDirection::Full).await;
        assert_eq!(report.kind, SyncReportKind::Info);
        assert_eq!(report.message, "already up to date");
        assert_eq!(report.uploaded + report.downloaded, 0);
    }

    #[tokio::test]
    async fn incomplete_config_fails_before_any_network_call() {
        let mock = Arc::new(MockRemoteStore::default());
        let h = harness(mock.clone(), Some(SyncConfig::Webdav(WebDavConfig::default())));

        let err = h.orchestrator.test_connection().await.unwrap_err();
        assert!(matches!(err, SyncError::ConfigIncomplete(_)));
        assert_eq!(h.orchestrator.status().status, ConnectionStatus::Error);
        assert_eq!(h.factory_calls.load(Ordering::SeqCst), 0);
        assert!(mock.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_reports_counts_and_clears_in_flight() {
        let mock = Arc::new(MockRemoteStore::default());
        let h = harness(mock, Some(webdav_config()));
        h.storage.set_dataset("coffeeBeans", "[]").unwrap();
        h.storage.set_dataset("brewingNotes", "[]").unwrap();
        h.storage.set_dataset("settings", "{}").unwrap();

        let report = h.orchestrator.sync(SyncDirection::Upload).await;
        assert_eq!(report.kind, SyncReportKind::Success);
        assert_eq!(report.message, "uploaded 3 items");
        assert_eq!(report.uploaded, 3);
        assert!(!report.reload_scheduled);
        assert!(!h.orchestrator.status().is_syncing);
    }

    #[tokio::test]
    async fn empty_store_upload_is_reported_not_silently_successful() {
        let mock = Arc::new(MockRemoteStore::with_remote("{\"old\":true}", "2026-01-01T00:00:00Z"));
        let h = harness(mock.clone(), Some(webdav_config()));

        let report = h.orchestrator.sync(SyncDirection::Upload).await;
        assert_eq!(report.kind, SyncReportKind::Error);
        assert!(report.message.contains("no local datasets"));
        assert!(report.debug_logs.iter().any(|l| l.contains("upload skipped")));
        assert_eq!(mock.call_count("write_payload"), 0);
        assert_eq!(mock.payload.lock().unwrap().as_deref(), Some("{\"old\":true}"));
    }

    #[tokio::test]
    async fn thrown_error_is_caught_and_session_survives() {
        let mock = Arc::new(MockRemoteStore::default());
        let h = harness(mock.clone(), Some(webdav_config()));

        *mock.metadata_error.lock().unwrap() = Some("network timeout".into());
        let report = h.orchestrator.sync(SyncDirection::Full).await;
        assert_eq!(report.kind, SyncReportKind::Error);

        let snapshot = h.orchestrator.status();
        assert!(snapshot.debug_logs.iter().any(|l| l.contains("network timeout")));
        assert!(!snapshot.is_syncing);
        // A sync failure is not a connection failure.
        assert_eq!(snapshot.status, ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn connection_success_is_persisted_and_broadcast() {
        let mock = Arc::new(MockRemoteStore::default());
        let h = harness(mock, Some(webdav_config()));

        assert!(h.orchestrator.test_connection().await.unwrap());
        let config = h.storage.load_sync_config(SyncProviderKind::Webdav).unwrap().unwrap();
        assert!(config.last_connection_success());
        let statuses = h.statuses.lock().unwrap().clone();
        assert_eq!(
            statuses,
            vec![ConnectionStatus::Connecting, ConnectionStatus::Connected]
        );
    }

    #[tokio::test]
    async fn connection_failure_attaches_hints() {
        let mut mock = MockRemoteStore::default();
        mock.refuse_connection = true;
        let h = harness(Arc::new(mock), Some(webdav_config()));

        let report = h.orchestrator.sync(SyncDirection::Upload).await;
        assert_eq!(report.kind, SyncReportKind::Error);
        assert!(report.debug_logs.iter().any(|l| l.contains("server URL")));
        assert_eq!(h.orchestrator.status().status, ConnectionStatus::Error);
        // lastConnectionSuccess must not be persisted on failure.
        let config = h.storage.load_sync_config(SyncProviderKind::Webdav).unwrap().unwrap();
        assert!(!config.last_connection_success());
    }

    #[tokio::test]
    async fn restore_backs_through_reload_path() {
        let mock = Arc::new(MockRemoteStore::default());
        mock.snapshots
            .lock()
            .unwrap()
            .push(("backup-42.json".into(), 42, remote_archive_json()));
        let h = harness(mock, Some(webdav_config()));

        let backups = h.orchestrator.list_backups().await.unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].key, "backup-42.json");

        let report = h.orchestrator.restore_backup("backup-42.json").await;
        assert_eq!(report.kind, SyncReportKind::Success);
        assert!(report.reload_scheduled);
        assert!(h.storage.get_dataset("coffeeBeans").unwrap().is_some());
    }

    #[tokio::test]
    async fn disconnect_clears_persisted_success() {
        let mock = Arc::new(MockRemoteStore::default());
        let h = harness(mock, Some(webdav_config()));

        assert!(h.orchestrator.test_connection().await.unwrap());
        h.orchestrator.disconnect().await;
        assert_eq!(h.orchestrator.status().status, ConnectionStatus::Disconnected);
        let config = h.storage.load_sync_config(SyncProviderKind::Webdav).unwrap().unwrap();
        assert!(!config.last_connection_success());
    }
}
