// The provider-parameterized sync manager: direction logic, conflict
// detection, snapshot-before-upload and progress reporting, written once
// over the RemoteStore seam.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;

use crate::data::{self, DataArchive, ImportMode, APP_VERSION};
use crate::storage::{Storage, SyncStateRecord};

use super::{
    crypto, BackupRecord, RemoteMetadata, RemoteStore, SyncDirection, SyncError, SyncProgress, SyncProviderKind,
    SyncResult,
};

pub type ProgressCallback<'a> = &'a (dyn Fn(SyncProgress) + Send + Sync);

pub struct SyncManager {
    kind: SyncProviderKind,
    store: Box<dyn RemoteStore>,
    storage: Storage,
    passphrase: Option<String>,
    /// Process-wide guard: only one provider may write the local store at a
    /// time, independent providers may still transfer concurrently.
    local_write_guard: Arc<AtomicBool>,
    initialized: bool,
}

impl SyncManager {
    pub fn new(
        kind: SyncProviderKind,
        store: Box<dyn RemoteStore>,
        storage: Storage,
        passphrase: Option<String>,
        local_write_guard: Arc<AtomicBool>,
    ) -> Self {
        Self {
            kind,
            store,
            storage,
            passphrase,
            local_write_guard,
            initialized: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn disconnect(&mut self) {
        self.initialized = false;
    }

    /// One connection probe; a true result marks the handle usable.
    pub async fn initialize(&mut self) -> Result<bool, SyncError> {
        let ok = self.store.test_connection().await?;
        self.initialized = ok;
        Ok(ok)
    }

    pub async fn test_connection(&self) -> Result<bool, SyncError> {
        self.store.test_connection().await
    }

    pub async fn list_backups(&self) -> Result<Vec<BackupRecord>, SyncError> {
        self.store.list_snapshots().await
    }

    pub async fn sync(&self, direction: SyncDirection, on_progress: ProgressCallback<'_>) -> Result<SyncResult, SyncError> {
        let mut logs: Vec<String> = Vec::new();

        report(on_progress, "prepare", "collecting local datasets", 5);
        let archive = data::build_archive(&self.storage)?;
        let local_hash = data::payload_hash(&archive);
        let state = self.storage.load_sync_state(self.kind).map_err(SyncError::Storage)?;

        report(on_progress, "check", "checking remote state", 15);
        let remote_meta = self.store.read_metadata().await?;

        let local_dirty = match &state.payload_hash {
            Some(hash) => hash != &local_hash,
            // Never synced: any local data counts as a pending change.
            None => !archive.data.is_empty(),
        };
        let remote_changed = match (&remote_meta, &state.remote_version) {
            (Some(meta), Some(seen)) => &meta.last_modified != seen,
            (Some(_), None) => true,
            (None, _) => false,
        };

        match direction {
            SyncDirection::Full if local_dirty && remote_changed => {
                let meta = remote_meta.clone();
                if let Some(meta) = &meta {
                    logs.push(format!(
                        "remote modified at {} by device {}",
                        meta.last_modified, meta.device_id
                    ));
                }
                logs.push("local datasets changed since the last sync".to_string());
                log::warn!("{} sync conflict: both sides changed", self.kind);
                Ok(SyncResult {
                    success: false,
                    conflict: true,
                    remote_metadata: meta,
                    debug_logs: logs,
                    ..Default::default()
                })
            }
            SyncDirection::Full if remote_changed => self.download(remote_meta.as_ref(), on_progress, logs).await,
            SyncDirection::Full if local_dirty => self.upload(&archive, &local_hash, on_progress, logs).await,
            SyncDirection::Full => {
                if archive.data.is_empty() {
                    logs.push("local store has no datasets".to_string());
                }
                if remote_meta.is_none() {
                    logs.push("remote has never been written".to_string());
                }
                Ok(SyncResult {
                    success: true,
                    message: Some("already up to date".to_string()),
                    debug_logs: logs,
                    remote_metadata: remote_meta,
                    ..Default::default()
                })
            }
            SyncDirection::Upload => self.upload(&archive, &local_hash, on_progress, logs).await,
            SyncDirection::Download => self.download(remote_meta.as_ref(), on_progress, logs).await,
        }
    }

    /// Forced download of one historical snapshot. Skips the conflict check:
    /// the user confirmed the overwrite in the UI.
    pub async fn restore_backup(&self, key: &str, on_progress: ProgressCallback<'_>) -> Result<SyncResult, SyncError> {
        let logs = Vec::new();
        report(on_progress, "transfer", "downloading backup snapshot", 30);
        let payload = self.store.read_snapshot(key).await?;
        let archive = self.decode_payload(payload)?;

        report(on_progress, "finalize", "applying datasets", 80);
        let applied = self.apply_locally(&archive)?;

        let state = self.storage.load_sync_state(self.kind).map_err(SyncError::Storage)?;
        self.storage
            .save_sync_state(
                self.kind,
                &SyncStateRecord {
                    last_sync_at: Some(Utc::now().to_rfc3339()),
                    // Restored data must win the next full sync, so the local
                    // payload is deliberately left looking dirty.
                    payload_hash: None,
                    remote_version: state.remote_version,
                },
            )
            .map_err(SyncError::Storage)?;

        report(on_progress, "finalize", "restore complete", 100);
        log::info!("{}: restored backup {} ({} datasets)", self.kind, key, applied);
        Ok(SyncResult {
            success: true,
            downloaded_count: applied,
            message: Some(format!("restored backup with {} datasets", applied)),
            debug_logs: logs,
            ..Default::default()
        })
    }

    async fn upload(
        &self,
        archive: &DataArchive,
        local_hash: &str,
        on_progress: ProgressCallback<'_>,
        mut logs: Vec<String>,
    ) -> Result<SyncResult, SyncError> {
        if archive.data.is_empty() {
            // Never overwrite the remote with an empty archive; an empty
            // store is far more likely a fresh install than a deliberate
            // wipe.
            logs.push("local store has no datasets; upload skipped".to_string());
            return Ok(SyncResult {
                success: false,
                message: Some("no local datasets to upload".to_string()),
                debug_logs: logs,
                ..Default::default()
            });
        }

        report(on_progress, "backup", "snapshotting current remote data", 35);
        let timestamp = Utc::now().timestamp_millis();
        match self.store.snapshot_before_overwrite(timestamp).await? {
            Some(key) => log::info!("{}: snapshot {} created before upload", self.kind, key),
            None => logs.push("remote had no previous payload; snapshot skipped".to_string()),
        }

        let mut payload = archive.to_json()?;
        if let Some(passphrase) = &self.passphrase {
            payload = crypto::encrypt_payload(&payload, passphrase)?;
        }
        let metadata = RemoteMetadata {
            last_modified: Utc::now().to_rfc3339(),
            device_id: self.storage.device_id().map_err(SyncError::Storage)?,
            app_version: APP_VERSION.to_string(),
        };

        let count = archive.dataset_count();
        report(on_progress, "transfer", &format!("uploading {} datasets", count), 60);
        self.store.write_payload(&payload, &metadata).await?;

        report(on_progress, "finalize", "recording sync state", 90);
        self.storage
            .save_sync_state(
                self.kind,
                &SyncStateRecord {
                    last_sync_at: Some(metadata.last_modified.clone()),
                    payload_hash: Some(local_hash.to_string()),
                    remote_version: Some(metadata.last_modified.clone()),
                },
            )
            .map_err(SyncError::Storage)?;

        report(on_progress, "finalize", "upload complete", 100);
        Ok(SyncResult {
            success: true,
            uploaded_count: count,
            message: Some(format!("uploaded {} datasets", count)),
            debug_logs: logs,
            remote_metadata: Some(metadata),
            ..Default::default()
        })
    }

    async fn download(
        &self,
        remote_meta: Option<&RemoteMetadata>,
        on_progress: ProgressCallback<'_>,
        mut logs: Vec<String>,
    ) -> Result<SyncResult, SyncError> {
        report(on_progress, "transfer", "downloading remote data", 50);
        let Some(payload) = self.store.read_payload().await? else {
            logs.push("no payload found on the remote".to_string());
            return Ok(SyncResult {
                success: false,
                message: Some("no data found on the remote".to_string()),
                debug_logs: logs,
                ..Default::default()
            });
        };
        if remote_meta.is_none() {
            logs.push("remote payload present without metadata".to_string());
        }
        let archive = match self.decode_payload(payload) {
            Ok(archive) => archive,
            Err(SyncError::Payload(message)) => {
                // A bad passphrase or corrupt payload is a sync failure, not
                // a connection failure.
                return Ok(SyncResult {
                    success: false,
                    message: Some(message),
                    debug_logs: logs,
                    ..Default::default()
                });
            }
            Err(other) => return Err(other),
        };

        report(on_progress, "finalize", "applying datasets", 85);
        let applied = self.apply_locally(&archive)?;

        self.storage
            .save_sync_state(
                self.kind,
                &SyncStateRecord {
                    last_sync_at: Some(Utc::now().to_rfc3339()),
                    payload_hash: Some(data::payload_hash(&archive)),
                    remote_version: remote_meta.map(|m| m.last_modified.clone()),
                },
            )
            .map_err(SyncError::Storage)?;

        report(on_progress, "finalize", "download complete", 100);
        Ok(SyncResult {
            success: true,
            downloaded_count: applied,
            message: Some(format!("downloaded {} datasets", applied)),
            debug_logs: logs,
            remote_metadata: remote_meta.cloned(),
            ..Default::default()
        })
    }

    fn decode_payload(&self, payload: String) -> Result<DataArchive, SyncError> {
        let plaintext = if crypto::is_encrypted(&payload) {
            let Some(passphrase) = &self.passphrase else {
                return Err(SyncError::Payload(
                    "remote payload is encrypted; set the encryption passphrase in the sync settings".to_string(),
                ));
            };
            crypto::decrypt_payload(&payload, passphrase)?
        } else {
            payload
        };
        DataArchive::from_json(&plaintext)
    }

    fn apply_locally(&self, archive: &DataArchive) -> Result<u32, SyncError> {
        if self
            .local_write_guard
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::AlreadyInProgress);
        }
        let result = data::apply_archive(&self.storage, archive, ImportMode::Replace);
        self.local_write_guard.store(false, Ordering::SeqCst);
        result
    }
}

fn report(on_progress: ProgressCallback<'_>, phase: &str, message: &str, percentage: u8) {
    on_progress(SyncProgress {
        phase: phase.to_string(),
        message: message.to_string(),
        percentage,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::MockRemoteStore;

    fn noop_progress() -> impl Fn(SyncProgress) + Send + Sync {
        |_| {}
    }

    fn setup(mock: Arc<MockRemoteStore>) -> (tempfile::TempDir, Storage, SyncManager) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::with_root(dir.path().join("store"));
        let manager = SyncManager::new(
            SyncProviderKind::Webdav,
            Box::new(mock),
            storage.clone(),
            None,
            Arc::new(AtomicBool::new(false)),
        );
        (dir, storage, manager)
    }

    fn remote_archive_json() -> String {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::with_root(dir.path().join("remote"));
        storage.set_dataset("coffeeBeans", r#"[{"id":"r1","name":"Remote Bean"}]"#).unwrap();
        data::build_archive(&storage).unwrap().to_json().unwrap()
    }

    #[tokio::test]
    async fn upload_snapshots_before_writing() {
        let mock = Arc::new(MockRemoteStore::with_remote("{\"old\":true}", "2026-01-01T00:00:00Z"));
        let (_dir, storage, manager) = setup(mock.clone());
        storage.set_dataset("coffeeBeans", r#"[{"id":"a"}]"#).unwrap();

        let progress = noop_progress();
        let result = manager.sync(SyncDirection::Upload, &progress).await.unwrap();
        assert!(result.success);
        assert_eq!(result.uploaded_count, 1);
        assert_eq!(result.downloaded_count, 0);

        let calls = mock.calls.lock().unwrap().clone();
        let snapshot_pos = calls.iter().position(|c| c == "snapshot").unwrap();
        let write_pos = calls.iter().position(|c| c == "write_payload").unwrap();
        assert!(snapshot_pos < write_pos);
        assert_eq!(mock.snapshots.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn upload_from_empty_store_leaves_remote_untouched() {
        let mock = Arc::new(MockRemoteStore::with_remote("{\"old\":true}", "2026-01-01T00:00:00Z"));
        let (_dir, _storage, manager) = setup(mock.clone());

        let progress = noop_progress();
        let result = manager.sync(SyncDirection::Upload, &progress).await.unwrap();
        assert!(!result.success);
        assert!(!result.conflict);
        assert_eq!(result.uploaded_count, 0);
        assert!(result.debug_logs.iter().any(|l| l.contains("upload skipped")));

        assert_eq!(mock.call_count("write_payload"), 0);
        assert_eq!(mock.call_count("snapshot"), 0);
        assert_eq!(mock.payload.lock().unwrap().as_deref(), Some("{\"old\":true}"));
    }

    #[tokio::test]
    async fn full_sync_detects_conflict_and_writes_nothing() {
        let mock = Arc::new(MockRemoteStore::with_remote(&remote_archive_json(), "2026-02-02T00:00:00Z"));
        let (_dir, storage, manager) = setup(mock.clone());
        // Local edits with a recorded state pointing at an older remote version.
        storage.set_dataset("coffeeBeans", r#"[{"id":"local"}]"#).unwrap();
        storage
            .save_sync_state(
                SyncProviderKind::Webdav,
                &SyncStateRecord {
                    last_sync_at: Some("2026-01-01T00:00:00Z".into()),
                    payload_hash: Some("stale".into()),
                    remote_version: Some("2026-01-01T00:00:00Z".into()),
                },
            )
            .unwrap();

        let progress = noop_progress();
        let result = manager.sync(SyncDirection::Full, &progress).await.unwrap();
        assert!(result.conflict);
        assert!(!result.success);
        assert_eq!(result.remote_metadata.unwrap().last_modified, "2026-02-02T00:00:00Z");
        assert_eq!(mock.call_count("write_payload"), 0);
        assert_eq!(mock.call_count("read_payload"), 0);
        // Local store untouched.
        assert_eq!(storage.get_dataset("coffeeBeans").unwrap().unwrap(), r#"[{"id":"local"}]"#);
    }

    #[tokio::test]
    async fn full_sync_reports_up_to_date_without_changes() {
        let mock = Arc::new(MockRemoteStore::default());
        let (_dir, _storage, manager) = setup(mock);

        let progress = noop_progress();
        let result = manager.sync(SyncDirection::Full, &progress).await.unwrap();
        assert!(result.success);
        assert_eq!(result.uploaded_count + result.downloaded_count, 0);
        assert_eq!(result.message.as_deref(), Some("already up to date"));
        // Anomalous zero-transfer carries diagnostics.
        assert!(!result.debug_logs.is_empty());
    }

    #[tokio::test]
    async fn download_applies_remote_datasets() {
        let mock = Arc::new(MockRemoteStore::with_remote(&remote_archive_json(), "2026-02-02T00:00:00Z"));
        let (_dir, storage, manager) = setup(mock);

        let progress = noop_progress();
        let result = manager.sync(SyncDirection::Download, &progress).await.unwrap();
        assert!(result.success);
        assert_eq!(result.downloaded_count, 1);
        let blob = storage.get_dataset("coffeeBeans").unwrap().unwrap();
        assert!(blob.contains("Remote Bean"));

        let state = storage.load_sync_state(SyncProviderKind::Webdav).unwrap();
        assert_eq!(state.remote_version.as_deref(), Some("2026-02-02T00:00:00Z"));
        assert!(state.payload_hash.is_some());
    }

    #[tokio::test]
    async fn download_without_remote_data_fails_softly() {
        let mock = Arc::new(MockRemoteStore::default());
        let (_dir, _storage, manager) = setup(mock);

        let progress = noop_progress();
        let result = manager.sync(SyncDirection::Download, &progress).await.unwrap();
        assert!(!result.success);
        assert!(!result.conflict);
        assert!(result.debug_logs.iter().any(|l| l.contains("no payload")));
    }

    #[tokio::test]
    async fn encrypted_payload_round_trips_with_passphrase() {
        let mock = Arc::new(MockRemoteStore::default());
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::with_root(dir.path().join("store"));
        storage.set_dataset("coffeeBeans", r#"[{"id":"a"}]"#).unwrap();
        let manager = SyncManager::new(
            SyncProviderKind::S3,
            Box::new(mock.clone()),
            storage.clone(),
            Some("passphrase".into()),
            Arc::new(AtomicBool::new(false)),
        );

        let progress = noop_progress();
        manager.sync(SyncDirection::Upload, &progress).await.unwrap();
        assert!(crypto::is_encrypted(mock.payload.lock().unwrap().as_deref().unwrap()));

        storage.remove_dataset("coffeeBeans").unwrap();
        let result = manager.sync(SyncDirection::Download, &progress).await.unwrap();
        assert!(result.success);
        assert!(storage.get_dataset("coffeeBeans").unwrap().is_some());
    }

    #[tokio::test]
    async fn encrypted_payload_without_passphrase_is_a_soft_failure() {
        let mock = Arc::new(MockRemoteStore::default());
        *mock.payload.lock().unwrap() = Some(crypto::encrypt_payload("{}", "secret").unwrap());
        let (_dir, _storage, manager) = setup(mock);

        let progress = noop_progress();
        let result = manager.sync(SyncDirection::Download, &progress).await.unwrap();
        assert!(!result.success);
        assert!(result.message.unwrap().contains("encrypted"));
    }

    #[tokio::test]
    async fn restore_backup_marks_local_dirty() {
        let mock = Arc::new(MockRemoteStore::default());
        mock.snapshots
            .lock()
            .unwrap()
            .push(("backup-42.json".into(), 42, remote_archive_json()));
        let (_dir, storage, manager) = setup(mock);

        let progress = noop_progress();
        let result = manager.restore_backup("backup-42.json", &progress).await.unwrap();
        assert!(result.success);
        assert_eq!(result.downloaded_count, 1);
        assert!(storage.get_dataset("coffeeBeans").unwrap().is_some());

        let state = storage.load_sync_state(SyncProviderKind::Webdav).unwrap();
        assert!(state.payload_hash.is_none());
    }

    #[tokio::test]
    async fn busy_local_write_guard_rejects_download() {
        let mock = Arc::new(MockRemoteStore::with_remote(&remote_archive_json(), "2026-02-02T00:00:00Z"));
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::with_root(dir.path().join("store"));
        let guard = Arc::new(AtomicBool::new(true));
        let manager = SyncManager::new(SyncProviderKind::S3, Box::new(mock), storage, None, guard);

        let progress = noop_progress();
        let err = manager.sync(SyncDirection::Download, &progress).await.unwrap_err();
        assert!(matches!(err, SyncError::AlreadyInProgress));
    }
}
