// In-memory RemoteStore used by manager and orchestrator tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::remote::{snapshot_name, RemoteStore};
use super::{BackupRecord, RemoteMetadata, SyncError};

#[derive(Default)]
pub struct MockRemoteStore {
    pub payload: Mutex<Option<String>>,
    pub metadata: Mutex<Option<RemoteMetadata>>,
    pub snapshots: Mutex<Vec<(String, i64, String)>>,
    /// test_connection returns false.
    pub refuse_connection: bool,
    /// read_metadata fails with this message, simulating a network fault
    /// mid-sync.
    pub metadata_error: Mutex<Option<String>>,
    /// Sleep inside read_metadata so a sync can be held in flight.
    pub delay: Option<Duration>,
    pub calls: Mutex<Vec<String>>,
}

impl MockRemoteStore {
    pub fn with_remote(payload: &str, last_modified: &str) -> Self {
        let store = Self::default();
        *store.payload.lock().unwrap() = Some(payload.to_string());
        *store.metadata.lock().unwrap() = Some(RemoteMetadata {
            last_modified: last_modified.to_string(),
            device_id: "other-device".to_string(),
            app_version: "0.0.0".to_string(),
        });
        store
    }

    pub fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    pub fn call_count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.as_str() == call).count()
    }
}

#[async_trait]
impl RemoteStore for std::sync::Arc<MockRemoteStore> {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn test_connection(&self) -> Result<bool, SyncError> {
        self.record("test_connection");
        Ok(!self.refuse_connection)
    }

    async fn read_metadata(&self) -> Result<Option<RemoteMetadata>, SyncError> {
        self.record("read_metadata");
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.metadata_error.lock().unwrap().clone() {
            return Err(SyncError::Remote(message));
        }
        Ok(self.metadata.lock().unwrap().clone())
    }

    async fn read_payload(&self) -> Result<Option<String>, SyncError> {
        self.record("read_payload");
        Ok(self.payload.lock().unwrap().clone())
    }

    async fn write_payload(&self, payload: &str, metadata: &RemoteMetadata) -> Result<(), SyncError> {
        self.record("write_payload");
        *self.payload.lock().unwrap() = Some(payload.to_string());
        *self.metadata.lock().unwrap() = Some(metadata.clone());
        Ok(())
    }

    async fn snapshot_before_overwrite(&self, timestamp: i64) -> Result<Option<String>, SyncError> {
        self.record("snapshot");
        let Some(current) = self.payload.lock().unwrap().clone() else {
            return Ok(None);
        };
        let name = snapshot_name(timestamp);
        self.snapshots.lock().unwrap().push((name.clone(), timestamp, current));
        Ok(Some(name))
    }

    async fn list_snapshots(&self) -> Result<Vec<BackupRecord>, SyncError> {
        self.record("list_snapshots");
        let mut records: Vec<BackupRecord> = self
            .snapshots
            .lock()
            .unwrap()
            .iter()
            .map(|(key, timestamp, _)| BackupRecord {
                key: key.clone(),
                timestamp: *timestamp,
            })
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    async fn read_snapshot(&self, key: &str) -> Result<String, SyncError> {
        self.record("read_snapshot");
        self.snapshots
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _, _)| k == key)
            .map(|(_, _, payload)| payload.clone())
            .ok_or_else(|| SyncError::Remote(format!("backup {} not found", key)))
    }
}
