// Provider abstraction. The sync manager and orchestrator are written once
// against this trait; S3, WebDAV and Supabase only move bytes.

use async_trait::async_trait;

use super::{BackupRecord, RemoteMetadata, SyncConfig, SyncError};

/// Remote filename of the sync payload (object key / WebDAV file).
pub const PAYLOAD_NAME: &str = "brew-guide-data.json";
/// Remote filename of the metadata sidecar.
pub const METADATA_NAME: &str = "brew-guide-metadata.json";

#[async_trait]
pub trait RemoteStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// One cheap round-trip proving the credentials and location work.
    async fn test_connection(&self) -> Result<bool, SyncError>;

    /// Metadata sidecar, or None when the remote was never written.
    async fn read_metadata(&self) -> Result<Option<RemoteMetadata>, SyncError>;

    async fn read_payload(&self) -> Result<Option<String>, SyncError>;

    /// Writes payload and metadata. Metadata is written last so a torn write
    /// leaves the old version visible rather than advertising a half upload.
    async fn write_payload(&self, payload: &str, metadata: &RemoteMetadata) -> Result<(), SyncError>;

    /// Copies the current remote payload into a timestamped snapshot before
    /// an upload overwrites it. Returns the snapshot key, or None when the
    /// remote had no payload yet.
    async fn snapshot_before_overwrite(&self, timestamp: i64) -> Result<Option<String>, SyncError>;

    async fn list_snapshots(&self) -> Result<Vec<BackupRecord>, SyncError>;

    async fn read_snapshot(&self, key: &str) -> Result<String, SyncError>;
}

/// Builds the concrete store for a validated config.
pub fn build_remote_store(config: &SyncConfig) -> Result<Box<dyn RemoteStore>, SyncError> {
    config.validate()?;
    Ok(match config {
        SyncConfig::S3(c) => Box::new(super::s3::S3Store::new(c)?),
        SyncConfig::Webdav(c) => Box::new(super::webdav::WebDavStore::new(c)?),
        SyncConfig::Supabase(c) => Box::new(super::supabase::SupabaseStore::new(c)?),
    })
}

/// Snapshot naming shared by all providers: `backup-<unix-millis>.json`.
pub fn snapshot_name(timestamp: i64) -> String {
    format!("backup-{}.json", timestamp)
}

/// Parses the timestamp back out of a snapshot key or file name.
pub fn snapshot_timestamp(key: &str) -> Option<i64> {
    let name = key.rsplit('/').next()?;
    name.strip_prefix("backup-")?.strip_suffix(".json")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_name_round_trip() {
        let name = snapshot_name(1724750000123);
        assert_eq!(name, "backup-1724750000123.json");
        assert_eq!(snapshot_timestamp(&name), Some(1724750000123));
        assert_eq!(snapshot_timestamp("prefix/backups/backup-42.json"), Some(42));
        assert_eq!(snapshot_timestamp("unrelated.json"), None);
    }
}
