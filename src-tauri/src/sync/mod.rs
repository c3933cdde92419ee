// Cloud synchronization for the bean inventory and brewing logs.
// One orchestration layer, three interchangeable remote stores.
pub mod crypto;
pub mod manager;
pub mod orchestrator;
pub mod remote;
pub mod s3;
pub mod supabase;
#[cfg(test)]
pub mod testing;
pub mod webdav;

pub use manager::SyncManager;
pub use orchestrator::{SyncEvents, SyncOrchestrator, SyncReport, SyncReportKind};
pub use remote::RemoteStore;
pub use s3::S3Config;
pub use supabase::SupabaseConfig;
pub use webdav::WebDavConfig;

use serde::{Deserialize, Serialize};

/// Supported sync backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncProviderKind {
    S3,
    Webdav,
    Supabase,
}

impl SyncProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncProviderKind::S3 => "s3",
            SyncProviderKind::Webdav => "webdav",
            SyncProviderKind::Supabase => "supabase",
        }
    }
}

impl std::fmt::Display for SyncProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    Upload,
    Download,
    Full,
}

/// Connection state as shown in the settings UI. `Connecting` is transient
/// and never persisted; after a restart the status is re-derived from
/// `lastConnectionSuccess` in the stored config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// In-flight progress snapshot, overwritten on every callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub phase: String,
    pub message: String,
    pub percentage: u8,
}

/// Metadata sidecar stored next to the payload on every provider.
/// Drives conflict detection: a remote `last_modified` that moved since the
/// last recorded sync means someone else wrote the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMetadata {
    pub last_modified: String,
    pub device_id: String,
    pub app_version: String,
}

/// Outcome of one sync() invocation, normalized across providers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    #[serde(default)]
    pub conflict: bool,
    pub uploaded_count: u32,
    pub downloaded_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub debug_logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_metadata: Option<RemoteMetadata>,
}

/// One historical snapshot taken before an upload overwrote remote data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub key: String,
    pub timestamp: i64,
}

/// Per-provider connection settings as edited in the settings form.
/// Credentials are stored in plaintext in local config files; an accepted
/// trade-off carried over from the original design.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum SyncConfig {
    S3(S3Config),
    Webdav(WebDavConfig),
    Supabase(SupabaseConfig),
}

impl SyncConfig {
    pub fn kind(&self) -> SyncProviderKind {
        match self {
            SyncConfig::S3(_) => SyncProviderKind::S3,
            SyncConfig::Webdav(_) => SyncProviderKind::Webdav,
            SyncConfig::Supabase(_) => SyncProviderKind::Supabase,
        }
    }

    /// Checks required fields before any network call is attempted.
    pub fn validate(&self) -> Result<(), SyncError> {
        let missing = match self {
            SyncConfig::S3(c) => c.missing_fields(),
            SyncConfig::Webdav(c) => c.missing_fields(),
            SyncConfig::Supabase(c) => c.missing_fields(),
        };
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SyncError::ConfigIncomplete(missing.join(", ")))
        }
    }

    pub fn last_connection_success(&self) -> bool {
        match self {
            SyncConfig::S3(c) => c.last_connection_success,
            SyncConfig::Webdav(c) => c.last_connection_success,
            SyncConfig::Supabase(c) => c.last_connection_success,
        }
    }

    pub fn set_last_connection_success(&mut self, ok: bool) {
        match self {
            SyncConfig::S3(c) => c.last_connection_success = ok,
            SyncConfig::Webdav(c) => c.last_connection_success = ok,
            SyncConfig::Supabase(c) => c.last_connection_success = ok,
        }
    }

    /// Optional end-to-end encryption passphrase for the sync payload.
    pub fn encryption_passphrase(&self) -> Option<&str> {
        let p = match self {
            SyncConfig::S3(c) => &c.encryption_passphrase,
            SyncConfig::Webdav(c) => &c.encryption_passphrase,
            SyncConfig::Supabase(c) => &c.encryption_passphrase,
        };
        p.as_deref().filter(|s| !s.is_empty())
    }
}

/// Failure taxonomy of the orchestration layer. Everything here is
/// recoverable by an explicit user retry; nothing is fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("configuration incomplete: missing {0}")]
    ConfigIncomplete(String),
    #[error("connection failed, check configuration ({0})")]
    ConnectionFailed(String),
    #[error("sync already in progress")]
    AlreadyInProgress,
    #[error("{0}")]
    Remote(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("payload error: {0}")]
    Payload(String),
}

impl SyncError {
    pub fn remote(err: impl std::fmt::Display) -> Self {
        SyncError::Remote(err.to_string())
    }
}
