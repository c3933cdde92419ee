use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::sync::{SyncConfig, SyncProviderKind};

/// Per-provider sync bookkeeping. Absence of the record means "never synced".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStateRecord {
    /// RFC 3339 timestamp of the last completed sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<String>,
    /// Hash of the local payload at the last sync, for local-dirty detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_hash: Option<String>,
    /// Remote `lastModified` seen at the last sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_version: Option<String>,
}

/// Flat key-value store over JSON files in the platform config directory.
/// Dataset blobs are opaque to this layer; the frontend owns their schema.
#[derive(Clone)]
pub struct Storage {
    root: PathBuf,
    device_id: Arc<OnceCell<String>>,
}

impl Storage {
    pub fn new() -> Result<Self, String> {
        let root = dirs::config_dir()
            .ok_or("Could not find config directory")?
            .join("BrewGuide");
        Ok(Self::with_root(root))
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self {
            root,
            device_id: Arc::new(OnceCell::new()),
        }
    }

    fn ensure_dir(&self, dir: &PathBuf) -> Result<(), String> {
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| format!("Failed to create directory: {}", e))?;
        }
        Ok(())
    }

    /// Dataset names come from the frontend; keep them filesystem-safe.
    fn sanitize(name: &str) -> String {
        name.chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect()
    }

    fn dataset_path(&self, name: &str) -> PathBuf {
        self.root.join("datasets").join(format!("{}.json", Self::sanitize(name)))
    }

    pub fn get_dataset(&self, name: &str) -> Result<Option<String>, String> {
        let path = self.dataset_path(name);
        if !path.exists() {
            return Ok(None);
        }
        fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| format!("Failed to read dataset {}: {}", name, e))
    }

    pub fn set_dataset(&self, name: &str, content: &str) -> Result<(), String> {
        let dir = self.root.join("datasets");
        self.ensure_dir(&dir)?;
        fs::write(self.dataset_path(name), content)
            .map_err(|e| format!("Failed to write dataset {}: {}", name, e))
    }

    pub fn remove_dataset(&self, name: &str) -> Result<(), String> {
        let path = self.dataset_path(name);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| format!("Failed to remove dataset {}: {}", name, e))?;
        }
        Ok(())
    }

    pub fn list_datasets(&self) -> Result<Vec<String>, String> {
        let dir = self.root.join("datasets");
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut names = Vec::new();
        let entries = fs::read_dir(&dir).map_err(|e| format!("Failed to list datasets: {}", e))?;
        for entry in entries {
            let entry = entry.map_err(|e| format!("Failed to list datasets: {}", e))?;
            if let Some(name) = entry.path().file_stem().and_then(|s| s.to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn sync_config_path(&self, provider: SyncProviderKind) -> PathBuf {
        self.root.join(format!("sync-{}.json", provider.as_str()))
    }

    pub fn load_sync_config(&self, provider: SyncProviderKind) -> Result<Option<SyncConfig>, String> {
        let path = self.sync_config_path(provider);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| format!("Failed to read sync config: {}", e))?;
        let config: SyncConfig =
            serde_json::from_str(&content).map_err(|e| format!("Failed to parse sync config: {}", e))?;
        Ok(Some(config))
    }

    pub fn save_sync_config(&self, config: &SyncConfig) -> Result<(), String> {
        self.ensure_dir(&self.root)?;
        let content = serde_json::to_string_pretty(config)
            .map_err(|e| format!("Failed to serialize sync config: {}", e))?;
        fs::write(self.sync_config_path(config.kind()), content)
            .map_err(|e| format!("Failed to write sync config: {}", e))
    }

    fn sync_state_path(&self, provider: SyncProviderKind) -> PathBuf {
        self.root.join(format!("sync-state-{}.json", provider.as_str()))
    }

    pub fn load_sync_state(&self, provider: SyncProviderKind) -> Result<SyncStateRecord, String> {
        let path = self.sync_state_path(provider);
        if !path.exists() {
            return Ok(SyncStateRecord::default());
        }
        let content = fs::read_to_string(&path).map_err(|e| format!("Failed to read sync state: {}", e))?;
        // A corrupt bookkeeping file must never block a sync; fall back to "never synced".
        Ok(serde_json::from_str(&content).unwrap_or_default())
    }

    pub fn save_sync_state(&self, provider: SyncProviderKind, state: &SyncStateRecord) -> Result<(), String> {
        self.ensure_dir(&self.root)?;
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| format!("Failed to serialize sync state: {}", e))?;
        fs::write(self.sync_state_path(provider), content)
            .map_err(|e| format!("Failed to write sync state: {}", e))
    }

    /// Stable random id for this installation, created on first use.
    pub fn device_id(&self) -> Result<String, String> {
        if let Some(id) = self.device_id.get() {
            return Ok(id.clone());
        }
        let path = self.root.join("device-id");
        let id = if path.exists() {
            fs::read_to_string(&path)
                .map_err(|e| format!("Failed to read device id: {}", e))?
                .trim()
                .to_string()
        } else {
            self.ensure_dir(&self.root)?;
            let id = uuid::Uuid::new_v4().to_string();
            fs::write(&path, &id).map_err(|e| format!("Failed to write device id: {}", e))?;
            id
        };
        let _ = self.device_id.set(id.clone());
        Ok(id)
    }
}
