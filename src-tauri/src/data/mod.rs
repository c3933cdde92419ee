// Data archive: the single JSON document that export/import and cloud sync
// move around. Bundles every dataset blob from the local store.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::storage::Storage;
use crate::sync::SyncError;

pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Overwrite local datasets with the imported ones.
    Replace,
    /// Union array datasets by record id, imported record wins.
    Merge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveMetadata {
    pub exported_at: String,
    pub device_id: String,
    pub app_version: String,
    pub datasets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataArchive {
    pub metadata: ArchiveMetadata,
    /// Dataset name -> parsed JSON value. Blobs that are not valid JSON are
    /// carried as plain strings.
    pub data: BTreeMap<String, Value>,
}

impl DataArchive {
    pub fn dataset_count(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn to_json(&self) -> Result<String, SyncError> {
        serde_json::to_string_pretty(self).map_err(|e| SyncError::Payload(format!("serialize archive: {}", e)))
    }

    pub fn from_json(json: &str) -> Result<Self, SyncError> {
        serde_json::from_str(json).map_err(|e| SyncError::Payload(format!("parse archive: {}", e)))
    }
}

/// Collects every dataset in the local store into one archive.
pub fn build_archive(storage: &Storage) -> Result<DataArchive, SyncError> {
    let names = storage.list_datasets().map_err(SyncError::Storage)?;
    let mut data = BTreeMap::new();
    for name in &names {
        if let Some(blob) = storage.get_dataset(name).map_err(SyncError::Storage)? {
            let value = serde_json::from_str(&blob).unwrap_or(Value::String(blob));
            data.insert(name.clone(), value);
        }
    }
    Ok(DataArchive {
        metadata: ArchiveMetadata {
            exported_at: Utc::now().to_rfc3339(),
            device_id: storage.device_id().map_err(SyncError::Storage)?,
            app_version: APP_VERSION.to_string(),
            datasets: names,
        },
        data,
    })
}

/// Writes the archive's datasets back into the local store.
/// Returns the number of datasets applied.
pub fn apply_archive(storage: &Storage, archive: &DataArchive, mode: ImportMode) -> Result<u32, SyncError> {
    let mut applied = 0u32;
    for (name, incoming) in &archive.data {
        let merged = match mode {
            ImportMode::Replace => incoming.clone(),
            ImportMode::Merge => {
                let existing = storage
                    .get_dataset(name)
                    .map_err(SyncError::Storage)?
                    .and_then(|blob| serde_json::from_str::<Value>(&blob).ok());
                match existing {
                    Some(local) => merge_datasets(&local, incoming),
                    None => incoming.clone(),
                }
            }
        };
        let blob = match &merged {
            Value::String(s) => s.clone(),
            other => serde_json::to_string(other)
                .map_err(|e| SyncError::Payload(format!("serialize dataset {}: {}", name, e)))?,
        };
        storage.set_dataset(name, &blob).map_err(SyncError::Storage)?;
        applied += 1;
    }
    Ok(applied)
}

/// Union of two array datasets keyed by `id`; the incoming record wins on
/// collision. Non-array blobs are replaced wholesale.
fn merge_datasets(local: &Value, incoming: &Value) -> Value {
    let (Some(local_items), Some(incoming_items)) = (local.as_array(), incoming.as_array()) else {
        return incoming.clone();
    };

    let mut merged: Vec<Value> = Vec::with_capacity(local_items.len() + incoming_items.len());
    let incoming_ids: Vec<&str> = incoming_items
        .iter()
        .filter_map(|item| item.get("id").and_then(Value::as_str))
        .collect();

    for item in local_items {
        let replaced = item
            .get("id")
            .and_then(Value::as_str)
            .map(|id| incoming_ids.contains(&id))
            .unwrap_or(false);
        if !replaced {
            merged.push(item.clone());
        }
    }
    merged.extend(incoming_items.iter().cloned());
    Value::Array(merged)
}

/// Deterministic hash of the dataset map, used to detect local edits since
/// the last sync. Metadata is excluded: timestamps change on every export.
pub fn payload_hash(archive: &DataArchive) -> String {
    let canonical = serde_json::to_string(&archive.data).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}
