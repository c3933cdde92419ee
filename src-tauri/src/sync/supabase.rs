// Supabase remote store over PostgREST. One row per user in `sync_data`
// (payload + metadata), snapshots appended to `sync_backups`. Both tables
// come from the setup SQL shipped with the app.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::remote::{snapshot_name, RemoteStore};
use super::{BackupRecord, RemoteMetadata, SyncError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://xyzcompany.supabase.co`.
    pub url: String,
    pub anon_key: String,
    /// Row owner; the setup SQL scopes policies to this id.
    pub user_id: String,
    #[serde(default)]
    pub last_connection_success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_passphrase: Option<String>,
}

impl SupabaseConfig {
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.url.trim().is_empty() {
            missing.push("url");
        }
        if self.anon_key.trim().is_empty() {
            missing.push("anonKey");
        }
        if self.user_id.trim().is_empty() {
            missing.push("userId");
        }
        missing
    }
}

#[derive(Debug, Deserialize)]
struct SyncRow {
    #[serde(default)]
    payload: Option<String>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct BackupRow {
    key: String,
    timestamp: i64,
}

pub struct SupabaseStore {
    client: Client,
    rest_url: String,
    anon_key: String,
    user_id: String,
}

impl SupabaseStore {
    pub fn new(config: &SupabaseConfig) -> Result<Self, SyncError> {
        let client = Client::builder().build().map_err(SyncError::remote)?;
        Ok(Self {
            client,
            rest_url: format!("{}/rest/v1", config.url.trim_end_matches('/')),
            anon_key: config.anon_key.clone(),
            user_id: config.user_id.clone(),
        })
    }

    fn table_url(&self, table: &str, filters: &str) -> String {
        format!("{}/{}?{}", self.rest_url, table, filters)
    }

    fn user_filter(&self) -> String {
        format!("user_id=eq.{}", urlencoding::encode(&self.user_id))
    }

    async fn select<T: for<'de> Deserialize<'de>>(&self, table: &str, filters: &str) -> Result<Vec<T>, SyncError> {
        let response = self
            .client
            .get(self.table_url(table, filters))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.anon_key))
            .send()
            .await
            .map_err(|e| SyncError::Remote(format!("Supabase request failed: {}", e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(SyncError::Remote(format!(
                "table {} not found; run the setup SQL script",
                table
            )));
        }
        if !response.status().is_success() {
            return Err(SyncError::Remote(format!(
                "Supabase select failed ({})",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| SyncError::Remote(format!("failed to parse response: {}", e)))
    }

    async fn upsert(&self, table: &str, filters: &str, body: serde_json::Value) -> Result<(), SyncError> {
        let response = self
            .client
            .post(self.table_url(table, filters))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.anon_key))
            .header("Prefer", "resolution=merge-duplicates")
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::Remote(format!("Supabase request failed: {}", e)))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(SyncError::Remote(format!(
                "Supabase upsert failed ({})",
                response.status()
            )))
        }
    }
}

#[async_trait::async_trait]
impl RemoteStore for SupabaseStore {
    fn name(&self) -> &'static str {
        "supabase"
    }

    async fn test_connection(&self) -> Result<bool, SyncError> {
        let response = self
            .client
            .get(self.table_url("sync_data", "select=user_id&limit=1"))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.anon_key))
            .send()
            .await
            .map_err(|e| SyncError::Remote(format!("Supabase request failed: {}", e)))?;
        Ok(response.status().is_success())
    }

    async fn read_metadata(&self) -> Result<Option<RemoteMetadata>, SyncError> {
        let filters = format!("{}&select=metadata&limit=1", self.user_filter());
        let rows: Vec<SyncRow> = self.select("sync_data", &filters).await?;
        let Some(value) = rows.into_iter().next().and_then(|r| r.metadata) else {
            return Ok(None);
        };
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| SyncError::Remote(format!("invalid remote metadata: {}", e)))
    }

    async fn read_payload(&self) -> Result<Option<String>, SyncError> {
        let filters = format!("{}&select=payload&limit=1", self.user_filter());
        let rows: Vec<SyncRow> = self.select("sync_data", &filters).await?;
        Ok(rows.into_iter().next().and_then(|r| r.payload))
    }

    async fn write_payload(&self, payload: &str, metadata: &RemoteMetadata) -> Result<(), SyncError> {
        let metadata_value =
            serde_json::to_value(metadata).map_err(|e| SyncError::Payload(format!("serialize metadata: {}", e)))?;
        self.upsert(
            "sync_data",
            "on_conflict=user_id",
            json!([{
                "user_id": self.user_id,
                "payload": payload,
                "metadata": metadata_value,
                "updated_at": metadata.last_modified,
            }]),
        )
        .await
    }

    async fn snapshot_before_overwrite(&self, timestamp: i64) -> Result<Option<String>, SyncError> {
        let Some(current) = self.read_payload().await? else {
            return Ok(None);
        };
        let name = snapshot_name(timestamp);
        self.upsert(
            "sync_backups",
            "on_conflict=user_id,key",
            json!([{
                "user_id": self.user_id,
                "key": name,
                "timestamp": timestamp,
                "payload": current,
            }]),
        )
        .await?;
        Ok(Some(name))
    }

    async fn list_snapshots(&self) -> Result<Vec<BackupRecord>, SyncError> {
        let filters = format!("{}&select=key,timestamp&order=timestamp.desc", self.user_filter());
        let rows: Vec<BackupRow> = self.select("sync_backups", &filters).await?;
        Ok(rows
            .into_iter()
            .map(|r| BackupRecord {
                key: r.key,
                timestamp: r.timestamp,
            })
            .collect())
    }

    async fn read_snapshot(&self, key: &str) -> Result<String, SyncError> {
        let filters = format!(
            "{}&key=eq.{}&select=payload&limit=1",
            self.user_filter(),
            urlencoding::encode(key)
        );
        let rows: Vec<SyncRow> = self.select("sync_backups", &filters).await?;
        rows.into_iter()
            .next()
            .and_then(|r| r.payload)
            .ok_or_else(|| SyncError::Remote(format!("backup {} not found", key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_url_is_normalized() {
        let store = SupabaseStore::new(&SupabaseConfig {
            url: "https://xyz.supabase.co/".into(),
            anon_key: "anon".into(),
            user_id: "user@example.com".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(store.rest_url, "https://xyz.supabase.co/rest/v1");
        assert_eq!(store.user_filter(), "user_id=eq.user%40example.com");
        assert_eq!(
            store.table_url("sync_data", "select=payload"),
            "https://xyz.supabase.co/rest/v1/sync_data?select=payload"
        );
    }

    #[test]
    fn missing_fields_cover_all_inputs() {
        let config = SupabaseConfig::default();
        assert_eq!(config.missing_fields(), vec!["url", "anonKey", "userId"]);
    }
}
