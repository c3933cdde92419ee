// WebDAV remote store: plain PUT/GET for the payload, PROPFIND for listing,
// MKCOL to create the sync directory layout. Works against Nextcloud/ownCloud
// style endpoints as well as bare DAV servers.

use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};

use super::remote::{snapshot_name, snapshot_timestamp, RemoteStore, METADATA_NAME, PAYLOAD_NAME};
use super::{BackupRecord, RemoteMetadata, SyncError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebDavConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    /// Directory below the DAV root holding the sync files.
    #[serde(default = "default_directory")]
    pub directory: String,
    #[serde(default)]
    pub last_connection_success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_passphrase: Option<String>,
}

fn default_directory() -> String {
    "BrewGuide".to_string()
}

impl WebDavConfig {
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.url.trim().is_empty() {
            missing.push("url");
        }
        if self.username.trim().is_empty() {
            missing.push("username");
        }
        if self.password.trim().is_empty() {
            missing.push("password");
        }
        missing
    }
}

pub struct WebDavStore {
    client: Client,
    dir_url: String,
    username: String,
    password: String,
}

impl WebDavStore {
    pub fn new(config: &WebDavConfig) -> Result<Self, SyncError> {
        let client = Client::builder()
            .danger_accept_invalid_certs(true) // For self-hosted servers with self-signed certs
            .build()
            .map_err(SyncError::remote)?;

        let base = config.url.trim_end_matches('/');
        let directory = config.directory.trim_matches('/');
        let dir_url = if directory.is_empty() {
            base.to_string()
        } else {
            let encoded: Vec<String> = directory
                .split('/')
                .map(|seg| urlencoding::encode(seg).into_owned())
                .collect();
            format!("{}/{}", base, encoded.join("/"))
        };

        Ok(Self {
            client,
            dir_url,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn file_url(&self, name: &str) -> String {
        format!("{}/{}", self.dir_url, name)
    }

    fn backups_url(&self) -> String {
        format!("{}/backups", self.dir_url)
    }

    async fn propfind(&self, url: &str, depth: &str) -> Result<reqwest::Response, SyncError> {
        self.client
            .request(Method::from_bytes(b"PROPFIND").unwrap(), url)
            .basic_auth(&self.username, Some(&self.password))
            .header("Depth", depth)
            .send()
            .await
            .map_err(|e| SyncError::Remote(format!("WebDAV request failed: {}", e)))
    }

    async fn mkcol(&self, url: &str) -> Result<(), SyncError> {
        let response = self
            .client
            .request(Method::from_bytes(b"MKCOL").unwrap(), url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| SyncError::Remote(format!("WebDAV request failed: {}", e)))?;
        // 405 means the collection already exists.
        if response.status().is_success() || response.status() == StatusCode::METHOD_NOT_ALLOWED {
            Ok(())
        } else {
            Err(SyncError::Remote(format!(
                "failed to create directory ({})",
                response.status()
            )))
        }
    }

    async fn get(&self, url: &str) -> Result<Option<String>, SyncError> {
        let response = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| SyncError::Remote(format!("WebDAV request failed: {}", e)))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(SyncError::Remote(format!("WebDAV GET failed ({})", response.status())));
        }
        response
            .text()
            .await
            .map(Some)
            .map_err(|e| SyncError::Remote(format!("failed to read response: {}", e)))
    }

    async fn put(&self, url: &str, body: String) -> Result<(), SyncError> {
        let response = self
            .client
            .put(url)
            .basic_auth(&self.username, Some(&self.password))
            .header("Content-Type", "application/json; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(|e| SyncError::Remote(format!("WebDAV request failed: {}", e)))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(SyncError::Remote(format!("WebDAV PUT failed ({})", response.status())))
        }
    }
}

#[async_trait::async_trait]
impl RemoteStore for WebDavStore {
    fn name(&self) -> &'static str {
        "webdav"
    }

    async fn test_connection(&self) -> Result<bool, SyncError> {
        let response = self.propfind(&self.dir_url, "0").await?;
        if response.status() == StatusCode::NOT_FOUND {
            // First run: create the sync directory and verify again.
            self.mkcol(&self.dir_url).await?;
            let retry = self.propfind(&self.dir_url, "0").await?;
            return Ok(retry.status().is_success() || retry.status() == StatusCode::MULTI_STATUS);
        }
        Ok(response.status().is_success() || response.status() == StatusCode::MULTI_STATUS)
    }

    async fn read_metadata(&self) -> Result<Option<RemoteMetadata>, SyncError> {
        match self.get(&self.file_url(METADATA_NAME)).await? {
            None => Ok(None),
            Some(body) => serde_json::from_str(&body)
                .map(Some)
                .map_err(|e| SyncError::Remote(format!("invalid remote metadata: {}", e))),
        }
    }

    async fn read_payload(&self) -> Result<Option<String>, SyncError> {
        self.get(&self.file_url(PAYLOAD_NAME)).await
    }

    async fn write_payload(&self, payload: &str, metadata: &RemoteMetadata) -> Result<(), SyncError> {
        self.put(&self.file_url(PAYLOAD_NAME), payload.to_string()).await?;
        let meta_json =
            serde_json::to_string(metadata).map_err(|e| SyncError::Payload(format!("serialize metadata: {}", e)))?;
        self.put(&self.file_url(METADATA_NAME), meta_json).await
    }

    async fn snapshot_before_overwrite(&self, timestamp: i64) -> Result<Option<String>, SyncError> {
        let Some(current) = self.read_payload().await? else {
            return Ok(None);
        };
        self.mkcol(&self.backups_url()).await?;
        let name = snapshot_name(timestamp);
        self.put(&format!("{}/{}", self.backups_url(), name), current).await?;
        Ok(Some(name))
    }

    async fn list_snapshots(&self) -> Result<Vec<BackupRecord>, SyncError> {
        let response = self.propfind(&self.backups_url(), "1").await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(vec![]);
        }
        if !response.status().is_success() && response.status() != StatusCode::MULTI_STATUS {
            return Err(SyncError::Remote(format!(
                "WebDAV PROPFIND failed ({})",
                response.status()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::Remote(format!("failed to read response: {}", e)))?;

        let mut records: Vec<BackupRecord> = parse_multistatus_hrefs(&body)?
            .into_iter()
            .filter_map(|href| {
                let name = href.trim_end_matches('/').rsplit('/').next()?.to_string();
                let timestamp = snapshot_timestamp(&name)?;
                Some(BackupRecord { key: name, timestamp })
            })
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    async fn read_snapshot(&self, key: &str) -> Result<String, SyncError> {
        self.get(&format!("{}/{}", self.backups_url(), key))
            .await?
            .ok_or_else(|| SyncError::Remote(format!("backup {} not found", key)))
    }
}

/// Extracts every `<d:href>` text value from a multistatus response.
fn parse_multistatus_hrefs(xml: &str) -> Result<Vec<String>, SyncError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    let mut hrefs = Vec::new();
    let mut in_href = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"href" => in_href = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == b"href" => in_href = false,
            Ok(Event::Text(t)) if in_href => {
                let text = t
                    .unescape()
                    .map_err(|e| SyncError::Remote(format!("invalid multistatus XML: {}", e)))?;
                hrefs.push(text.into_owned());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SyncError::Remote(format!("invalid multistatus XML: {}", e))),
            _ => {}
        }
    }
    Ok(hrefs)
}
