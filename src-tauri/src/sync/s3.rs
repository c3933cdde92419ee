// S3 remote store. Talks to AWS or any S3-compatible endpoint (MinIO, R2)
// with path-style URLs and hand-rolled SigV4 request signing; backups are
// server-side CopyObject snapshots taken before each upload.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::remote::{snapshot_name, snapshot_timestamp, RemoteStore, METADATA_NAME, PAYLOAD_NAME};
use super::{BackupRecord, RemoteMetadata, SyncError};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Config {
    /// Custom endpoint for S3-compatible services. Empty means AWS,
    /// derived from the region.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_region")]
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    /// Optional key prefix inside the bucket.
    #[serde(default)]
    pub path_prefix: String,
    #[serde(default)]
    pub last_connection_success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_passphrase: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl S3Config {
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.access_key_id.trim().is_empty() {
            missing.push("accessKeyId");
        }
        if self.secret_access_key.trim().is_empty() {
            missing.push("secretAccessKey");
        }
        if self.bucket_name.trim().is_empty() {
            missing.push("bucketName");
        }
        missing
    }
}

pub struct S3Store {
    client: Client,
    endpoint: String,
    host: String,
    region: String,
    access_key_id: String,
    secret_access_key: String,
    bucket: String,
    prefix: String,
}

impl S3Store {
    pub fn new(config: &S3Config) -> Result<Self, SyncError> {
        let region = if config.region.trim().is_empty() {
            default_region()
        } else {
            config.region.trim().to_string()
        };
        let endpoint = if config.endpoint.trim().is_empty() {
            format!("https://s3.{}.amazonaws.com", region)
        } else {
            config.endpoint.trim().trim_end_matches('/').to_string()
        };
        let host = endpoint
            .strip_prefix("https://")
            .or_else(|| endpoint.strip_prefix("http://"))
            .ok_or_else(|| SyncError::Remote("endpoint must start with http:// or https://".to_string()))?
            .to_string();

        let prefix = config.path_prefix.trim_matches('/');
        let prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix)
        };

        let client = Client::builder().build().map_err(SyncError::remote)?;

        Ok(Self {
            client,
            endpoint,
            host,
            region,
            access_key_id: config.access_key_id.clone(),
            secret_access_key: config.secret_access_key.clone(),
            bucket: config.bucket_name.clone(),
            prefix,
        })
    }

    fn object_key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn backup_key(&self, name: &str) -> String {
        format!("{}backups/{}", self.prefix, name)
    }

    fn canonical_uri(&self, key: &str) -> String {
        if key.is_empty() {
            format!("/{}", self.bucket)
        } else {
            format!("/{}/{}", self.bucket, encode_key(key))
        }
    }

    async fn request(
        &self,
        method: Method,
        key: &str,
        query: &[(&str, &str)],
        body: Option<String>,
        extra_headers: &[(&str, String)],
    ) -> Result<reqwest::Response, SyncError> {
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = sha256_hex(body.as_deref().unwrap_or("").as_bytes());

        let canonical_uri = self.canonical_uri(key);
        let canonical_query = canonical_query_string(query);

        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        headers.insert("host".to_string(), self.host.clone());
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
        headers.insert("x-amz-date".to_string(), amz_date.clone());
        for (name, value) in extra_headers {
            headers.insert(name.to_lowercase(), value.clone());
        }

        let authorization = self.authorization_header(
            method.as_str(),
            &canonical_uri,
            &canonical_query,
            &headers,
            &payload_hash,
            now,
        );

        let url = if canonical_query.is_empty() {
            format!("{}{}", self.endpoint, canonical_uri)
        } else {
            format!("{}{}?{}", self.endpoint, canonical_uri, canonical_query)
        };

        let mut request = self
            .client
            .request(method, &url)
            .header("x-amz-date", &amz_date)
            .header("x-amz-content-sha256", &payload_hash)
            .header("Authorization", authorization);
        for (name, value) in extra_headers {
            request = request.header(*name, value);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        request
            .send()
            .await
            .map_err(|e| SyncError::Remote(format!("S3 request failed: {}", e)))
    }

    fn authorization_header(
        &self,
        method: &str,
        canonical_uri: &str,
        canonical_query: &str,
        headers: &BTreeMap<String, String>,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> String {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();

        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
            .collect();
        let signed_headers: Vec<&str> = headers.keys().map(String::as_str).collect();
        let signed_headers = signed_headers.join(";");

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, canonical_uri, canonical_query, canonical_headers, signed_headers, payload_hash
        );

        let scope = format!("{}/{}/s3/aws4_request", date, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            sha256_hex(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(&self.secret_access_key, &date, &self.region, "s3");
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.access_key_id, scope, signed_headers, signature
        )
    }

    async fn get_object(&self, key: &str) -> Result<Option<String>, SyncError> {
        let response = self.request(Method::GET, key, &[], None, &[]).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(SyncError::Remote(format!("S3 GET failed ({})", response.status())));
        }
        response
            .text()
            .await
            .map(Some)
            .map_err(|e| SyncError::Remote(format!("failed to read response: {}", e)))
    }

    async fn put_object(&self, key: &str, body: String) -> Result<(), SyncError> {
        let response = self.request(Method::PUT, key, &[], Some(body), &[]).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(SyncError::Remote(format!("S3 PUT failed ({})", response.status())))
        }
    }
}

#[async_trait::async_trait]
impl RemoteStore for S3Store {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn test_connection(&self) -> Result<bool, SyncError> {
        let response = self
            .request(
                Method::GET,
                "",
                &[("list-type", "2"), ("max-keys", "1"), ("prefix", &self.prefix)],
                None,
                &[],
            )
            .await?;
        Ok(response.status().is_success())
    }

    async fn read_metadata(&self) -> Result<Option<RemoteMetadata>, SyncError> {
        match self.get_object(&self.object_key(METADATA_NAME)).await? {
            None => Ok(None),
            Some(body) => serde_json::from_str(&body)
                .map(Some)
                .map_err(|e| SyncError::Remote(format!("invalid remote metadata: {}", e))),
        }
    }

    async fn read_payload(&self) -> Result<Option<String>, SyncError> {
        self.get_object(&self.object_key(PAYLOAD_NAME)).await
    }

    async fn write_payload(&self, payload: &str, metadata: &RemoteMetadata) -> Result<(), SyncError> {
        self.put_object(&self.object_key(PAYLOAD_NAME), payload.to_string()).await?;
        let meta_json =
            serde_json::to_string(metadata).map_err(|e| SyncError::Payload(format!("serialize metadata: {}", e)))?;
        self.put_object(&self.object_key(METADATA_NAME), meta_json).await
    }

    async fn snapshot_before_overwrite(&self, timestamp: i64) -> Result<Option<String>, SyncError> {
        let name = snapshot_name(timestamp);
        let source = format!("/{}/{}", self.bucket, encode_key(&self.object_key(PAYLOAD_NAME)));
        let response = self
            .request(
                Method::PUT,
                &self.backup_key(&name),
                &[],
                None,
                &[("x-amz-copy-source", source)],
            )
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            // Nothing on the remote yet; first upload needs no snapshot.
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(SyncError::Remote(format!(
                "S3 CopyObject failed ({})",
                response.status()
            )));
        }
        Ok(Some(name))
    }

    async fn list_snapshots(&self) -> Result<Vec<BackupRecord>, SyncError> {
        let prefix = format!("{}backups/", self.prefix);
        let response = self
            .request(Method::GET, "", &[("list-type", "2"), ("prefix", &prefix)], None, &[])
            .await?;
        if !response.status().is_success() {
            return Err(SyncError::Remote(format!("S3 list failed ({})", response.status())));
        }
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::Remote(format!("failed to read response: {}", e)))?;

        let mut records: Vec<BackupRecord> = parse_list_keys(&body)?
            .into_iter()
            .filter_map(|key| {
                let name = key.rsplit('/').next()?.to_string();
                let timestamp = snapshot_timestamp(&name)?;
                Some(BackupRecord { key: name, timestamp })
            })
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    async fn read_snapshot(&self, key: &str) -> Result<String, SyncError> {
        self.get_object(&self.backup_key(key))
            .await?
            .ok_or_else(|| SyncError::Remote(format!("backup {} not found", key)))
    }
}

/// AWS-style URI encoding of an object key: each path segment percent-encoded,
/// slashes preserved.
fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|seg| urlencoding::encode(seg).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn canonical_query_string(query: &[(&str, &str)]) -> String {
    let mut pairs: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| (urlencoding::encode(k).into_owned(), urlencoding::encode(v).into_owned()))
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn derive_signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// Extracts `<Key>` values from a ListObjectsV2 response.
fn parse_list_keys(xml: &str) -> Result<Vec<String>, SyncError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    let mut keys = Vec::new();
    let mut in_key = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"Key" => in_key = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == b"Key" => in_key = false,
            Ok(Event::Text(t)) if in_key => {
                let text = t
                    .unescape()
                    .map_err(|e| SyncError::Remote(format!("invalid list response: {}", e)))?;
                keys.push(text.into_owned());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SyncError::Remote(format!("invalid list response: {}", e))),
            _ => {}
        }
    }
    Ok(keys)
}
