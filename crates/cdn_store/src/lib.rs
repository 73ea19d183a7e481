/*!
# CDN Store

Object storage client for the product image bucket. The marketplace CDN
exposes an S3-like listing API (paginated via continuation tokens) plus
per-object byte fetches and presigned URLs.

Two implementations are provided:

- [`CdnClient`]: HTTP client against the marketplace CDN API.
- [`MemoryObjectStore`]: in-process store for tests and local development.
*/

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result type for object store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Object store specific errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Unexpected response ({status}): {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("Presigned URLs are not supported by this backend")]
    PresignUnsupported,
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Request(err.to_string())
    }
}

/// A single object in a bucket listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// One page of a bucket listing. `next_token` is `Some` while the listing
/// is truncated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectPage {
    pub objects: Vec<ObjectEntry>,
    pub next_token: Option<String>,
}

/// Capability contract for the image bucket: list, fetch, presign.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List objects under `prefix`, resuming from `continuation` when the
    /// previous page was truncated.
    async fn list_objects(
        &self,
        prefix: Option<&str>,
        continuation: Option<&str>,
    ) -> StoreResult<ObjectPage>;

    /// Fetch the raw bytes of a single object.
    async fn get_object(&self, key: &str) -> StoreResult<Bytes>;

    /// Produce a URL under which the object can be fetched without
    /// credentials for `ttl_secs` seconds.
    async fn presigned_url(&self, key: &str, ttl_secs: u64) -> StoreResult<String>;
}

/// Configuration for [`CdnClient`].
#[derive(Debug, Clone)]
pub struct CdnConfig {
    pub api_url: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub timeout_seconds: u64,
    pub page_size: u32,
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:9000".to_string(),
            bucket: "product-images".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            timeout_seconds: 30,
            page_size: 1000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    objects: Vec<ObjectEntry>,
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    next_continuation_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct PresignRequest<'a> {
    key: &'a str,
    ttl_seconds: u64,
}

#[derive(Debug, Deserialize)]
struct PresignResponse {
    url: String,
}

/// HTTP client for the marketplace CDN API.
///
/// Authentication is key-pair based via `X-Access-Key` / `X-Secret-Key`
/// headers on every request.
pub struct CdnClient {
    client: reqwest::Client,
    config: CdnConfig,
}

impl CdnClient {
    pub fn new(config: CdnConfig) -> StoreResult<Self> {
        if config.access_key.is_empty() || config.secret_key.is_empty() {
            tracing::warn!("CDN credentials not configured, requests may be rejected");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        tracing::info!(api_url = %config.api_url, bucket = %config.bucket, "CDN client initialized");
        Ok(Self { client, config })
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/buckets/{}/objects/{}",
            self.config.api_url, self.config.bucket, key
        )
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("X-Access-Key", &self.config.access_key)
            .header("X-Secret-Key", &self.config.secret_key)
    }
}

#[async_trait]
impl ObjectStore for CdnClient {
    async fn list_objects(
        &self,
        prefix: Option<&str>,
        continuation: Option<&str>,
    ) -> StoreResult<ObjectPage> {
        let url = format!(
            "{}/buckets/{}/objects",
            self.config.api_url, self.config.bucket
        );

        let mut req = self
            .auth(self.client.get(&url))
            .query(&[("max_keys", self.config.page_size.to_string())]);
        if let Some(prefix) = prefix {
            req = req.query(&[("prefix", prefix)]);
        }
        if let Some(token) = continuation {
            req = req.query(&[("continuation_token", token)]);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        let listing: ListResponse = response.json().await?;
        let next_token = if listing.is_truncated {
            listing.next_continuation_token
        } else {
            None
        };

        tracing::debug!(
            count = listing.objects.len(),
            truncated = next_token.is_some(),
            "listed objects"
        );

        Ok(ObjectPage {
            objects: listing.objects,
            next_token,
        })
    }

    async fn get_object(&self, key: &str) -> StoreResult<Bytes> {
        let response = self.auth(self.client.get(self.object_url(key))).send().await?;
        let status = response.status();

        if status.as_u16() == 404 {
            return Err(StoreError::NotFound(key.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.bytes().await?)
    }

    async fn presigned_url(&self, key: &str, ttl_secs: u64) -> StoreResult<String> {
        let url = format!(
            "{}/buckets/{}/presign",
            self.config.api_url, self.config.bucket
        );
        let response = self
            .auth(self.client.post(&url))
            .json(&PresignRequest {
                key,
                ttl_seconds: ttl_secs,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        let presigned: PresignResponse = response.json().await?;
        Ok(presigned.url)
    }
}

/// In-memory object store for tests and local development.
///
/// Keys are kept in a `BTreeMap` so listings are stable and the
/// continuation token can simply be the last key of the previous page.
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, Bytes>>,
    page_size: usize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::with_page_size(1000)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            page_size: page_size.max(1),
        }
    }

    pub fn put_object(&self, key: &str, bytes: impl Into<Bytes>) {
        self.objects
            .write()
            .expect("object map poisoned")
            .insert(key.to_string(), bytes.into());
    }

    pub fn remove_object(&self, key: &str) {
        self.objects
            .write()
            .expect("object map poisoned")
            .remove(key);
    }

    pub fn len(&self) -> usize {
        self.objects.read().expect("object map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list_objects(
        &self,
        prefix: Option<&str>,
        continuation: Option<&str>,
    ) -> StoreResult<ObjectPage> {
        let objects = self.objects.read().expect("object map poisoned");

        let mut page = Vec::with_capacity(self.page_size);
        let mut next_token = None;

        for (key, bytes) in objects.iter() {
            if let Some(prefix) = prefix {
                if !key.starts_with(prefix) {
                    continue;
                }
            }
            if let Some(after) = continuation {
                if key.as_str() <= after {
                    continue;
                }
            }
            if page.len() == self.page_size {
                next_token = page.last().map(|entry: &ObjectEntry| entry.key.clone());
                break;
            }
            page.push(ObjectEntry {
                key: key.clone(),
                size: bytes.len() as u64,
                last_modified: None,
            });
        }

        Ok(ObjectPage {
            objects: page,
            next_token,
        })
    }

    async fn get_object(&self, key: &str) -> StoreResult<Bytes> {
        self.objects
            .read()
            .expect("object map poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn presigned_url(&self, key: &str, _ttl_secs: u64) -> StoreResult<String> {
        let objects = self.objects.read().expect("object map poisoned");
        if !objects.contains_key(key) {
            return Err(StoreError::NotFound(key.to_string()));
        }
        Ok(format!("memory://{}", key))
    }
}
