use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;

use crate::config::StorageConfig;
use crate::transport::truncate_text;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub url: String,
}

/// Durable object storage. Every call gets a fresh unique path, so
/// implementations need no deduplication.
pub trait ObjectStore: Send + Sync {
    fn put(&self, path: &str, bytes: Vec<u8>, options: &PutOptions) -> Result<StoredObject>;
}

/// Builds the store selected by `config`; `None` when storage is not configured.
pub fn store_from_config(
    config: &StorageConfig,
    timeout: Duration,
) -> Result<Option<Arc<dyn ObjectStore>>> {
    Ok(match config {
        StorageConfig::NotConfigured => None,
        StorageConfig::Blob { endpoint, token } => {
            Some(Arc::new(HttpBlobStore::new(endpoint, token, timeout)?))
        }
        StorageConfig::LocalDir { root, public_base } => {
            Some(Arc::new(LocalDirStore::new(root.clone(), public_base)))
        }
    })
}

/// Writes objects below a directory and serves them from `public_base`.
#[derive(Debug, Clone)]
pub struct LocalDirStore {
    root: PathBuf,
    public_base: String,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>, public_base: &str) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.trim_end_matches('/').to_string(),
        }
    }
}

impl ObjectStore for LocalDirStore {
    fn put(&self, path: &str, bytes: Vec<u8>, _options: &PutOptions) -> Result<StoredObject> {
        let relative = path.trim_start_matches('/');
        if relative.split('/').any(|segment| segment == "..") {
            bail!("object path escapes store root: {relative}");
        }
        let target = self.root.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&target, bytes).with_context(|| format!("failed to write {}", target.display()))?;
        Ok(StoredObject {
            url: format!("{}/{relative}", self.public_base),
        })
    }
}

/// Blob store speaking the `PUT /{pathname}` upload API with a bearer token.
pub struct HttpBlobStore {
    endpoint: String,
    token: String,
    http: HttpClient,
}

impl HttpBlobStore {
    pub fn new(endpoint: &str, token: &str, timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("failed to build blob store client")?;
        Ok(Self {
            endpoint: endpoint.trim().trim_end_matches('/').to_string(),
            token: token.to_string(),
            http,
        })
    }
}

impl ObjectStore for HttpBlobStore {
    fn put(&self, path: &str, bytes: Vec<u8>, options: &PutOptions) -> Result<StoredObject> {
        let url = format!("{}/{}", self.endpoint, path.trim_start_matches('/'));
        let response = self
            .http
            .put(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(CONTENT_TYPE, options.content_type.as_str())
            .header("x-content-type", options.content_type.as_str())
            .header("x-add-random-suffix", "0")
            .body(bytes)
            .send()
            .with_context(|| format!("blob upload request failed ({url})"))?;
        let status = response.status();
        let body = response.text().context("blob upload response read failed")?;
        if !status.is_success() {
            bail!(
                "blob upload failed ({}): {}",
                status.as_u16(),
                truncate_text(&body, 256)
            );
        }
        let parsed: Value =
            serde_json::from_str(&body).context("blob store returned invalid JSON payload")?;
        let stored = parsed
            .get("url")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| anyhow::anyhow!("blob store response missing url"))?;
        Ok(StoredObject {
            url: stored.to_string(),
        })
    }
}
