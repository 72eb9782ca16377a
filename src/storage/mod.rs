//! Object storage holding raw uploads.

use crate::config::{Config, ObjectStoreLocation};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc2822;
use time::macros::format_description;

/// Errors surfaced while fetching an object.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    /// No object under that key.
    #[error("object {bucket}/{key} not found")]
    NotFound {
        /// Bucket searched.
        bucket: String,
        /// Missing key.
        key: String,
    },
    /// The key would escape the bucket.
    #[error("invalid object key '{0}'")]
    InvalidKey(String),
    /// Filesystem access failed.
    #[error("failed to read object: {0}")]
    Io(#[from] std::io::Error),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Backend responded with an unexpected status code.
    #[error("Unexpected object store response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the store.
        status: StatusCode,
        /// Body of the failing response.
        body: String,
    },
}

/// Raw bytes of an uploaded file and when it last changed.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    /// File contents.
    pub bytes: Vec<u8>,
    /// Last modification time, UTC.
    pub last_modified: OffsetDateTime,
}

impl StoredObject {
    /// `last_modified` rendered as `YYYY-MM-DD HH:MM:SS.ffffff`.
    pub fn last_update_date(&self) -> String {
        format_last_modified(self.last_modified)
    }
}

/// Read-only access to uploads.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one object.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject, ObjectStoreError>;
}

/// Build the configured backend.
pub fn object_store_from_config(config: &Config) -> Result<Arc<dyn ObjectStore>, ObjectStoreError> {
    Ok(match &config.object_store {
        ObjectStoreLocation::Filesystem(root) => Arc::new(FsObjectStore::new(root.clone())),
        ObjectStoreLocation::Http(base_url) => Arc::new(HttpObjectStore::new(base_url)?),
    })
}

/// Format a timestamp with microsecond precision.
pub fn format_last_modified(timestamp: OffsetDateTime) -> String {
    timestamp
        .to_offset(time::UtcOffset::UTC)
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6]"
        ))
        .unwrap_or_else(|_| "1970-01-01 00:00:00.000000".to_string())
}

/// Objects laid out as `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Serve objects from `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, bucket: &str, key: &str) -> Result<PathBuf, ObjectStoreError> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));
        if key.is_empty() || escapes || bucket.contains(['/', '\\']) {
            return Err(ObjectStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(bucket).join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject, ObjectStoreError> {
        let path = self.resolve(bucket, key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(ObjectStoreError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                });
            }
            Err(error) => return Err(error.into()),
        };
        let modified = tokio::fs::metadata(&path).await?.modified()?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Object read from filesystem");

        Ok(StoredObject {
            bytes,
            last_modified: OffsetDateTime::from(modified),
        })
    }
}

/// Objects served over HTTP at `{base}/{bucket}/{key}`.
pub struct HttpObjectStore {
    client: Client,
    base_url: String,
}

impl HttpObjectStore {
    /// Serve objects from `base_url`.
    pub fn new(base_url: &str) -> Result<Self, ObjectStoreError> {
        let client = Client::builder().user_agent("docstage/0.1").build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject, ObjectStoreError> {
        let url = format!("{}/{bucket}/{}", self.base_url, key.trim_start_matches('/'));
        let response = self.client.get(&url).send().await?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(ObjectStoreError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                });
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                return Err(ObjectStoreError::UnexpectedStatus { status, body });
            }
        }

        let last_modified = response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_http_date)
            .unwrap_or_else(|| {
                tracing::debug!(url = %url, "Missing Last-Modified header; using current time");
                OffsetDateTime::now_utc()
            });
        let bytes = response.bytes().await?.to_vec();

        Ok(StoredObject {
            bytes,
            last_modified,
        })
    }
}

fn parse_http_date(value: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc2822).ok().or_else(|| {
        let numeric = value.trim().replace(" GMT", " +0000").replace(" UTC", " +0000");
        OffsetDateTime::parse(&numeric, &Rfc2822).ok()
    })
}
