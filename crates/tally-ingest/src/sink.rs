//! Object-store sinks for NDJSON batches

use crate::error::{IngestError, Result};
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::env;
use std::sync::{Mutex, PoisonError};
use tally_common::checksum::sha256_hex;
use tracing::{debug, info, instrument};

/// Content type of every object written by the orchestrator
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Result of a completed write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    /// SHA-256 hex digest of the written bytes
    pub checksum: String,
}

/// Whole-object writes to a bucket
#[async_trait]
pub trait ObjectSink: Send + Sync {
    async fn write(
        &self,
        bucket: &str,
        key: &str,
        content: Vec<u8>,
        content_type: &str,
    ) -> Result<UploadResult>;
}

// ============================================================================
// S3
// ============================================================================

/// S3-compatible storage settings
#[derive(Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// Custom endpoint (MinIO, GCS interop); AWS when unset
    pub endpoint: Option<String>,
    pub region: String,
    /// Static credentials; the default AWS provider chain when unset
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("path_style", &self.path_style)
            .finish()
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: "us-east-1".to_string(),
            access_key: None,
            secret_key: None,
            path_style: false,
        }
    }
}

impl S3Config {
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .ok(),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .ok(),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        }
    }

    pub fn for_minio(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
            path_style: true,
            ..Self::default()
        }
    }
}

/// [`ObjectSink`] over `aws-sdk-s3`
#[derive(Clone)]
pub struct S3Sink {
    client: Client,
}

impl S3Sink {
    pub async fn new(config: S3Config) -> Self {
        debug!(config = ?config, "Initializing S3 sink");

        let mut builder = match (&config.access_key, &config.secret_key) {
            (Some(access), Some(secret)) => aws_sdk_s3::Config::builder()
                .behavior_version_latest()
                .credentials_provider(Credentials::new(access, secret, None, None, "tally-static")),
            _ => {
                let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            },
        };

        builder = builder
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        info!(region = %config.region, endpoint = ?config.endpoint, "S3 sink initialized");
        Self {
            client: Client::from_conf(builder.build()),
        }
    }
}

#[async_trait]
impl ObjectSink for S3Sink {
    #[instrument(skip(self, content), fields(bytes = content.len()))]
    async fn write(
        &self,
        bucket: &str,
        key: &str,
        content: Vec<u8>,
        content_type: &str,
    ) -> Result<UploadResult> {
        let checksum = sha256_hex(&content);
        let size = content.len() as u64;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(content))
            .send()
            .await
            .map_err(|e| {
                IngestError::sink(format!(
                    "put s3://{}/{} failed: {}",
                    bucket,
                    key,
                    aws_sdk_s3::error::DisplayErrorContext(&e)
                ))
            })?;

        info!("Uploaded s3://{}/{}", bucket, key);
        Ok(UploadResult {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size,
            checksum,
        })
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// An object held by [`MemorySink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub content: Vec<u8>,
    pub content_type: String,
}

impl StoredObject {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

/// Keeps objects in memory; optionally fails writes to chosen keys
#[derive(Debug, Default)]
pub struct MemorySink {
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    writes: Mutex<Vec<(String, String)>>,
    failing_keys: HashSet<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes to `key` fail with a sink error
    pub fn failing_on(mut self, key: impl Into<String>) -> Self {
        self.failing_keys.insert(key.into());
        self
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// `(bucket, key)` of every successful write, in order
    pub fn writes(&self) -> Vec<(String, String)> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ObjectSink for MemorySink {
    async fn write(
        &self,
        bucket: &str,
        key: &str,
        content: Vec<u8>,
        content_type: &str,
    ) -> Result<UploadResult> {
        if self.failing_keys.contains(key) {
            return Err(IngestError::sink(format!("write to {}/{} rejected", bucket, key)));
        }

        let result = UploadResult {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: content.len() as u64,
            checksum: sha256_hex(&content),
        };

        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                (bucket.to_string(), key.to_string()),
                StoredObject {
                    content,
                    content_type: content_type.to_string(),
                },
            );
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((bucket.to_string(), key.to_string()));

        Ok(result)
    }
}
