//! Object storage for remote job inputs
//!
//! Local audio is uploaded to an S3-compatible bucket and handed to the
//! remote worker as a presigned GET URL. Every successful upload must be
//! paired with exactly one [`ObjectUploader::delete`] once the job is done.

use async_trait::async_trait;
use reqwest::{Body, Client, header};
use rusty_s3::{Bucket, Credentials, S3Action, UrlStyle};
use std::path::Path;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::error::{ProviderError, Result};

/// SigV4 presigned URLs cannot outlive seven days
pub const MAX_PRESIGN_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Signature lifetime of the upload and delete requests themselves
const REQUEST_SIGNATURE_TTL: Duration = Duration::from_secs(600);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Fresh object key for uploading `path`
///
/// Keys are chosen before the upload starts so an interrupted upload can
/// still be cleaned up.
pub fn object_key(path: &Path) -> String {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("audio");
    format!("uploads/{}/{}", Uuid::new_v4(), file_name)
}

/// An uploaded object and its time-bounded fetch URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedObject {
    pub url: String,
    pub key: String,
}

#[async_trait]
pub trait ObjectUploader: Send + Sync {
    /// Uploads `path` under `key` and returns a fetch URL valid for `ttl`
    ///
    /// If signing the URL fails after the upload succeeded, the object is
    /// deleted before the error is returned.
    async fn upload_and_presign(
        &self,
        path: &Path,
        key: &str,
        ttl: Duration,
    ) -> Result<PresignedObject>;

    /// Deletes an uploaded object. Failures are logged, never returned.
    async fn delete(&self, key: &str);
}

/// Uploader for S3-compatible stores (AWS, R2, MinIO)
pub struct S3Uploader {
    bucket: Bucket,
    credentials: Credentials,
    client: Client,
}

impl S3Uploader {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        config.validate()?;

        let endpoint: Url = config
            .endpoint
            .parse()
            .map_err(|e| ProviderError::invalid_config(format!("storage endpoint: {}", e)))?;

        let bucket = Bucket::new(
            endpoint,
            UrlStyle::Path,
            config.bucket.clone(),
            config.region.clone(),
        )
        .map_err(|e| ProviderError::invalid_config(format!("storage bucket: {}", e)))?;

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::invalid_config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            bucket,
            credentials: Credentials::new(config.access_key.clone(), config.secret_key.clone()),
            client,
        })
    }

    fn presign_get(&self, key: &str, ttl: Duration) -> Result<String> {
        if ttl.is_zero() || ttl > MAX_PRESIGN_TTL {
            return Err(ProviderError::upload(format!(
                "presigned URL lifetime must be between 1s and {}s, got {}s",
                MAX_PRESIGN_TTL.as_secs(),
                ttl.as_secs()
            )));
        }

        let url = self
            .bucket
            .get_object(Some(&self.credentials), key)
            .sign(ttl);
        Ok(url.to_string())
    }
}

#[async_trait]
impl ObjectUploader for S3Uploader {
    async fn upload_and_presign(
        &self,
        path: &Path,
        key: &str,
        ttl: Duration,
    ) -> Result<PresignedObject> {
        let unreadable =
            |e: std::io::Error| ProviderError::upload(format!("cannot read {}: {}", path.display(), e));
        let file = tokio::fs::File::open(path).await.map_err(unreadable)?;
        let size = file.metadata().await.map_err(unreadable)?.len();

        let put_url = self
            .bucket
            .put_object(Some(&self.credentials), key)
            .sign(REQUEST_SIGNATURE_TTL);

        debug!("Uploading {} ({} bytes) as {}", path.display(), size, key);

        // S3 rejects chunked uploads, so the length is sent up front
        let response = self
            .client
            .put(put_url)
            .header(header::CONTENT_LENGTH, size)
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await
            .map_err(|e| ProviderError::upload(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::upload(format!("HTTP {}: {}", status, body)));
        }

        match self.presign_get(key, ttl) {
            Ok(url) => {
                info!("Uploaded {} to object storage", key);
                Ok(PresignedObject {
                    url,
                    key: key.to_string(),
                })
            }
            Err(e) => {
                self.delete(key).await;
                Err(e)
            }
        }
    }

    async fn delete(&self, key: &str) {
        let url = self
            .bucket
            .delete_object(Some(&self.credentials), key)
            .sign(REQUEST_SIGNATURE_TTL);

        match self.client.delete(url).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Deleted uploaded object {}", key);
            }
            Ok(response) => {
                warn!(
                    "Failed to delete uploaded object {}: HTTP {}",
                    key,
                    response.status()
                );
            }
            Err(e) => warn!("Failed to delete uploaded object {}: {}", key, e),
        }
    }
}
