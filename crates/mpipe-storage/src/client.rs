//! S3 gateway implementation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::gateway::{
    download_path, plan_directory_upload, BlobConnector, BlobStore, UploadSummary,
};

/// Configuration for the S3 gateway.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3 API endpoint URL
    pub endpoint_url: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    pub region: String,
    /// Bucket holding original uploads
    pub upload_bucket: String,
    /// Bucket receiving pipeline outputs
    pub storage_bucket: String,
}

impl S3Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("S3_ENDPOINT_URL")
                .map_err(|_| StorageError::config_error("S3_ENDPOINT_URL not set"))?,
            access_key_id: std::env::var("S3_ACCESS_KEY_ID")
                .map_err(|_| StorageError::config_error("S3_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("S3_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("S3_SECRET_ACCESS_KEY not set"))?,
            region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            upload_bucket: std::env::var("S3_UPLOAD_BUCKET")
                .map_err(|_| StorageError::config_error("S3_UPLOAD_BUCKET not set"))?,
            storage_bucket: std::env::var("S3_STORAGE_BUCKET")
                .map_err(|_| StorageError::config_error("S3_STORAGE_BUCKET not set"))?,
        })
    }
}

/// Blob store connection over the S3 API.
#[derive(Clone)]
pub struct S3Gateway {
    client: Client,
    upload_bucket: String,
    storage_bucket: String,
}

impl S3Gateway {
    /// Build a client and make sure both buckets exist.
    pub async fn connect(config: &S3Config) -> StorageResult<Self> {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "mpipe",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        let gateway = Self {
            client: Client::from_conf(sdk_config),
            upload_bucket: config.upload_bucket.clone(),
            storage_bucket: config.storage_bucket.clone(),
        };

        gateway.ensure_bucket(&gateway.upload_bucket).await?;
        gateway.ensure_bucket(&gateway.storage_bucket).await?;
        Ok(gateway)
    }

    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        if self.client.head_bucket().bucket(bucket).send().await.is_ok() {
            return Ok(());
        }

        info!(bucket, "Bucket missing, creating");
        self.client
            .create_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| StorageError::bucket_setup(bucket, e.to_string()))?;
        Ok(())
    }

    async fn upload_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<()> {
        debug!("Uploading {} to {}", path.display(), key);

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.storage_bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(format!("{}: {}", key, e)))?;

        Ok(())
    }
}

#[async_trait]
impl BlobStore for S3Gateway {
    async fn download(&self, key: &str, dest_dir: &Path) -> StorageResult<PathBuf> {
        let path = download_path(key, dest_dir)?;
        debug!("Downloading {} to {}", key, path.display());

        let response = self
            .client
            .get_object()
            .bucket(&self.upload_bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.to_string().contains("NoSuchKey") {
                    StorageError::not_found(key)
                } else {
                    StorageError::download_failed(e.to_string())
                }
            })?;

        tokio::fs::create_dir_all(dest_dir).await?;
        let mut file = tokio::fs::File::create(&path).await?;
        let mut body = response.body;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| StorageError::download_failed(e.to_string()))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        info!("Downloaded {} to {}", key, path.display());
        Ok(path)
    }

    async fn upload_directory(
        &self,
        local_dir: &Path,
        remote_prefix: &str,
    ) -> StorageResult<UploadSummary> {
        let (planned, skipped) = plan_directory_upload(local_dir, remote_prefix).await?;

        let mut summary = UploadSummary {
            uploaded: Vec::with_capacity(planned.len()),
            skipped,
        };
        for upload in planned {
            self.upload_file(&upload.path, &upload.key, upload.content_type)
                .await?;
            summary.uploaded.push(upload.key);
        }

        info!(
            prefix = remote_prefix,
            uploaded = summary.uploaded.len(),
            skipped = summary.skipped,
            "Uploaded output directory"
        );
        Ok(summary)
    }
}

/// Opens one [`S3Gateway`] per caller.
#[derive(Debug, Clone)]
pub struct S3Connector {
    config: S3Config,
}

impl S3Connector {
    pub fn new(config: S3Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BlobConnector for S3Connector {
    async fn connect(&self) -> StorageResult<Box<dyn BlobStore>> {
        Ok(Box::new(S3Gateway::connect(&self.config).await?))
    }
}
