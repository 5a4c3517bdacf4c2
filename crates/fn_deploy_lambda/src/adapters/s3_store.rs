use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use fn_deploy_core::providers::ArtifactStore;
use fn_deploy_core::ProviderError;
use tracing::{debug, info};

use super::provider_error;

pub const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

/// Artifact store backed by one S3 bucket.
///
/// Keys are content-addressed, so an existing key already holds the same
/// bytes and the upload is skipped.
pub struct S3ArtifactStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ArtifactStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, ProviderError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(error) if error.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(false),
            Err(error) => Err(provider_error("head_object", error)),
        }
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    fn location(&self) -> &str {
        &self.bucket
    }

    async fn put_archive(&self, key: &str, archive: &Path) -> Result<(), ProviderError> {
        if self.exists(key).await? {
            debug!(
                component = "s3_store",
                bucket = %self.bucket,
                key,
                "artifact already present, skipping upload"
            );
            return Ok(());
        }

        let body = ByteStream::from_path(archive).await.map_err(|error| {
            ProviderError::fatal(
                "put_object",
                format!("failed to read {}: {error}", archive.display()),
            )
        })?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(ARCHIVE_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|error| provider_error("put_object", error))?;

        info!(
            component = "s3_store",
            bucket = %self.bucket,
            key,
            "uploaded artifact"
        );
        Ok(())
    }
}
