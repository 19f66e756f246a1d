//! Object storage implementation using S3-compatible services
//!
//! Each [`S3BlobStore`] owns a client configured with exactly one job's
//! credential. Error responses are sorted into not-found, access-denied,
//! transient (throttling, 5xx, timeouts, connection failures) and permanent.

use crate::{
    BlobRef, BlobStore, BlobStoreFactory, PutAck, StorageError, StorageResult, StoreConfig,
};
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{http::HttpResponse, Credentials, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    presigning::PresigningConfig,
    primitives::ByteStream,
    Client,
};
use std::time::Duration;
use tracing::debug;

/// S3/MinIO/Spaces blob store bound to one job's credential
pub struct S3BlobStore {
    client: Client,
}

impl S3BlobStore {
    /// Create a client from the job's store configuration
    #[must_use]
    pub fn new(config: &StoreConfig) -> Self {
        let credentials = Credentials::new(
            config.credential.access_key_id(),
            config.credential.secret_access_key(),
            config.credential.session_token().map(str::to_string),
            None,
            "genmedia-job",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .behavior_version_latest();

        // Custom endpoint for S3-compatible services
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn get(&self, blob: &BlobRef) -> StorageResult<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&blob.container)
            .key(&blob.key)
            .send()
            .await
            .map_err(|e| classify_sdk_error(blob, e))?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Transient(format!("reading {blob}: {e}")))?
            .to_vec();

        debug!("Fetched {} ({} bytes)", blob, bytes.len());
        Ok(bytes)
    }

    async fn put(
        &self,
        blob: &BlobRef,
        data: &[u8],
        content_type: &str,
    ) -> StorageResult<PutAck> {
        self.client
            .put_object()
            .bucket(&blob.container)
            .key(&blob.key)
            .content_type(content_type)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| classify_sdk_error(blob, e))?;

        debug!("Stored {} ({} bytes, {})", blob, data.len(), content_type);
        Ok(PutAck {
            blob: blob.clone(),
            size: data.len() as u64,
        })
    }

    async fn sign(&self, blob: &BlobRef, ttl: Duration) -> StorageResult<String> {
        let presigning = PresigningConfig::expires_in(ttl)
            .map_err(|e| StorageError::InvalidConfig(format!("presigning ttl {ttl:?}: {e}")))?;

        let request = self
            .client
            .get_object()
            .bucket(&blob.container)
            .key(&blob.key)
            .presigned(presigning)
            .await
            .map_err(|e| classify_sdk_error(blob, e))?;

        Ok(request.uri().to_string())
    }
}

/// Opens an [`S3BlobStore`] per job
#[derive(Debug, Default, Clone, Copy)]
pub struct S3StoreFactory;

impl BlobStoreFactory for S3StoreFactory {
    fn connect(&self, config: &StoreConfig) -> StorageResult<Box<dyn BlobStore>> {
        if config.region.trim().is_empty() {
            return Err(StorageError::InvalidConfig("region is empty".to_string()));
        }
        Ok(Box::new(S3BlobStore::new(config)))
    }
}

fn classify_sdk_error<E>(blob: &BlobRef, err: SdkError<E, HttpResponse>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let detail = format!("{blob}: {}", DisplayErrorContext(&err));
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StorageError::Transient(detail)
        }
        SdkError::ServiceError(service) => {
            let status = service.raw().status().as_u16();
            let code = service.err().code().unwrap_or_default();
            classify_status(status, code, detail)
        }
        _ => StorageError::Permanent(detail),
    }
}

/// Map an HTTP status and S3 error code onto the storage taxonomy
pub(crate) fn classify_status(status: u16, code: &str, detail: String) -> StorageError {
    match (status, code) {
        (404, _) | (_, "NoSuchKey" | "NoSuchBucket" | "NotFound") => StorageError::NotFound(detail),
        (401 | 403, _)
        | (_, "AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "ExpiredToken") => {
            StorageError::AccessDenied(detail)
        }
        (408 | 429, _) | (500..=599, _) | (_, "SlowDown" | "RequestTimeout") => {
            StorageError::Transient(detail)
        }
        _ => StorageError::Permanent(detail),
    }
}
