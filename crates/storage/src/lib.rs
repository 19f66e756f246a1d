//! Blob storage for job inputs and published results
//!
//! Every job talks to object storage through a [`BlobStore`] built from that
//! job's own [`StoreConfig`]. Nothing here reads process environment for
//! credentials: a store only ever knows the credential it was constructed with,
//! and dropping the store drops (and zeroizes) the secret.
//!
//! - [`S3BlobStore`]: AWS S3 or any S3-compatible endpoint (`MinIO`, Spaces)
//! - [`MemoryObjectService`] / [`MemoryBlobStore`]: in-process stand-in with
//!   per-credential access control, used by tests and local runs
//! - [`RetryingBlobStore`]: bounded exponential backoff over transient failures
//!
//! # Example
//!
//! ```rust,no_run
//! use genmedia_storage::{BlobRef, BlobStore, S3BlobStore, ScopedCredential, StoreConfig};
//! use std::time::Duration;
//!
//! # async fn run() -> genmedia_storage::StorageResult<()> {
//! let config = StoreConfig {
//!     region: "eu-central-1".to_string(),
//!     endpoint: Some("https://fra1.digitaloceanspaces.com".to_string()),
//!     credential: ScopedCredential::new("AKIA...", "secret", None),
//! };
//! let store = S3BlobStore::new(&config);
//!
//! let out = BlobRef::new("bucket", "results/out.png");
//! let url = store.sign(&out, Duration::from_secs(3600)).await?;
//! store.put(&out, b"png bytes", "image/png").await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub mod credential;
pub mod memory;
pub mod object_storage;
pub mod retry;

pub use credential::{ScopedCredential, StoreConfig};
pub use memory::{MemoryBlobStore, MemoryObjectService};
pub use object_storage::{S3BlobStore, S3StoreFactory};
pub use retry::{RetryPolicy, RetryingBlobStore};

/// Storage layer errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Transient storage failure: {0}")]
    Transient(String),

    #[error("Storage request failed: {0}")]
    Permanent(String),

    #[error("Invalid storage configuration: {0}")]
    InvalidConfig(String),

    #[error("Signed URL is invalid or expired")]
    InvalidSignature,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StorageError {
    /// Transient failures are worth another attempt; everything else is final
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Longest lifetime a signed URL may have (S3 presigning caps it at one week)
pub const MAX_SIGNED_URL_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Opaque locator of a stored object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobRef {
    pub container: String,
    pub key: String,
}

impl BlobRef {
    pub fn new(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for BlobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.container, self.key)
    }
}

/// Acknowledgement of a completed upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutAck {
    pub blob: BlobRef,
    pub size: u64,
}

/// Object store operations used by the pipeline
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch the full contents of `blob`
    async fn get(&self, blob: &BlobRef) -> StorageResult<Vec<u8>>;

    /// Store `data` at `blob` with an explicit content type
    async fn put(&self, blob: &BlobRef, data: &[u8], content_type: &str)
        -> StorageResult<PutAck>;

    /// Issue a read URL for `blob` valid for `ttl`
    async fn sign(&self, blob: &BlobRef, ttl: Duration) -> StorageResult<String>;
}

/// Builds a job-scoped store from that job's configuration
pub trait BlobStoreFactory: Send + Sync {
    fn connect(&self, config: &StoreConfig) -> StorageResult<Box<dyn BlobStore>>;
}
