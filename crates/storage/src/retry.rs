//! Bounded exponential backoff for transient storage failures

use crate::{BlobRef, BlobStore, PutAck, StorageResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry behaviour for `get`/`put`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt (milliseconds)
    pub base_delay_ms: u64,
    /// Upper bound on any single delay (milliseconds)
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based)
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let ms = self.base_delay_ms.saturating_mul(1_u64 << exp);
        Duration::from_millis(ms.min(self.max_delay_ms))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        operation, attempt, max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Applies a [`RetryPolicy`] to another store's `get` and `put`
///
/// `sign` is a local computation for S3 and is passed through untouched.
pub struct RetryingBlobStore {
    inner: Box<dyn BlobStore>,
    policy: RetryPolicy,
}

impl RetryingBlobStore {
    #[must_use]
    pub fn new(inner: Box<dyn BlobStore>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl BlobStore for RetryingBlobStore {
    async fn get(&self, blob: &BlobRef) -> StorageResult<Vec<u8>> {
        let op = format!("get {blob}");
        self.policy.run(&op, || self.inner.get(blob)).await
    }

    async fn put(
        &self,
        blob: &BlobRef,
        data: &[u8],
        content_type: &str,
    ) -> StorageResult<PutAck> {
        let op = format!("put {blob}");
        self.policy
            .run(&op, || self.inner.put(blob, data, content_type))
            .await
    }

    async fn sign(&self, blob: &BlobRef, ttl: Duration) -> StorageResult<String> {
        self.inner.sign(blob, ttl).await
    }
}
