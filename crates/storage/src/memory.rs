//! In-process object service with per-credential access control
//!
//! [`MemoryObjectService`] plays the role of the remote service: it owns the
//! objects, knows which access keys exist and which containers each key may
//! touch, and verifies signed URLs. A [`MemoryBlobStore`] is one client of that
//! service and carries only the credential it was built with.

use crate::{
    BlobRef, BlobStore, BlobStoreFactory, PutAck, ScopedCredential, StorageError, StorageResult,
    StoreConfig, MAX_SIGNED_URL_TTL,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

const URL_SCHEME: &str = "memory://";

#[derive(Debug)]
struct StoredObject {
    data: Vec<u8>,
    content_type: String,
}

#[derive(Debug)]
struct Principal {
    secret: String,
    /// Containers this key may read and write; empty means all
    containers: HashSet<String>,
}

#[derive(Debug, Default)]
struct ServiceState {
    objects: HashMap<BlobRef, StoredObject>,
    principals: HashMap<String, Principal>,
    signatures: HashMap<String, (BlobRef, Instant)>,
    pending_failures: u32,
    requests: u64,
}

/// Shared object service; cheap to clone
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectService {
    state: Arc<Mutex<ServiceState>>,
}

impl MemoryObjectService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ServiceState> {
        // A poisoned lock only means a test panicked mid-operation
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register an access key allowed to use `containers` (all when empty)
    pub fn register_credential<I, S>(&self, access_key_id: &str, secret: &str, containers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().principals.insert(
            access_key_id.to_string(),
            Principal {
                secret: secret.to_string(),
                containers: containers.into_iter().map(Into::into).collect(),
            },
        );
    }

    /// Seed an object directly, bypassing access control
    pub fn insert(&self, blob: &BlobRef, data: impl Into<Vec<u8>>, content_type: &str) {
        self.lock().objects.insert(
            blob.clone(),
            StoredObject {
                data: data.into(),
                content_type: content_type.to_string(),
            },
        );
    }

    /// Raw object bytes, bypassing access control
    #[must_use]
    pub fn object(&self, blob: &BlobRef) -> Option<Vec<u8>> {
        self.lock().objects.get(blob).map(|o| o.data.clone())
    }

    /// Content type recorded at upload time
    #[must_use]
    pub fn content_type(&self, blob: &BlobRef) -> Option<String> {
        self.lock().objects.get(blob).map(|o| o.content_type.clone())
    }

    /// Make the next `count` get/put requests fail with a transient error
    pub fn fail_next(&self, count: u32) {
        self.lock().pending_failures = count;
    }

    /// Total get/put requests received, including failed ones
    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.lock().requests
    }

    /// Open a client bound to `config`'s credential
    #[must_use]
    pub fn client(&self, config: &StoreConfig) -> MemoryBlobStore {
        MemoryBlobStore {
            service: self.clone(),
            credential: config.credential.clone(),
        }
    }

    /// Resolve a URL produced by [`MemoryBlobStore::sign`]
    pub fn fetch_signed(&self, url: &str) -> StorageResult<Vec<u8>> {
        let token = url
            .strip_prefix(URL_SCHEME)
            .and_then(|rest| rest.rsplit_once("?sig="))
            .map(|(_, sig)| sig)
            .ok_or(StorageError::InvalidSignature)?;

        let state = self.lock();
        let (blob, expires_at) = state
            .signatures
            .get(token)
            .ok_or(StorageError::InvalidSignature)?;
        if Instant::now() >= *expires_at {
            return Err(StorageError::InvalidSignature);
        }
        state
            .objects
            .get(blob)
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::NotFound(blob.to_string()))
    }

    fn authorize(
        &self,
        state: &mut ServiceState,
        credential: &ScopedCredential,
        blob: &BlobRef,
    ) -> StorageResult<()> {
        let principal = state
            .principals
            .get(credential.access_key_id())
            .ok_or_else(|| StorageError::AccessDenied(format!("unknown access key for {blob}")))?;
        if principal.secret != credential.secret_access_key() {
            return Err(StorageError::AccessDenied(format!(
                "signature does not match for {blob}"
            )));
        }
        if !principal.containers.is_empty() && !principal.containers.contains(&blob.container) {
            return Err(StorageError::AccessDenied(blob.to_string()));
        }
        Ok(())
    }

    fn begin_request(&self, state: &mut ServiceState, blob: &BlobRef) -> StorageResult<()> {
        state.requests += 1;
        if state.pending_failures > 0 {
            state.pending_failures -= 1;
            return Err(StorageError::Transient(format!("503 SlowDown for {blob}")));
        }
        Ok(())
    }
}

impl BlobStoreFactory for MemoryObjectService {
    fn connect(&self, config: &StoreConfig) -> StorageResult<Box<dyn BlobStore>> {
        Ok(Box::new(self.client(config)))
    }
}

/// Client of a [`MemoryObjectService`] holding one credential
pub struct MemoryBlobStore {
    service: MemoryObjectService,
    credential: ScopedCredential,
}

impl std::fmt::Debug for MemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBlobStore")
            .field("credential", &self.credential)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, blob: &BlobRef) -> StorageResult<Vec<u8>> {
        let mut state = self.service.lock();
        self.service.begin_request(&mut state, blob)?;
        self.service.authorize(&mut state, &self.credential, blob)?;
        state
            .objects
            .get(blob)
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::NotFound(blob.to_string()))
    }

    async fn put(
        &self,
        blob: &BlobRef,
        data: &[u8],
        content_type: &str,
    ) -> StorageResult<PutAck> {
        let mut state = self.service.lock();
        self.service.begin_request(&mut state, blob)?;
        self.service.authorize(&mut state, &self.credential, blob)?;
        state.objects.insert(
            blob.clone(),
            StoredObject {
                data: data.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        debug!("Stored {} ({} bytes) in memory", blob, data.len());
        Ok(PutAck {
            blob: blob.clone(),
            size: data.len() as u64,
        })
    }

    async fn sign(&self, blob: &BlobRef, ttl: Duration) -> StorageResult<String> {
        if ttl.is_zero() || ttl > MAX_SIGNED_URL_TTL {
            return Err(StorageError::InvalidConfig(format!(
                "signed URL ttl {ttl:?} is outside 1s..={MAX_SIGNED_URL_TTL:?}"
            )));
        }
        let mut state = self.service.lock();
        self.service.authorize(&mut state, &self.credential, blob)?;
        let token = Uuid::new_v4().simple().to_string();
        state
            .signatures
            .insert(token.clone(), (blob.clone(), Instant::now() + ttl));
        Ok(format!("{URL_SCHEME}{}/{}?sig={token}", blob.container, blob.key))
    }
}
