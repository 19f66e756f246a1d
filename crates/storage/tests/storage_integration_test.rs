//! Integration tests against a live S3-compatible endpoint
//!
//! These tests require `MinIO` on localhost:9000 with the default
//! `minioadmin` credentials and an existing `genmedia-test` bucket:
//!
//! ```text
//! docker run -p 9000:9000 minio/minio server /data
//! mc mb local/genmedia-test
//! ```
//!
//! Run with: `cargo test --package genmedia-storage --test storage_integration_test -- --ignored --nocapture`

use genmedia_storage::*;
use std::time::Duration;

const BUCKET: &str = "genmedia-test";

/// Check if `MinIO` is available
async fn is_minio_available() -> bool {
    tokio::net::TcpStream::connect("127.0.0.1:9000")
        .await
        .is_ok()
}

fn minio_config(access_key: &str, secret: &str) -> StoreConfig {
    StoreConfig {
        region: "us-east-1".to_string(),
        endpoint: Some("http://localhost:9000".to_string()),
        credential: ScopedCredential::new(access_key, secret, None),
    }
}

#[tokio::test]
#[ignore] // Requires MinIO running on localhost:9000
async fn test_minio_put_get_sign() {
    if !is_minio_available().await {
        eprintln!("MinIO not available on 127.0.0.1:9000, skipping test_minio_put_get_sign");
        return;
    }

    let store = S3BlobStore::new(&minio_config("minioadmin", "minioadmin"));
    let blob = BlobRef::new(BUCKET, "integration/hello.txt");
    let data = b"Hello, MinIO!";

    let ack = store
        .put(&blob, data, "text/plain")
        .await
        .expect("Failed to store object");
    assert_eq!(ack.size, data.len() as u64);

    let fetched = store.get(&blob).await.expect("Failed to fetch object");
    assert_eq!(fetched, data);

    let url = store
        .sign(&blob, Duration::from_secs(3600))
        .await
        .expect("Failed to sign URL");
    assert!(url.contains("integration/hello.txt"));
    assert!(url.contains("X-Amz-Expires=3600"));
}

#[tokio::test]
#[ignore] // Requires MinIO running on localhost:9000
async fn test_minio_missing_object_is_not_found() {
    if !is_minio_available().await {
        eprintln!("MinIO not available on 127.0.0.1:9000, skipping");
        return;
    }

    let store = S3BlobStore::new(&minio_config("minioadmin", "minioadmin"));
    let err = store
        .get(&BlobRef::new(BUCKET, "integration/does-not-exist"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)), "got {err:?}");
}

#[tokio::test]
#[ignore] // Requires MinIO running on localhost:9000
async fn test_minio_bad_credentials_are_denied() {
    if !is_minio_available().await {
        eprintln!("MinIO not available on 127.0.0.1:9000, skipping");
        return;
    }

    let store = S3BlobStore::new(&minio_config("minioadmin", "not-the-secret"));
    let err = store
        .get(&BlobRef::new(BUCKET, "integration/hello.txt"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::AccessDenied(_)), "got {err:?}");
    assert!(!err.is_transient());
}
