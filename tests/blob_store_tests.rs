//! Filesystem blob store tests.

use bytes::Bytes;
use tempfile::tempdir;

use assetvault_rs::storage::{sha256_hex, BlobStore, FsBlobStore};

#[tokio::test]
async fn test_put_publishes_atomically_under_the_hash() {
    let dir = tempdir().unwrap();
    let store = FsBlobStore::new(dir.path().to_path_buf()).await.unwrap();

    let outcome = store.put(Bytes::from_static(b"cube bytes")).await.unwrap();
    assert!(outcome.was_new);
    assert_eq!(outcome.hash, sha256_hex(b"cube bytes"));
    assert_eq!(outcome.bytes_written, 10);

    // The published path is content-addressed and readable.
    assert!(store.exists(&outcome.hash).await);
    let read = store.get(&outcome.hash).await.unwrap();
    assert_eq!(read, Bytes::from_static(b"cube bytes"));

    // Nothing is left behind in staging.
    let staging_entries = std::fs::read_dir(dir.path().join("staging"))
        .unwrap()
        .count();
    assert_eq!(staging_entries, 0);
}

#[tokio::test]
async fn test_put_is_idempotent() {
    let dir = tempdir().unwrap();
    let store = FsBlobStore::new(dir.path().to_path_buf()).await.unwrap();

    let first = store.put(Bytes::from_static(b"same bytes")).await.unwrap();
    let second = store.put(Bytes::from_static(b"same bytes")).await.unwrap();
    assert!(first.was_new);
    assert!(!second.was_new);
    assert_eq!(first.hash, second.hash);
}

#[tokio::test]
async fn test_concurrent_puts_converge() {
    let dir = tempdir().unwrap();
    let store = std::sync::Arc::new(FsBlobStore::new(dir.path().to_path_buf()).await.unwrap());

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.put(Bytes::from_static(b"racing bytes")).await })
        })
        .collect();

    let mut winners = 0;
    for task in tasks {
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome.hash, sha256_hex(b"racing bytes"));
        if outcome.was_new {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(store.list_hashes().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_get_missing_hash_is_not_found() {
    let dir = tempdir().unwrap();
    let store = FsBlobStore::new(dir.path().to_path_buf()).await.unwrap();
    let err = store.get(&sha256_hex(b"never stored")).await.unwrap_err();
    assert_eq!(err.code, assetvault_rs::ErrorCode::NotFound);
}
