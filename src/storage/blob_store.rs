//! Content-addressed blob store.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult, ErrorCode};

/// Computes the lowercase hex SHA-256 of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut out = String::with_capacity(64);
    for byte in digest {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Outcome of a put: canonical hash plus whether the bytes were new.
#[derive(Debug, Clone)]
pub struct PutOutcome {
    pub hash: String,
    pub bytes_written: u64,
    /// False when the same content was already stored. Informational,
    /// never a failure.
    pub was_new: bool,
}

/// Trait for content-addressed blob storage.
///
/// `put` is idempotent: concurrent puts of the same bytes converge to a
/// single stored copy. Partial writes are never visible to `get`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores the bytes under their SHA-256 and returns the canonical hash.
    async fn put(&self, data: Bytes) -> ApiResult<PutOutcome>;

    /// Reads the content for a hash.
    async fn get(&self, hash: &str) -> ApiResult<Bytes>;

    /// Returns whether content for the hash is stored.
    async fn exists(&self, hash: &str) -> bool;

    /// Removes stored content. Reserved for the GC pass; not routed
    /// through any request path.
    async fn remove(&self, hash: &str) -> ApiResult<()>;

    /// Enumerates all stored hashes (GC input).
    async fn list_hashes(&self) -> ApiResult<Vec<String>>;
}

/// In-memory implementation backing tests and `--in-memory` mode.
pub struct MemoryBlobStore {
    blobs: DashMap<String, Bytes>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: DashMap::new(),
        }
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, data: Bytes) -> ApiResult<PutOutcome> {
        let hash = sha256_hex(&data);
        let bytes_written = data.len() as u64;
        let was_new = match self.blobs.entry(hash.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(data);
                true
            }
        };
        Ok(PutOutcome {
            hash,
            bytes_written,
            was_new,
        })
    }

    async fn get(&self, hash: &str) -> ApiResult<Bytes> {
        self.blobs
            .get(hash)
            .map(|b| b.value().clone())
            .ok_or_else(|| ApiError::not_found(format!("blob {} is not stored", hash)))
    }

    async fn exists(&self, hash: &str) -> bool {
        self.blobs.contains_key(hash)
    }

    async fn remove(&self, hash: &str) -> ApiResult<()> {
        self.blobs.remove(hash);
        Ok(())
    }

    async fn list_hashes(&self) -> ApiResult<Vec<String>> {
        Ok(self.blobs.iter().map(|e| e.key().clone()).collect())
    }
}

/// Filesystem implementation. Blobs live at `<root>/<hh>/<hash>` where
/// `hh` is the first two hash characters; writes stage under
/// `<root>/staging/` and publish with an atomic hard-link.
pub struct FsBlobStore {
    root: PathBuf,
    staging: PathBuf,
}

impl FsBlobStore {
    pub async fn new(root: PathBuf) -> ApiResult<Self> {
        let staging = root.join("staging");
        fs::create_dir_all(&staging).await.map_err(|e| {
            ApiError::with_message(
                ErrorCode::StorageIo,
                format!("failed to create blob store root: {}", e),
            )
        })?;
        Ok(Self { root, staging })
    }

    fn blob_path(&self, hash: &str) -> PathBuf {
        let shard = &hash[..hash.len().min(2)];
        self.root.join(shard).join(hash)
    }

    /// Rehashes a published file against the expected content hash.
    /// `Ok(None)` when nothing is published at the path.
    async fn spot_check(&self, path: &Path, expected: &str) -> ApiResult<Option<bool>> {
        match fs::read(path).await {
            Ok(existing) => Ok(Some(sha256_hex(&existing) == expected)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, data: Bytes) -> ApiResult<PutOutcome> {
        let hash = sha256_hex(&data);
        let bytes_written = data.len() as u64;
        let final_path = self.blob_path(&hash);

        match self.spot_check(&final_path, &hash).await? {
            Some(true) => {
                return Ok(PutOutcome {
                    hash,
                    bytes_written,
                    was_new: false,
                });
            }
            Some(false) => return Err(ApiError::new(ErrorCode::Integrity)),
            None => {}
        }

        let staging_path = self.staging.join(Uuid::new_v4().to_string());
        let mut file = fs::File::create(&staging_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Publish atomically via link: partial writes stay invisible, and
        // exactly one concurrent put of the same bytes observes was_new.
        // The loser keeps the winner's copy after a hash spot-check.
        let published = fs::hard_link(&staging_path, &final_path).await;
        fs::remove_file(&staging_path).await.ok();
        match published {
            Ok(()) => Ok(PutOutcome {
                hash,
                bytes_written,
                was_new: true,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                match self.spot_check(&final_path, &hash).await? {
                    Some(true) => Ok(PutOutcome {
                        hash,
                        bytes_written,
                        was_new: false,
                    }),
                    _ => Err(ApiError::new(ErrorCode::Integrity)),
                }
            }
            Err(e) => Err(ApiError::with_message(
                ErrorCode::StorageIo,
                format!("failed to publish blob: {}", e),
            )),
        }
    }

    async fn get(&self, hash: &str) -> ApiResult<Bytes> {
        match fs::read(self.blob_path(hash)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ApiError::not_found(format!("blob {} is not stored", hash)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, hash: &str) -> bool {
        fs::metadata(self.blob_path(hash)).await.is_ok()
    }

    async fn remove(&self, hash: &str) -> ApiResult<()> {
        match fs::remove_file(self.blob_path(hash)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_hashes(&self) -> ApiResult<Vec<String>> {
        let mut hashes = Vec::new();
        let mut shards = fs::read_dir(&self.root).await?;
        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            if shard.file_name() == "staging" {
                continue;
            }
            let mut entries = fs::read_dir(shard.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                if let Some(name) = entry.file_name().to_str() {
                    hashes.push(name.to_string());
                }
            }
        }
        Ok(hashes)
    }
}
