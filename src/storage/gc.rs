//! Garbage collection for unreferenced blobs.

use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, info, warn};

use super::{BlobStore, CatalogStore};

/// Deletes stored blobs that no catalog row references. Runs off the hot
/// path; the hot path never deletes blob content.
pub struct BlobGarbageCollector {
    catalog: Arc<dyn CatalogStore>,
    blobs: Arc<dyn BlobStore>,
    interval: Duration,
}

impl BlobGarbageCollector {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        blobs: Arc<dyn BlobStore>,
        interval: Duration,
    ) -> Self {
        Self {
            catalog,
            blobs,
            interval,
        }
    }

    /// Starts the collection loop.
    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);
        loop {
            interval.tick().await;
            match self.collect().await {
                Ok(0) => debug!("blob gc pass found nothing to collect"),
                Ok(n) => info!(collected = n, "blob gc pass removed unreferenced blobs"),
                Err(e) => warn!("blob gc pass failed: {}", e),
            }
        }
    }

    /// Performs a single collection pass and returns the number of blobs
    /// removed.
    pub async fn collect(&self) -> Result<usize, crate::error::ApiError> {
        let referenced = self.catalog.referenced_hashes().await?;
        let stored = self.blobs.list_hashes().await?;

        let mut collected = 0usize;
        for hash in stored {
            if !referenced.contains(&hash) {
                self.blobs.remove(&hash).await?;
                collected += 1;
            }
        }
        Ok(collected)
    }
}
