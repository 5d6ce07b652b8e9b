//! Background sweep for expired leases.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, info, warn};

use super::JobQueue;
use crate::events::Dispatcher;
use crate::models::JobStatus;

/// Periodically reclaims expired leases. A single sweeper runs per queue.
pub struct LeaseSweeper {
    queue: Arc<dyn JobQueue>,
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
}

impl LeaseSweeper {
    pub fn new(queue: Arc<dyn JobQueue>, dispatcher: Arc<Dispatcher>, interval: Duration) -> Self {
        Self {
            queue,
            dispatcher,
            interval,
        }
    }

    /// Starts the sweep loop.
    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);
        loop {
            interval.tick().await;
            if let Err(e) = self.sweep().await {
                warn!("lease sweep failed: {}", e);
            }
        }
    }

    /// Performs a single sweep pass and returns how many leases were
    /// reclaimed.
    pub async fn sweep(&self) -> Result<usize, crate::error::ApiError> {
        let reclaimed = self.queue.reclaim_expired(Utc::now()).await?;
        if reclaimed.is_empty() {
            debug!("lease sweep found no expired leases");
            return Ok(0);
        }
        info!(count = reclaimed.len(), "reclaimed expired job leases");
        for job in &reclaimed {
            if job.status == JobStatus::Failed {
                self.dispatcher.job_failed_terminally(job).await;
            }
        }
        Ok(reclaimed.len())
    }
}
