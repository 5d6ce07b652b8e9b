//! Worker loop: lease, process under a renewed lease, report the outcome.

use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, info, warn};

use super::{ProcessorContext, ProcessorRegistry};
use crate::error::ErrorCode;
use crate::events::Dispatcher;
use crate::models::JobStatus;
use crate::queue::JobQueue;

/// Renewals allowed before the job budget expires; the processing deadline
/// is `lease_duration * RENEWALS_ALLOWED`.
const RENEWALS_ALLOWED: u32 = 6;

/// Process-level actor pulling jobs for the kinds its registry handles.
///
/// Embedded workers carry the dispatcher so completion side effects fire
/// in process. Remote workers leave it out: their terminal calls travel
/// through the worker HTTP API, where the server fires the same hooks.
pub struct WorkerLoop {
    queue: Arc<dyn JobQueue>,
    registry: Arc<ProcessorRegistry>,
    dispatcher: Option<Arc<Dispatcher>>,
    ctx: ProcessorContext,
    worker_id: String,
    lease_duration: Duration,
    idle_backoff: Duration,
}

impl WorkerLoop {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        registry: Arc<ProcessorRegistry>,
        dispatcher: Option<Arc<Dispatcher>>,
        ctx: ProcessorContext,
        worker_id: impl Into<String>,
        lease_duration: Duration,
        idle_backoff: Duration,
    ) -> Self {
        Self {
            queue,
            registry,
            dispatcher,
            ctx,
            worker_id: worker_id.into(),
            lease_duration,
            idle_backoff,
        }
    }

    /// Runs the loop forever.
    pub async fn run(&self) {
        info!(worker = %self.worker_id, "worker loop started");
        loop {
            match self.step().await {
                Ok(true) => {}
                Ok(false) => time::sleep(self.idle_backoff).await,
                Err(e) => {
                    warn!(worker = %self.worker_id, "worker step failed: {}", e);
                    time::sleep(self.idle_backoff).await;
                }
            }
        }
    }

    /// Leases and processes at most one job. Returns whether a job was
    /// handled.
    pub async fn step(&self) -> Result<bool, crate::error::ApiError> {
        let accepted = self.registry.accepted_kinds();
        let Some(job) = self
            .queue
            .lease(&self.worker_id, &accepted, self.lease_duration)
            .await?
        else {
            return Ok(false);
        };

        let Some(processor) = self.registry.lookup(job.kind) else {
            // Leased a kind we no longer handle; give it back through fail.
            self.queue
                .fail(job.id, &self.worker_id, "no processor registered for kind")
                .await?;
            return Ok(true);
        };

        debug!(worker = %self.worker_id, job_id = job.id, kind = job.kind.as_str(), "processing job");
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.job_leased(&job).await;
        }

        // Renewal ticker at a third of the lease, stopped before the
        // terminal queue call so a stale renewal cannot race it.
        let renewal = {
            let queue = self.queue.clone();
            let worker_id = self.worker_id.clone();
            let job_id = job.id;
            let lease_duration = self.lease_duration;
            tokio::spawn(async move {
                let mut ticker = time::interval(lease_duration / 3);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    match queue.renew(job_id, &worker_id, lease_duration).await {
                        Ok(_) => {}
                        Err(e) if e.code == ErrorCode::LeaseLost => {
                            debug!(job_id, "stopping renewals, lease lost");
                            break;
                        }
                        Err(e) => {
                            warn!(job_id, "lease renewal failed: {}", e);
                            break;
                        }
                    }
                }
            })
        };

        let deadline = self.lease_duration * RENEWALS_ALLOWED;
        let processed = time::timeout(deadline, processor.process(&self.ctx, &job)).await;
        renewal.abort();

        match processed {
            Ok(Ok(result)) => match self
                .queue
                .complete(job.id, &self.worker_id, result.clone())
                .await
            {
                Ok(done) => {
                    if let Some(dispatcher) = &self.dispatcher {
                        dispatcher.job_completed(&done, &result).await;
                    }
                    processor.on_complete(&done, &result).await;
                }
                Err(e) => {
                    warn!(job_id = job.id, "completion rejected: {}", e);
                }
            },
            Ok(Err(process_error)) => {
                let message = process_error.to_string();
                self.report_failure(job.id, &message).await;
                processor.on_fail(&job, &message).await;
            }
            Err(_) => {
                // Deadline reached: stop processing and let the sweeper
                // reclaim the lease.
                warn!(job_id = job.id, "job deadline exceeded, abandoning lease");
            }
        }
        Ok(true)
    }

    async fn report_failure(&self, job_id: i64, message: &str) {
        match self.queue.fail(job_id, &self.worker_id, message).await {
            Ok(failed) if failed.status == JobStatus::Failed => {
                if let Some(dispatcher) = &self.dispatcher {
                    dispatcher.job_failed_terminally(&failed).await;
                }
            }
            Ok(_) => {}
            Err(e) => warn!(job_id, "failure report rejected: {}", e),
        }
    }
}
