//! Durable job queue with lease-based dispatch.

mod sweeper;

pub use sweeper::LeaseSweeper;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::error::{ApiError, ApiResult, ErrorCode};
use crate::models::{Job, JobEvent, JobEventKind, JobKind, JobStatus, ProgressStage};

/// Trait for the durable job queue.
///
/// All state transitions are atomic: PENDING→LEASED sees at most one winner
/// per job, and LEASED→terminal requires the owner to match. The in-memory
/// implementation guards the job table with a single lock; a relational
/// implementation would use row-level locking (`SELECT ... FOR UPDATE SKIP
/// LOCKED`) or a CAS on a version column instead.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Appends a job, or returns the existing one when a job with the same
    /// `(kind, target_entity_id, target_blob_hash)` is still PENDING or
    /// LEASED. The boolean is true when a new row was created.
    async fn enqueue(
        &self,
        kind: JobKind,
        target_entity_id: i64,
        target_blob_hash: &str,
        payload: serde_json::Value,
        max_attempts: u32,
    ) -> ApiResult<(Job, bool)>;

    /// Atomically selects one eligible job for the worker and leases it.
    /// Eligible: PENDING or expired-LEASED, kind accepted, attempts under
    /// the cap. Selection is FIFO by `updated_at`, tie-broken by id.
    async fn lease(
        &self,
        worker_id: &str,
        accepted_kinds: &[JobKind],
        lease_duration: Duration,
    ) -> ApiResult<Option<Job>>;

    /// Extends the lease expiry iff the owner matches.
    async fn renew(&self, job_id: i64, worker_id: &str, extra: Duration) -> ApiResult<Job>;

    /// LEASED → DONE iff the owner matches. A successful run consumes an
    /// attempt.
    async fn complete(
        &self,
        job_id: i64,
        worker_id: &str,
        result: serde_json::Value,
    ) -> ApiResult<Job>;

    /// LEASED → PENDING while attempts remain under the cap, otherwise
    /// LEASED → FAILED. The re-entered job goes to the back of the FIFO.
    async fn fail(&self, job_id: i64, worker_id: &str, error_message: &str) -> ApiResult<Job>;

    /// Sweeps expired leases: increments attempts and returns each job to
    /// PENDING or marks it FAILED at the cap. Never advances a terminal job.
    async fn reclaim_expired(&self, now: DateTime<Utc>) -> ApiResult<Vec<Job>>;

    async fn get(&self, job_id: i64) -> ApiResult<Job>;

    /// Append-only audit log for a job, in insertion order.
    async fn events(&self, job_id: i64) -> ApiResult<Vec<JobEvent>>;

    /// Records a PROGRESS event from a processor.
    async fn append_progress(
        &self,
        job_id: i64,
        stage: ProgressStage,
        message: &str,
    ) -> ApiResult<()>;

    /// Number of jobs currently PENDING.
    async fn pending_count(&self) -> usize;

    /// Removes terminal job rows (and their events) targeting the given
    /// entities. Part of the recycle-bin purge cascade.
    async fn purge_terminal_for_targets(&self, target_ids: &[i64]) -> ApiResult<usize>;
}

type DedupKey = (JobKind, i64, String);

struct QueueInner {
    jobs: HashMap<i64, Job>,
    events: HashMap<i64, Vec<JobEvent>>,
    /// Active (non-terminal) jobs by dedup key.
    active: HashMap<DedupKey, i64>,
    next_id: i64,
}

/// In-memory queue implementation.
pub struct MemoryJobQueue {
    inner: Mutex<QueueInner>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                jobs: HashMap::new(),
                events: HashMap::new(),
                active: HashMap::new(),
                next_id: 1,
            }),
        }
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn chrono_duration(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::seconds(600))
}

impl QueueInner {
    fn push_event(&mut self, event: JobEvent) {
        self.events.entry(event.job_id).or_default().push(event);
    }

    fn job_mut(&mut self, job_id: i64) -> ApiResult<&mut Job> {
        self.jobs
            .get_mut(&job_id)
            .ok_or_else(|| ApiError::not_found(format!("job {} does not exist", job_id)))
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(
        &self,
        kind: JobKind,
        target_entity_id: i64,
        target_blob_hash: &str,
        payload: serde_json::Value,
        max_attempts: u32,
    ) -> ApiResult<(Job, bool)> {
        let mut inner = self.inner.lock();
        let key: DedupKey = (kind, target_entity_id, target_blob_hash.to_string());

        if let Some(existing_id) = inner.active.get(&key).copied() {
            if let Some(existing) = inner.jobs.get(&existing_id) {
                if !existing.status.is_terminal() {
                    return Ok((existing.clone(), false));
                }
            }
            inner.active.remove(&key);
        }

        let id = inner.next_id;
        inner.next_id += 1;
        let job = Job::new(
            id,
            kind,
            target_entity_id,
            target_blob_hash,
            payload,
            max_attempts.max(1),
        );
        inner.jobs.insert(id, job.clone());
        inner.active.insert(key, id);
        inner.push_event(JobEvent::new(
            id,
            JobEventKind::Enqueued,
            format!("enqueued {} for entity {}", kind.as_str(), target_entity_id),
        ));
        debug!(job_id = id, kind = kind.as_str(), "job enqueued");
        Ok((job, true))
    }

    async fn lease(
        &self,
        worker_id: &str,
        accepted_kinds: &[JobKind],
        lease_duration: Duration,
    ) -> ApiResult<Option<Job>> {
        let now = Utc::now();
        let mut inner = self.inner.lock();

        let candidate = inner
            .jobs
            .values()
            .filter(|job| {
                let eligible_status =
                    job.status == JobStatus::Pending || job.lease_expired(now);
                eligible_status
                    && accepted_kinds.contains(&job.kind)
                    && job.attempts < job.max_attempts
            })
            .min_by_key(|job| (job.updated_at, job.id))
            .map(|job| job.id);

        let Some(job_id) = candidate else {
            return Ok(None);
        };

        // Still under the table lock, so this transition is the single
        // winner for the row.
        let job = inner.job_mut(job_id)?;
        job.status = JobStatus::Leased;
        job.lease_owner = Some(worker_id.to_string());
        job.lease_expiry = Some(now + chrono_duration(lease_duration));
        job.updated_at = now;
        let leased = job.clone();

        inner.push_event(JobEvent::new(
            job_id,
            JobEventKind::Leased,
            format!("leased by {}", worker_id),
        ));
        debug!(job_id, worker = worker_id, "job leased");
        Ok(Some(leased))
    }

    async fn renew(&self, job_id: i64, worker_id: &str, extra: Duration) -> ApiResult<Job> {
        let mut inner = self.inner.lock();
        let job = inner.job_mut(job_id)?;
        if job.status != JobStatus::Leased || job.lease_owner.as_deref() != Some(worker_id) {
            return Err(ApiError::new(ErrorCode::LeaseLost));
        }
        job.lease_expiry = Some(Utc::now() + chrono_duration(extra));
        Ok(job.clone())
    }

    async fn complete(
        &self,
        job_id: i64,
        worker_id: &str,
        result: serde_json::Value,
    ) -> ApiResult<Job> {
        let mut inner = self.inner.lock();
        let job = inner.job_mut(job_id)?;
        if job.status != JobStatus::Leased || job.lease_owner.as_deref() != Some(worker_id) {
            return Err(ApiError::new(ErrorCode::LeaseLost));
        }
        job.status = JobStatus::Done;
        job.attempts += 1;
        job.lease_owner = None;
        job.lease_expiry = None;
        job.updated_at = Utc::now();
        let done = job.clone();

        inner.active.remove(&done.dedup_key());
        inner.push_event(
            JobEvent::new(job_id, JobEventKind::Completed, "completed")
                .with_payload(result),
        );
        debug!(job_id, worker = worker_id, "job completed");
        Ok(done)
    }

    async fn fail(&self, job_id: i64, worker_id: &str, error_message: &str) -> ApiResult<Job> {
        let mut inner = self.inner.lock();
        let job = inner.job_mut(job_id)?;
        if job.status != JobStatus::Leased || job.lease_owner.as_deref() != Some(worker_id) {
            return Err(ApiError::new(ErrorCode::LeaseLost));
        }
        job.attempts += 1;
        job.lease_owner = None;
        job.lease_expiry = None;
        job.last_error = Some(error_message.to_string());
        job.updated_at = Utc::now();
        job.status = if job.attempts < job.max_attempts {
            JobStatus::Pending
        } else {
            JobStatus::Failed
        };
        let failed = job.clone();

        if failed.status == JobStatus::Failed {
            inner.active.remove(&failed.dedup_key());
        }
        inner.push_event(JobEvent::new(job_id, JobEventKind::Failed, error_message));
        debug!(
            job_id,
            worker = worker_id,
            attempts = failed.attempts,
            terminal = failed.status == JobStatus::Failed,
            "job failed"
        );
        Ok(failed)
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>) -> ApiResult<Vec<Job>> {
        let mut inner = self.inner.lock();
        let expired: Vec<i64> = inner
            .jobs
            .values()
            .filter(|job| job.lease_expired(now))
            .map(|job| job.id)
            .collect();

        let mut reclaimed = Vec::with_capacity(expired.len());
        for job_id in expired {
            let job = inner.job_mut(job_id)?;
            let lost_owner = job.lease_owner.take().unwrap_or_default();
            job.attempts += 1;
            job.lease_expiry = None;
            job.updated_at = now;
            job.status = if job.attempts < job.max_attempts {
                JobStatus::Pending
            } else {
                JobStatus::Failed
            };
            if job.status == JobStatus::Failed {
                job.last_error
                    .get_or_insert_with(|| "lease expired at attempt cap".to_string());
            }
            let swept = job.clone();
            if swept.status == JobStatus::Failed {
                inner.active.remove(&swept.dedup_key());
            }
            inner.push_event(JobEvent::new(
                job_id,
                JobEventKind::ExpiredReclaimed,
                format!("lease held by {} expired", lost_owner),
            ));
            reclaimed.push(swept);
        }
        Ok(reclaimed)
    }

    async fn get(&self, job_id: i64) -> ApiResult<Job> {
        self.inner
            .lock()
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("job {} does not exist", job_id)))
    }

    async fn events(&self, job_id: i64) -> ApiResult<Vec<JobEvent>> {
        Ok(self
            .inner
            .lock()
            .events
            .get(&job_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append_progress(
        &self,
        job_id: i64,
        stage: ProgressStage,
        message: &str,
    ) -> ApiResult<()> {
        let mut inner = self.inner.lock();
        if !inner.jobs.contains_key(&job_id) {
            return Err(ApiError::not_found(format!("job {} does not exist", job_id)));
        }
        inner.push_event(
            JobEvent::new(job_id, JobEventKind::Progress, message)
                .with_payload(serde_json::json!({ "stage": stage.as_str() })),
        );
        Ok(())
    }

    async fn pending_count(&self) -> usize {
        self.inner
            .lock()
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Pending)
            .count()
    }

    async fn purge_terminal_for_targets(&self, target_ids: &[i64]) -> ApiResult<usize> {
        let mut inner = self.inner.lock();
        let doomed: Vec<i64> = inner
            .jobs
            .values()
            .filter(|job| job.status.is_terminal() && target_ids.contains(&job.target_entity_id))
            .map(|job| job.id)
            .collect();
        for job_id in &doomed {
            if let Some(job) = inner.jobs.remove(job_id) {
                inner.active.remove(&job.dedup_key());
            }
            inner.events.remove(job_id);
        }
        Ok(doomed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KINDS: &[JobKind] = &[JobKind::ModelThumbnail];

    #[tokio::test]
    async fn enqueue_deduplicates_active_jobs() {
        let queue = MemoryJobQueue::new();
        let (first, new1) = queue
            .enqueue(JobKind::ModelThumbnail, 1, "h", serde_json::json!({}), 3)
            .await
            .unwrap();
        let (second, new2) = queue
            .enqueue(JobKind::ModelThumbnail, 1, "h", serde_json::json!({}), 3)
            .await
            .unwrap();
        assert!(new1);
        assert!(!new2);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn lease_sees_one_winner() {
        let queue = MemoryJobQueue::new();
        queue
            .enqueue(JobKind::ModelThumbnail, 1, "h", serde_json::json!({}), 3)
            .await
            .unwrap();
        let a = queue
            .lease("worker-a", KINDS, Duration::from_secs(60))
            .await
            .unwrap();
        let b = queue
            .lease("worker-b", KINDS, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(a.is_some());
        assert!(b.is_none());
    }

    #[tokio::test]
    async fn complete_requires_matching_owner() {
        let queue = MemoryJobQueue::new();
        let (job, _) = queue
            .enqueue(JobKind::ModelThumbnail, 1, "h", serde_json::json!({}), 3)
            .await
            .unwrap();
        queue
            .lease("worker-a", KINDS, Duration::from_secs(60))
            .await
            .unwrap();
        let err = queue
            .complete(job.id, "worker-b", serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::LeaseLost);
    }

    #[tokio::test]
    async fn fail_reenters_until_the_cap() {
        let queue = MemoryJobQueue::new();
        let (job, _) = queue
            .enqueue(JobKind::ModelThumbnail, 1, "h", serde_json::json!({}), 2)
            .await
            .unwrap();

        queue.lease("w", KINDS, Duration::from_secs(60)).await.unwrap();
        let after_first = queue.fail(job.id, "w", "render error").await.unwrap();
        assert_eq!(after_first.status, JobStatus::Pending);
        assert_eq!(after_first.attempts, 1);

        queue.lease("w", KINDS, Duration::from_secs(60)).await.unwrap();
        let after_second = queue.fail(job.id, "w", "render error").await.unwrap();
        assert_eq!(after_second.status, JobStatus::Failed);
        assert_eq!(after_second.attempts, 2);
        assert_eq!(after_second.last_error.as_deref(), Some("render error"));

        let failed_events: Vec<_> = queue
            .events(job.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == JobEventKind::Failed)
            .collect();
        assert_eq!(failed_events.len(), 2);
    }

    #[tokio::test]
    async fn reclaim_returns_expired_lease_to_pending() {
        let queue = MemoryJobQueue::new();
        let (job, _) = queue
            .enqueue(JobKind::ModelThumbnail, 1, "h", serde_json::json!({}), 3)
            .await
            .unwrap();
        queue
            .lease("crashed-worker", KINDS, Duration::from_millis(1))
            .await
            .unwrap();

        let later = Utc::now() + ChronoDuration::seconds(5);
        let reclaimed = queue.reclaim_expired(later).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].status, JobStatus::Pending);
        assert_eq!(reclaimed[0].attempts, 1);

        // A fresh worker can pick it up and finish it.
        let job2 = queue
            .lease("worker-b", KINDS, Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job2.id, job.id);
        let done = queue
            .complete(job.id, "worker-b", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Done);
        assert_eq!(done.attempts, 2);
    }

    #[tokio::test]
    async fn reclaim_never_advances_terminal_jobs() {
        let queue = MemoryJobQueue::new();
        let (job, _) = queue
            .enqueue(JobKind::ModelThumbnail, 1, "h", serde_json::json!({}), 3)
            .await
            .unwrap();
        queue.lease("w", KINDS, Duration::from_secs(60)).await.unwrap();
        queue.complete(job.id, "w", serde_json::json!({})).await.unwrap();

        let later = Utc::now() + ChronoDuration::days(1);
        let reclaimed = queue.reclaim_expired(later).await.unwrap();
        assert!(reclaimed.is_empty());
        assert_eq!(queue.get(job.id).await.unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn fifo_order_within_a_kind() {
        let queue = MemoryJobQueue::new();
        let (first, _) = queue
            .enqueue(JobKind::ModelThumbnail, 1, "h1", serde_json::json!({}), 3)
            .await
            .unwrap();
        let (second, _) = queue
            .enqueue(JobKind::ModelThumbnail, 2, "h2", serde_json::json!({}), 3)
            .await
            .unwrap();

        let a = queue
            .lease("w", KINDS, Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        let b = queue
            .lease("w", KINDS, Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(a.id, first.id);
        assert_eq!(b.id, second.id);
    }
}
