//! HTTP-backed queue and blob store for out-of-process workers.
//!
//! A remote worker runs the same [`super::WorkerLoop`] and processors as
//! the embedded pool, with these implementations standing in for the
//! in-process stores. Terminal calls travel through the worker API, so
//! completion side effects fire on the server.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::{ApiError, ApiResult, ErrorCode};
use crate::models::{Job, JobEvent, JobEventKind, JobKind, JobStatus, ProgressStage};
use crate::queue::JobQueue;
use crate::storage::{BlobStore, PutOutcome};

/// Converts a non-success response into the ApiError it carried.
async fn error_from_response(response: reqwest::Response) -> ApiError {
    let status = response.status();
    let body: Option<serde_json::Value> = response.json().await.ok();
    let code = body
        .as_ref()
        .and_then(|b| b["error"].as_str())
        .and_then(ErrorCode::from_str);
    let message = body
        .as_ref()
        .and_then(|b| b["message"].as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("worker API returned {}", status));
    match code {
        Some(code) => ApiError::with_message(code, message),
        None => ApiError::with_message(ErrorCode::TransientDependency, message),
    }
}

fn transport_error(e: reqwest::Error) -> ApiError {
    ApiError::with_message(ErrorCode::TransientDependency, e.to_string())
}

/// Parses the worker API's job body.
fn parse_job(body: &serde_json::Value) -> ApiResult<Job> {
    let parse_failure =
        || ApiError::with_message(ErrorCode::TransientDependency, "malformed job body");
    let kind = body["kind"]
        .as_str()
        .and_then(JobKind::from_str)
        .ok_or_else(parse_failure)?;
    let status = body["status"]
        .as_str()
        .and_then(JobStatus::from_str)
        .ok_or_else(parse_failure)?;
    let timestamp = |field: &str| -> DateTime<Utc> {
        body[field]
            .as_str()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now)
    };

    Ok(Job {
        id: body["id"].as_i64().ok_or_else(parse_failure)?,
        kind,
        target_entity_id: body["targetEntityId"].as_i64().ok_or_else(parse_failure)?,
        target_blob_hash: body["targetBlobHash"]
            .as_str()
            .ok_or_else(parse_failure)?
            .to_string(),
        status,
        attempts: body["attempts"].as_u64().unwrap_or(0) as u32,
        max_attempts: body["maxAttempts"].as_u64().unwrap_or(1) as u32,
        lease_owner: body["leaseOwner"].as_str().map(str::to_string),
        lease_expiry: body["leaseExpiry"]
            .as_str()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        last_error: body["lastError"].as_str().map(str::to_string),
        payload: body["payload"].clone(),
        created_at: timestamp("createdAt"),
        updated_at: timestamp("updatedAt"),
    })
}

fn not_remote(operation: &str) -> ApiError {
    ApiError::with_message(
        ErrorCode::NotAvailable,
        format!("{} is not part of the worker API", operation),
    )
}

/// Worker-side view of the queue, speaking the worker HTTP API.
pub struct RemoteQueue {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteQueue {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl JobQueue for RemoteQueue {
    async fn enqueue(
        &self,
        _kind: JobKind,
        _target_entity_id: i64,
        _target_blob_hash: &str,
        _payload: serde_json::Value,
        _max_attempts: u32,
    ) -> ApiResult<(Job, bool)> {
        Err(not_remote("enqueue"))
    }

    async fn lease(
        &self,
        worker_id: &str,
        accepted_kinds: &[JobKind],
        lease_duration: Duration,
    ) -> ApiResult<Option<Job>> {
        let kinds: Vec<&str> = accepted_kinds.iter().map(|k| k.as_str()).collect();
        let response = self
            .client
            .post(self.url("/jobs/lease"))
            .json(&serde_json::json!({
                "workerId": worker_id,
                "acceptedKinds": kinds,
                "leaseSeconds": lease_duration.as_secs(),
            }))
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let body: serde_json::Value = response.json().await.map_err(transport_error)?;
        Ok(Some(parse_job(&body)?))
    }

    async fn renew(&self, job_id: i64, worker_id: &str, extra: Duration) -> ApiResult<Job> {
        let response = self
            .client
            .post(self.url(&format!("/jobs/{}/renew", job_id)))
            .json(&serde_json::json!({
                "workerId": worker_id,
                "leaseSeconds": extra.as_secs(),
            }))
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let body: serde_json::Value = response.json().await.map_err(transport_error)?;
        parse_job(&body)
    }

    async fn complete(
        &self,
        job_id: i64,
        worker_id: &str,
        result: serde_json::Value,
    ) -> ApiResult<Job> {
        let response = self
            .client
            .post(self.url(&format!("/jobs/{}/complete", job_id)))
            .json(&serde_json::json!({ "workerId": worker_id, "result": result }))
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let body: serde_json::Value = response.json().await.map_err(transport_error)?;
        parse_job(&body)
    }

    async fn fail(&self, job_id: i64, worker_id: &str, error_message: &str) -> ApiResult<Job> {
        let response = self
            .client
            .post(self.url(&format!("/jobs/{}/fail", job_id)))
            .json(&serde_json::json!({ "workerId": worker_id, "error": error_message }))
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let body: serde_json::Value = response.json().await.map_err(transport_error)?;
        parse_job(&body)
    }

    async fn reclaim_expired(&self, _now: DateTime<Utc>) -> ApiResult<Vec<Job>> {
        Err(not_remote("reclaim_expired"))
    }

    async fn get(&self, job_id: i64) -> ApiResult<Job> {
        let response = self
            .client
            .get(self.url(&format!("/jobs/{}", job_id)))
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let body: serde_json::Value = response.json().await.map_err(transport_error)?;
        parse_job(&body)
    }

    async fn events(&self, job_id: i64) -> ApiResult<Vec<JobEvent>> {
        let response = self
            .client
            .get(self.url(&format!("/jobs/{}/events", job_id)))
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let body: serde_json::Value = response.json().await.map_err(transport_error)?;
        let items = body["items"].as_array().cloned().unwrap_or_default();
        Ok(items
            .iter()
            .filter_map(|item| {
                let kind = match item["kind"].as_str()? {
                    "ENQUEUED" => JobEventKind::Enqueued,
                    "LEASED" => JobEventKind::Leased,
                    "PROGRESS" => JobEventKind::Progress,
                    "COMPLETED" => JobEventKind::Completed,
                    "FAILED" => JobEventKind::Failed,
                    "EXPIRED_RECLAIMED" => JobEventKind::ExpiredReclaimed,
                    _ => return None,
                };
                let mut event =
                    JobEvent::new(job_id, kind, item["message"].as_str().unwrap_or_default());
                if let Some(raw) = item["timestamp"].as_str() {
                    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
                        event.timestamp = parsed.with_timezone(&Utc);
                    }
                }
                event.payload = item.get("payload").cloned();
                Some(event)
            })
            .collect())
    }

    async fn append_progress(
        &self,
        job_id: i64,
        stage: ProgressStage,
        message: &str,
    ) -> ApiResult<()> {
        let response = self
            .client
            .post(self.url(&format!("/jobs/{}/progress", job_id)))
            .json(&serde_json::json!({ "stage": stage.as_str(), "message": message }))
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(())
    }

    async fn pending_count(&self) -> usize {
        0
    }

    async fn purge_terminal_for_targets(&self, _target_ids: &[i64]) -> ApiResult<usize> {
        Err(not_remote("purge_terminal_for_targets"))
    }
}

/// Worker-side blob access through the content endpoints.
pub struct RemoteBlobStore {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl BlobStore for RemoteBlobStore {
    async fn put(&self, data: Bytes) -> ApiResult<PutOutcome> {
        let part = reqwest::multipart::Part::bytes(data.to_vec())
            .file_name("derived.svg")
            .mime_str("image/svg+xml")
            .map_err(|e| ApiError::with_message(ErrorCode::FatalInternal, e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let response = self
            .client
            .post(self.url("/blobs"))
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let body: serde_json::Value = response.json().await.map_err(transport_error)?;
        Ok(PutOutcome {
            hash: body["hash"].as_str().unwrap_or_default().to_string(),
            bytes_written: body["sizeBytes"].as_u64().unwrap_or(0),
            was_new: body["wasNew"].as_bool().unwrap_or(false),
        })
    }

    async fn get(&self, hash: &str) -> ApiResult<Bytes> {
        let response = self
            .client
            .get(self.url(&format!("/blobs/{}", hash)))
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        response.bytes().await.map_err(transport_error)
    }

    async fn exists(&self, hash: &str) -> bool {
        self.client
            .head(self.url(&format!("/blobs/{}", hash)))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn remove(&self, _hash: &str) -> ApiResult<()> {
        Err(not_remote("remove"))
    }

    async fn list_hashes(&self) -> ApiResult<Vec<String>> {
        Err(not_remote("list_hashes"))
    }
}
