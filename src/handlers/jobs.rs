//! Worker API: lease, renew, complete, fail.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::error::{ApiError, ApiResult};
use crate::models::{Job, JobKind, JobStatus};
use crate::queue::JobQueue;
use crate::router::AppState;

fn job_body(job: &Job) -> serde_json::Value {
    let mut body = json!({
        "id": job.id,
        "kind": job.kind.as_str(),
        "targetEntityId": job.target_entity_id,
        "targetBlobHash": job.target_blob_hash,
        "status": job.status.as_str(),
        "attempts": job.attempts,
        "maxAttempts": job.max_attempts,
        "payload": job.payload,
        "createdAt": job.created_at,
        "updatedAt": job.updated_at,
    });
    if let Some(owner) = &job.lease_owner {
        body["leaseOwner"] = json!(owner);
    }
    if let Some(expiry) = job.lease_expiry {
        body["leaseExpiry"] = json!(expiry);
    }
    if let Some(error) = &job.last_error {
        body["lastError"] = json!(error);
    }
    body
}

#[derive(Debug, Deserialize)]
pub struct LeaseBody {
    #[serde(rename = "workerId")]
    pub worker_id: String,
    #[serde(rename = "acceptedKinds")]
    pub accepted_kinds: Vec<String>,
    #[serde(rename = "leaseSeconds")]
    pub lease_seconds: Option<u64>,
}

/// POST /jobs/lease - pull one eligible job, or 204 when none.
pub async fn lease_job(
    State(state): State<AppState>,
    Json(body): Json<LeaseBody>,
) -> ApiResult<Response> {
    if body.worker_id.is_empty() {
        return Err(ApiError::validation("workerId is required"));
    }
    let kinds: Vec<JobKind> = body
        .accepted_kinds
        .iter()
        .map(|raw| {
            JobKind::from_str(raw)
                .ok_or_else(|| ApiError::validation(format!("unknown job kind {:?}", raw)))
        })
        .collect::<ApiResult<_>>()?;
    if kinds.is_empty() {
        return Err(ApiError::validation("acceptedKinds must not be empty"));
    }

    let duration = Duration::from_secs(
        body.lease_seconds
            .unwrap_or(state.config.lease_duration.as_secs()),
    );
    match state.queue.lease(&body.worker_id, &kinds, duration).await? {
        Some(job) => {
            state.dispatcher.job_leased(&job).await;
            Ok(Json(job_body(&job)).into_response())
        }
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

#[derive(Debug, Deserialize)]
pub struct RenewBody {
    #[serde(rename = "workerId")]
    pub worker_id: String,
    #[serde(rename = "leaseSeconds")]
    pub lease_seconds: Option<u64>,
}

/// POST /jobs/{id}/renew - extend a held lease.
pub async fn renew_job(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
    Json(body): Json<RenewBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let duration = Duration::from_secs(
        body.lease_seconds
            .unwrap_or(state.config.lease_duration.as_secs()),
    );
    let job = state.queue.renew(job_id, &body.worker_id, duration).await?;
    Ok(Json(job_body(&job)))
}

#[derive(Debug, Deserialize)]
pub struct CompleteBody {
    #[serde(rename = "workerId")]
    pub worker_id: String,
    pub result: Option<serde_json::Value>,
}

/// POST /jobs/{id}/complete - terminal success; fires the completion
/// side-effect hook after the queue accepts it.
pub async fn complete_job(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
    Json(body): Json<CompleteBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let result = body.result.unwrap_or_else(|| json!({}));
    let job = state
        .queue
        .complete(job_id, &body.worker_id, result.clone())
        .await?;
    state.dispatcher.job_completed(&job, &result).await;
    Ok(Json(job_body(&job)))
}

#[derive(Debug, Deserialize)]
pub struct FailBody {
    #[serde(rename = "workerId")]
    pub worker_id: String,
    pub error: String,
}

/// POST /jobs/{id}/fail - report a failed attempt; the job re-enters the
/// queue until the attempt cap.
pub async fn fail_job(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
    Json(body): Json<FailBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let job = state.queue.fail(job_id, &body.worker_id, &body.error).await?;
    if job.status == JobStatus::Failed {
        state.dispatcher.job_failed_terminally(&job).await;
    }
    Ok(Json(job_body(&job)))
}

#[derive(Debug, Deserialize)]
pub struct ProgressBody {
    pub stage: String,
    pub message: Option<String>,
}

/// POST /jobs/{id}/progress - record a processor progress event.
pub async fn report_progress(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
    Json(body): Json<ProgressBody>,
) -> ApiResult<StatusCode> {
    let stage = crate::models::ProgressStage::from_str(&body.stage)
        .ok_or_else(|| ApiError::validation(format!("unknown progress stage {:?}", body.stage)))?;
    state
        .queue
        .append_progress(job_id, stage, body.message.as_deref().unwrap_or(""))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /jobs/{id} - job record.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let job = state.queue.get(job_id).await?;
    Ok(Json(job_body(&job)))
}

/// GET /jobs/{id}/events - append-only audit log.
pub async fn get_job_events(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    state.queue.get(job_id).await?;
    let events = state.queue.events(job_id).await?;
    let items: Vec<serde_json::Value> = events
        .iter()
        .map(|e| {
            let mut body = json!({
                "jobId": e.job_id,
                "kind": e.kind.as_str(),
                "timestamp": e.timestamp,
                "message": e.message,
            });
            if let Some(payload) = &e.payload {
                body["payload"] = payload.clone();
            }
            body
        })
        .collect();
    Ok(Json(json!({ "items": items })))
}
