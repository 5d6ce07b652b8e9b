//! Durable queue job records and their audit events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of derivation work, identifying the processor that handles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    ModelThumbnail,
    SoundWaveform,
    TextureSetThumbnail,
    MeshAnalysis,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ModelThumbnail => "MODEL_THUMBNAIL",
            JobKind::SoundWaveform => "SOUND_WAVEFORM",
            JobKind::TextureSetThumbnail => "TEXTURESET_THUMBNAIL",
            JobKind::MeshAnalysis => "MESH_ANALYSIS",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "MODEL_THUMBNAIL" => Some(JobKind::ModelThumbnail),
            "SOUND_WAVEFORM" => Some(JobKind::SoundWaveform),
            "TEXTURESET_THUMBNAIL" => Some(JobKind::TextureSetThumbnail),
            "MESH_ANALYSIS" => Some(JobKind::MeshAnalysis),
            _ => None,
        }
    }
}

/// Job lifecycle status.
///
/// Transitions observe `PENDING → LEASED → (DONE | FAILED | PENDING)`;
/// PENDING→LEASED and LEASED→terminal are each atomic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum JobStatus {
    #[default]
    Pending,
    Leased,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Leased => "LEASED",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(JobStatus::Pending),
            "LEASED" => Some(JobStatus::Leased),
            "DONE" => Some(JobStatus::Done),
            "FAILED" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

/// Record in the durable job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub kind: JobKind,
    /// Entity the derivation targets (version id, set id, sound id).
    pub target_entity_id: i64,
    /// Content hash of the source blob.
    pub target_blob_hash: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Opaque worker id; set iff status == Leased.
    pub lease_owner: Option<String>,
    /// Lease expiry; set iff status == Leased.
    pub lease_expiry: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Processor-specific parameters.
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        id: i64,
        kind: JobKind,
        target_entity_id: i64,
        target_blob_hash: impl Into<String>,
        payload: serde_json::Value,
        max_attempts: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            target_entity_id,
            target_blob_hash: target_blob_hash.into(),
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts,
            lease_owner: None,
            lease_expiry: None,
            last_error: None,
            payload,
            created_at: now,
            updated_at: now,
        }
    }

    /// Dedup key for active jobs: one non-terminal job per derivation.
    pub fn dedup_key(&self) -> (JobKind, i64, String) {
        (self.kind, self.target_entity_id, self.target_blob_hash.clone())
    }

    /// Whether a lease held on this job has expired as of `now`.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Leased
            && self.lease_expiry.map(|e| e < now).unwrap_or(true)
    }
}

/// Kind of an append-only job audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobEventKind {
    Enqueued,
    Leased,
    Progress,
    Completed,
    Failed,
    ExpiredReclaimed,
}

impl JobEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobEventKind::Enqueued => "ENQUEUED",
            JobEventKind::Leased => "LEASED",
            JobEventKind::Progress => "PROGRESS",
            JobEventKind::Completed => "COMPLETED",
            JobEventKind::Failed => "FAILED",
            JobEventKind::ExpiredReclaimed => "EXPIRED_RECLAIMED",
        }
    }
}

/// Progress subkinds reported by processors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressStage {
    DownloadStarted,
    Loaded,
    FramesRendered,
    Encoded,
    Uploaded,
}

impl ProgressStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStage::DownloadStarted => "DOWNLOAD_STARTED",
            ProgressStage::Loaded => "LOADED",
            ProgressStage::FramesRendered => "FRAMES_RENDERED",
            ProgressStage::Encoded => "ENCODED",
            ProgressStage::Uploaded => "UPLOADED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "DOWNLOAD_STARTED" => Some(ProgressStage::DownloadStarted),
            "LOADED" => Some(ProgressStage::Loaded),
            "FRAMES_RENDERED" => Some(ProgressStage::FramesRendered),
            "ENCODED" => Some(ProgressStage::Encoded),
            "UPLOADED" => Some(ProgressStage::Uploaded),
            _ => None,
        }
    }
}

/// Append-only audit entry attached to a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: i64,
    pub kind: JobEventKind,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub payload: Option<serde_json::Value>,
}

impl JobEvent {
    pub fn new(job_id: i64, kind: JobEventKind, message: impl Into<String>) -> Self {
        Self {
            job_id,
            kind,
            timestamp: Utc::now(),
            message: message.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}
