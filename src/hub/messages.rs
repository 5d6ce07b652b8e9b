//! Wire messages for the push hub.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version stamped on every server→client message.
pub const SCHEMA_VERSION: u32 = 1;

/// Entity kinds addressable by group subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Model,
    ModelVersion,
    TextureSet,
    Sound,
    Sprite,
}

/// Subscription group addressed by publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKey {
    Entity(EntityKind, i64),
    /// Coarse updates for clients that skip per-model joins.
    AllModels,
    /// Queue-scoped notifications.
    Jobs,
}

/// Client→server commands, a tiny JSON RPC layer over the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientCommand {
    JoinGroup {
        #[serde(rename = "entityKind")]
        entity_kind: EntityKind,
        #[serde(rename = "entityId")]
        entity_id: i64,
    },
    LeaveGroup {
        #[serde(rename = "entityKind")]
        entity_kind: EntityKind,
        #[serde(rename = "entityId")]
        entity_id: i64,
    },
    JoinAllModelsGroup,
    JoinJobsGroup,
}

/// Server→client event bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    ThumbnailStatusChanged {
        #[serde(rename = "versionId")]
        version_id: i64,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    WaveformReady {
        #[serde(rename = "soundId")]
        sound_id: i64,
        url: String,
    },
    ActiveVersionChanged {
        #[serde(rename = "modelId")]
        model_id: i64,
        #[serde(rename = "versionId")]
        version_id: i64,
        #[serde(rename = "prevVersionId", skip_serializing_if = "Option::is_none")]
        prev_version_id: Option<i64>,
        #[serde(rename = "thumbnailReady")]
        thumbnail_ready: bool,
        #[serde(rename = "thumbnailUrl", skip_serializing_if = "Option::is_none")]
        thumbnail_url: Option<String>,
    },
    JobAdded {
        #[serde(rename = "jobId")]
        job_id: i64,
        kind: String,
    },
    JobCompleted {
        #[serde(rename = "jobId")]
        job_id: i64,
    },
    JobFailed {
        #[serde(rename = "jobId")]
        job_id: i64,
        reason: String,
    },
}

/// Envelope carrying the schema version and a monotonic timestamp so
/// clients can drop stale notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: ServerEvent,
}

impl ServerMessage {
    pub fn new(event: ServerEvent) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            timestamp: Utc::now(),
            event,
        }
    }
}
