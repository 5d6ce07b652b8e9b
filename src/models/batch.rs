//! Batch-upload correlation records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of entity a batched upload attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadEntityKind {
    Model,
    ModelVersion,
    TextureSet,
    Sound,
    Sprite,
}

impl UploadEntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadEntityKind::Model => "model",
            UploadEntityKind::ModelVersion => "modelVersion",
            UploadEntityKind::TextureSet => "textureSet",
            UploadEntityKind::Sound => "sound",
            UploadEntityKind::Sprite => "sprite",
        }
    }
}

/// Correlates independently uploaded blobs that the client considers one
/// logical batch. Reporting only; never on the hot path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchUpload {
    pub id: i64,
    /// Uploader-supplied batch tag.
    pub batch_tag: String,
    /// Uploader-supplied kind tag (e.g. "model", "texture").
    pub upload_kind: String,
    pub blob_hash: String,
    pub entity_kind: UploadEntityKind,
    pub entity_id: i64,
    pub created_at: DateTime<Utc>,
}

impl BatchUpload {
    pub fn new(
        id: i64,
        batch_tag: impl Into<String>,
        upload_kind: impl Into<String>,
        blob_hash: impl Into<String>,
        entity_kind: UploadEntityKind,
        entity_id: i64,
    ) -> Self {
        Self {
            id,
            batch_tag: batch_tag.into(),
            upload_kind: upload_kind.into(),
            blob_hash: blob_hash.into(),
            entity_kind,
            entity_id,
            created_at: Utc::now(),
        }
    }
}
