//! Model aggregate, versions, and derived thumbnail state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::BlobRef;

/// Model aggregate root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Tags written by the image classifier side channel.
    pub tags: Vec<String>,
    /// Description written by the image classifier side channel.
    pub description: Option<String>,
    /// Default texture set; must be associated with one of the model's versions.
    pub default_texture_set_id: Option<i64>,
    /// The currently active version, if any version exists.
    pub active_version_id: Option<i64>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Model {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            created_at: now,
            updated_at: now,
            tags: Vec::new(),
            description: None,
            default_texture_set_id: None,
            active_version_id: None,
            is_deleted: false,
            deleted_at: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// A single version in a model's lineage. Version numbers are 1-indexed and
/// strictly increasing within the parent model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVersion {
    pub id: i64,
    pub model_id: i64,
    pub version_number: u32,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Role-tagged blob references owned by this version.
    pub blobs: Vec<BlobRef>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ModelVersion {
    pub fn new(id: i64, model_id: i64, version_number: u32) -> Self {
        Self {
            id,
            model_id,
            version_number,
            description: None,
            created_at: Utc::now(),
            blobs: Vec::new(),
            is_deleted: false,
            deleted_at: None,
        }
    }

    /// Returns the primary-renderable blob hash, if attached.
    pub fn primary_blob_hash(&self) -> Option<&str> {
        self.blobs
            .iter()
            .find(|b| b.role == super::BlobRole::PrimaryRenderable)
            .map(|b| b.hash.as_str())
    }
}

/// Status of a derived thumbnail or waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ThumbnailStatus {
    #[default]
    Pending,
    Processing,
    Ready,
    Failed,
}

impl ThumbnailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThumbnailStatus::Pending => "Pending",
            ThumbnailStatus::Processing => "Processing",
            ThumbnailStatus::Ready => "Ready",
            ThumbnailStatus::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ThumbnailStatus::Ready | ThumbnailStatus::Failed)
    }
}

/// Owner of a derived thumbnail/waveform row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThumbnailOwner {
    ModelVersion(i64),
    TextureSet(i64),
    Sound(i64),
}

/// Derived-state row for a thumbnail or waveform.
///
/// Ready implies an output blob reference; Failed implies an error message.
/// Both are enforced by the terminal constructors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thumbnail {
    pub owner: ThumbnailOwner,
    pub status: ThumbnailStatus,
    pub output_blob_hash: Option<String>,
    /// Hash of the secondary output (animated preview), when produced.
    pub preview_blob_hash: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub size_bytes: Option<u64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Thumbnail {
    /// Creates a fresh pending row.
    pub fn pending(owner: ThumbnailOwner) -> Self {
        Self {
            owner,
            status: ThumbnailStatus::Pending,
            output_blob_hash: None,
            preview_blob_hash: None,
            width: None,
            height: None,
            size_bytes: None,
            error_message: None,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    /// Transitions to Processing, preserving the creation timestamp.
    pub fn mark_processing(&mut self) {
        self.status = ThumbnailStatus::Processing;
    }

    /// Terminal transition to Ready with the output reference.
    pub fn mark_ready(
        &mut self,
        output_blob_hash: String,
        preview_blob_hash: Option<String>,
        width: u32,
        height: u32,
        size_bytes: u64,
    ) {
        self.status = ThumbnailStatus::Ready;
        self.output_blob_hash = Some(output_blob_hash);
        self.preview_blob_hash = preview_blob_hash;
        self.width = Some(width);
        self.height = Some(height);
        self.size_bytes = Some(size_bytes);
        self.error_message = None;
        self.processed_at = Some(Utc::now());
    }

    /// Terminal transition to Failed with the error message.
    pub fn mark_failed(&mut self, error_message: String) {
        self.status = ThumbnailStatus::Failed;
        self.error_message = Some(error_message);
        self.processed_at = Some(Utc::now());
    }
}
