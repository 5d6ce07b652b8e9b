//! Blob records and content-addressing types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Logical kind declared for an uploaded blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetKind {
    Model,
    Texture,
    Material,
    ProjectFile,
    Sound,
    Image,
    Other,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Model => "MODEL",
            AssetKind::Texture => "TEXTURE",
            AssetKind::Material => "MATERIAL",
            AssetKind::ProjectFile => "PROJECT_FILE",
            AssetKind::Sound => "SOUND",
            AssetKind::Image => "IMAGE",
            AssetKind::Other => "OTHER",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "MODEL" => Some(AssetKind::Model),
            "TEXTURE" => Some(AssetKind::Texture),
            "MATERIAL" => Some(AssetKind::Material),
            "PROJECT_FILE" => Some(AssetKind::ProjectFile),
            "SOUND" => Some(AssetKind::Sound),
            "IMAGE" => Some(AssetKind::Image),
            "OTHER" => Some(AssetKind::Other),
            _ => None,
        }
    }
}

/// Role a blob plays within a model version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlobRole {
    PrimaryRenderable,
    ProjectSource,
    Auxiliary,
}

impl BlobRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlobRole::PrimaryRenderable => "primary-renderable",
            BlobRole::ProjectSource => "project-source",
            BlobRole::Auxiliary => "auxiliary",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "primary-renderable" => Some(BlobRole::PrimaryRenderable),
            "project-source" => Some(BlobRole::ProjectSource),
            "auxiliary" => Some(BlobRole::Auxiliary),
            _ => None,
        }
    }
}

/// Immutable record for a stored blob, keyed by its SHA-256.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobRecord {
    /// Lowercase hex SHA-256 of the content.
    pub hash: String,
    /// Content length in bytes.
    pub byte_length: u64,
    /// MIME hint supplied at upload time.
    pub mime_hint: Option<String>,
    /// Original filename hint supplied at upload time.
    pub filename_hint: Option<String>,
    /// Declared logical kind.
    pub kind: AssetKind,
    /// First-upload timestamp.
    pub created_at: DateTime<Utc>,
    /// Soft-delete flag for the file view of the recycle bin.
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl BlobRecord {
    pub fn new(
        hash: String,
        byte_length: u64,
        kind: AssetKind,
        mime_hint: Option<String>,
        filename_hint: Option<String>,
    ) -> Self {
        Self {
            hash,
            byte_length,
            mime_hint,
            filename_hint,
            kind,
            created_at: Utc::now(),
            is_deleted: false,
            deleted_at: None,
        }
    }
}

/// Role-tagged reference from a model version to a blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobRef {
    pub hash: String,
    pub role: BlobRole,
    pub attached_at: DateTime<Utc>,
}

impl BlobRef {
    pub fn new(hash: impl Into<String>, role: BlobRole) -> Self {
        Self {
            hash: hash.into(),
            role,
            attached_at: Utc::now(),
        }
    }
}
