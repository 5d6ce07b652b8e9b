//! Recycle-bin view over soft-deleted rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Entity kinds addressable through the recycle bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecycleKind {
    Model,
    ModelVersion,
    File,
    TextureSet,
    Texture,
    Sprite,
    Sound,
}

impl RecycleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecycleKind::Model => "model",
            RecycleKind::ModelVersion => "modelVersion",
            RecycleKind::File => "file",
            RecycleKind::TextureSet => "textureSet",
            RecycleKind::Texture => "texture",
            RecycleKind::Sprite => "sprite",
            RecycleKind::Sound => "sound",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "model" => Some(RecycleKind::Model),
            "modelVersion" => Some(RecycleKind::ModelVersion),
            "file" => Some(RecycleKind::File),
            "textureSet" => Some(RecycleKind::TextureSet),
            "texture" => Some(RecycleKind::Texture),
            "sprite" => Some(RecycleKind::Sprite),
            "sound" => Some(RecycleKind::Sound),
            _ => None,
        }
    }
}

/// Uniform (kind, id, name, deleted-at) tuple exposed by the bin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecycleEntry {
    pub kind: RecycleKind,
    /// For file entries this is 0 and `name` carries the blob hash.
    pub id: i64,
    pub name: String,
    pub deleted_at: DateTime<Utc>,
}

/// Grouped enumeration of everything currently in the bin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecycledItems {
    pub models: Vec<RecycleEntry>,
    pub model_versions: Vec<RecycleEntry>,
    pub files: Vec<RecycleEntry>,
    pub texture_sets: Vec<RecycleEntry>,
    pub textures: Vec<RecycleEntry>,
    pub sprites: Vec<RecycleEntry>,
    pub sounds: Vec<RecycleEntry>,
}
