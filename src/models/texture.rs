//! Texture sets and their per-channel texture mappings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Semantic type of a texture within a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureType {
    Albedo,
    Normal,
    Height,
    Displacement,
    Bump,
    Ao,
    Roughness,
    Metallic,
    Emissive,
    Alpha,
    /// Internal placeholder for a packed-channel source; hidden from
    /// external enumerations.
    SplitChannel,
}

impl TextureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextureType::Albedo => "ALBEDO",
            TextureType::Normal => "NORMAL",
            TextureType::Height => "HEIGHT",
            TextureType::Displacement => "DISPLACEMENT",
            TextureType::Bump => "BUMP",
            TextureType::Ao => "AO",
            TextureType::Roughness => "ROUGHNESS",
            TextureType::Metallic => "METALLIC",
            TextureType::Emissive => "EMISSIVE",
            TextureType::Alpha => "ALPHA",
            TextureType::SplitChannel => "SPLIT_CHANNEL",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ALBEDO" => Some(TextureType::Albedo),
            "NORMAL" => Some(TextureType::Normal),
            "HEIGHT" => Some(TextureType::Height),
            "DISPLACEMENT" => Some(TextureType::Displacement),
            "BUMP" => Some(TextureType::Bump),
            "AO" => Some(TextureType::Ao),
            "ROUGHNESS" => Some(TextureType::Roughness),
            "METALLIC" => Some(TextureType::Metallic),
            "EMISSIVE" => Some(TextureType::Emissive),
            "ALPHA" => Some(TextureType::Alpha),
            "SPLIT_CHANNEL" => Some(TextureType::SplitChannel),
            _ => None,
        }
    }

    /// HEIGHT, DISPLACEMENT, and BUMP are mutually exclusive within a set.
    pub fn is_elevation(&self) -> bool {
        matches!(
            self,
            TextureType::Height | TextureType::Displacement | TextureType::Bump
        )
    }
}

/// Source channel when a texture is extracted from a packed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceChannel {
    R,
    G,
    B,
    A,
}

impl SourceChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceChannel::R => "R",
            SourceChannel::G => "G",
            SourceChannel::B => "B",
            SourceChannel::A => "A",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "R" => Some(SourceChannel::R),
            "G" => Some(SourceChannel::G),
            "B" => Some(SourceChannel::B),
            "A" => Some(SourceChannel::A),
            _ => None,
        }
    }
}

/// Texture set aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextureSet {
    pub id: i64,
    /// Required display name, at most 200 characters.
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// UV scale applied when the set is bound; always positive.
    pub uv_scale: f64,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Maximum length of a texture set name.
pub const TEXTURE_SET_NAME_MAX: usize = 200;

impl TextureSet {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            created_at: now,
            updated_at: now,
            uv_scale: 1.0,
            is_deleted: false,
            deleted_at: None,
        }
    }
}

/// A single texture within a set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Texture {
    pub id: i64,
    pub texture_set_id: i64,
    pub blob_hash: String,
    pub texture_type: TextureType,
    /// Set when the texture is sourced from one channel of a packed image.
    pub source_channel: Option<SourceChannel>,
    pub created_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Texture {
    pub fn new(
        id: i64,
        texture_set_id: i64,
        blob_hash: impl Into<String>,
        texture_type: TextureType,
        source_channel: Option<SourceChannel>,
    ) -> Self {
        Self {
            id,
            texture_set_id,
            blob_hash: blob_hash.into(),
            texture_type,
            source_channel,
            created_at: Utc::now(),
            is_deleted: false,
            deleted_at: None,
        }
    }
}
