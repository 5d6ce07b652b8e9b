//! Packs, projects, and membership associations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User-facing container kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerKind {
    Pack,
    Project,
}

impl ContainerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerKind::Pack => "pack",
            ContainerKind::Project => "project",
        }
    }
}

/// Pack or Project. Containers do not own their members; membership is
/// association only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub id: i64,
    pub kind: ContainerKind,
    /// Unique within its kind.
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Container {
    pub fn new(id: i64, kind: ContainerKind, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            name: name.into(),
            description: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Kind of entity that can be a container member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberKind {
    Model,
    TextureSet,
    Sprite,
    Sound,
}

/// Explicit association entry between a container and a member entity.
/// Carrying its own timestamp keeps room for side-channel attributes
/// (role, ordering) without reshaping the relation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub container_id: i64,
    pub member_kind: MemberKind,
    pub member_id: i64,
    pub created_at: DateTime<Utc>,
}

impl Membership {
    pub fn new(container_id: i64, member_kind: MemberKind, member_id: i64) -> Self {
        Self {
            container_id,
            member_kind,
            member_id,
            created_at: Utc::now(),
        }
    }
}

/// Association between a texture set and a model version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextureSetBinding {
    pub texture_set_id: i64,
    pub model_version_id: i64,
    pub created_at: DateTime<Utc>,
}

impl TextureSetBinding {
    pub fn new(texture_set_id: i64, model_version_id: i64) -> Self {
        Self {
            texture_set_id,
            model_version_id,
            created_at: Utc::now(),
        }
    }
}
