//! Versionless single-blob entities: sounds and sprites.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sound asset backed by a single blob, with an optional derived waveform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sound {
    pub id: i64,
    pub name: String,
    pub blob_hash: String,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Sound {
    pub fn new(id: i64, name: impl Into<String>, blob_hash: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            blob_hash: blob_hash.into(),
            category: None,
            created_at: now,
            updated_at: now,
            is_deleted: false,
            deleted_at: None,
        }
    }
}

/// Sprite asset backed by a single blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sprite {
    pub id: i64,
    pub name: String,
    pub blob_hash: String,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Sprite {
    pub fn new(id: i64, name: impl Into<String>, blob_hash: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            blob_hash: blob_hash.into(),
            category: None,
            created_at: now,
            updated_at: now,
            is_deleted: false,
            deleted_at: None,
        }
    }
}
