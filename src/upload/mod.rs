//! Idempotent upload service: validate, hash, deduplicate, attach, emit.

use bytes::Bytes;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{ApiError, ApiResult, ErrorCode};
use crate::events::{Dispatcher, DomainEvent};
use crate::models::{
    AssetKind, BatchUpload, BlobRecord, BlobRef, BlobRole, SourceChannel, TextureType,
    UploadEntityKind,
};
use crate::storage::{BlobStore, CatalogStore};

/// Renderable formats accepted for a model's primary blob.
const MODEL_EXTENSIONS: &[&str] = &[
    "obj", "fbx", "gltf", "glb", "stl", "ply", "dae", "3ds", "blend",
];

/// Image formats accepted for textures, sprites, and thumbnails.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tga", "bmp", "webp", "gif", "svg"];

/// Audio formats accepted for sounds.
const SOUND_EXTENSIONS: &[&str] = &["wav", "mp3", "ogg", "flac"];

/// Returns whether the filename extension is allowed for the declared kind.
pub fn extension_allowed(kind: AssetKind, filename: &str) -> bool {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());
    let Some(extension) = extension else {
        // Project files may be extensionless archives; everything else
        // must carry a recognizable extension.
        return matches!(kind, AssetKind::ProjectFile | AssetKind::Other);
    };
    match kind {
        AssetKind::Model => MODEL_EXTENSIONS.contains(&extension.as_str()),
        AssetKind::Texture | AssetKind::Material | AssetKind::Image => {
            IMAGE_EXTENSIONS.contains(&extension.as_str())
        }
        AssetKind::Sound => SOUND_EXTENSIONS.contains(&extension.as_str()),
        AssetKind::ProjectFile | AssetKind::Other => !extension.is_empty(),
    }
}

/// Where an upload attaches in the asset graph. Together with the blob
/// hash this is the idempotency key: replaying the same upload returns the
/// same identifiers and creates no duplicate rows or jobs.
#[derive(Debug, Clone)]
pub enum UploadTarget {
    NewModel,
    NewModelVersion { model_id: i64 },
    ExistingVersion { version_id: i64, role: BlobRole },
    NewTextureSet { name: String },
    ExistingTextureSet {
        texture_set_id: i64,
        texture_type: TextureType,
        source_channel: Option<SourceChannel>,
    },
    NewSound,
    NewSprite,
}

/// A validated upload request.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub bytes: Bytes,
    pub filename: String,
    pub content_type: Option<String>,
    pub declared_kind: AssetKind,
    pub target: UploadTarget,
    /// Optional `(batch_tag, upload_kind)` correlation for reporting.
    pub batch: Option<(String, String)>,
}

/// Result of an upload.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub entity_id: i64,
    pub version_id: Option<i64>,
    pub blob_hash: String,
    pub deduplicated: bool,
    /// True when a new entity or version row was created; drives 201 vs 200.
    pub created: bool,
}

/// Upload service wiring the blob store, catalog, and event dispatcher.
pub struct UploadService {
    blobs: Arc<dyn BlobStore>,
    catalog: Arc<dyn CatalogStore>,
    dispatcher: Arc<Dispatcher>,
    config: Arc<Config>,
}

impl UploadService {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        catalog: Arc<dyn CatalogStore>,
        dispatcher: Arc<Dispatcher>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            blobs,
            catalog,
            dispatcher,
            config,
        }
    }

    /// Uploads a blob and attaches it per its target.
    pub async fn upload(&self, request: UploadRequest) -> ApiResult<UploadOutcome> {
        if request.bytes.is_empty() {
            return Err(ApiError::validation("upload body is empty"));
        }
        if request.bytes.len() as u64 > self.config.upload_max_bytes {
            return Err(ApiError::with_message(
                ErrorCode::PayloadTooLarge,
                format!(
                    "upload of {} bytes exceeds the {} byte cap",
                    request.bytes.len(),
                    self.config.upload_max_bytes
                ),
            ));
        }
        if !extension_allowed(request.declared_kind, &request.filename) {
            return Err(ApiError::with_message(
                ErrorCode::UnsupportedFormat,
                format!(
                    "{:?} is not an accepted {} file",
                    request.filename,
                    request.declared_kind.as_str()
                ),
            ));
        }

        // Persist the bytes first; entity rows are only written after the
        // blob is fully durable, so a cancelled upload never leaves a
        // half-attached version.
        let put = self.blobs.put(request.bytes.clone()).await?;
        let record = BlobRecord::new(
            put.hash.clone(),
            put.bytes_written,
            request.declared_kind,
            request.content_type.clone(),
            Some(request.filename.clone()),
        );
        self.catalog.upsert_blob_record(record).await?;

        let blob_was_new = put.was_new;
        let outcome = self.attach(&request, put.hash, blob_was_new).await?;

        if let (Some((batch_tag, upload_kind)), true) = (&request.batch, outcome.created) {
            let id = self.catalog.next_batch_upload_id().await;
            let (entity_kind, entity_id) = match (&request.target, outcome.version_id) {
                (UploadTarget::NewModel | UploadTarget::NewModelVersion { .. }, Some(vid)) => {
                    (UploadEntityKind::ModelVersion, vid)
                }
                (UploadTarget::ExistingVersion { .. }, Some(vid)) => {
                    (UploadEntityKind::ModelVersion, vid)
                }
                (
                    UploadTarget::NewTextureSet { .. } | UploadTarget::ExistingTextureSet { .. },
                    _,
                ) => (UploadEntityKind::TextureSet, outcome.entity_id),
                (UploadTarget::NewSound, _) => (UploadEntityKind::Sound, outcome.entity_id),
                (UploadTarget::NewSprite, _) => (UploadEntityKind::Sprite, outcome.entity_id),
                _ => (UploadEntityKind::Model, outcome.entity_id),
            };
            self.catalog
                .add_batch_upload(BatchUpload::new(
                    id,
                    batch_tag.clone(),
                    upload_kind.clone(),
                    outcome.blob_hash.clone(),
                    entity_kind,
                    entity_id,
                ))
                .await?;
        }

        Ok(outcome)
    }

    async fn attach(
        &self,
        request: &UploadRequest,
        hash: String,
        blob_was_new: bool,
    ) -> ApiResult<UploadOutcome> {
        match &request.target {
            UploadTarget::NewModel => {
                // Replay: the same bytes already back a live version.
                if let Some((model_id, version_id)) =
                    self.catalog.find_version_by_primary_hash(&hash).await?
                {
                    return Ok(UploadOutcome {
                        entity_id: model_id,
                        version_id: Some(version_id),
                        blob_hash: hash,
                        deduplicated: true,
                        created: false,
                    });
                }

                let name = display_name(&request.filename);
                let model = self.catalog.create_model(&name).await?;
                let version = self.catalog.new_version(model.id).await?;
                self.catalog
                    .attach_blob(version.id, BlobRef::new(&hash, BlobRole::PrimaryRenderable))
                    .await?;
                self.dispatcher
                    .publish(DomainEvent::ModelUploaded {
                        model_id: model.id,
                        version_id: version.id,
                        blob_hash: hash.clone(),
                        is_new_entity: true,
                    })
                    .await;
                // First activation; subscribers see prev = None.
                self.dispatcher
                    .publish(DomainEvent::ActiveVersionChanged {
                        model_id: model.id,
                        version_id: version.id,
                        prev_version_id: None,
                    })
                    .await;
                Ok(UploadOutcome {
                    entity_id: model.id,
                    version_id: Some(version.id),
                    blob_hash: hash,
                    deduplicated: !blob_was_new,
                    created: true,
                })
            }
            UploadTarget::NewModelVersion { model_id } => {
                let model = self.catalog.get_model(*model_id).await?;
                if model.is_deleted {
                    return Err(ApiError::not_found(format!(
                        "model {} does not exist",
                        model.id
                    )));
                }
                if let Some(version_id) = self
                    .catalog
                    .find_version_in_model_by_hash(model.id, &hash)
                    .await?
                {
                    return Ok(UploadOutcome {
                        entity_id: model.id,
                        version_id: Some(version_id),
                        blob_hash: hash,
                        deduplicated: true,
                        created: false,
                    });
                }

                let version = self.catalog.new_version(model.id).await?;
                self.catalog
                    .attach_blob(version.id, BlobRef::new(&hash, BlobRole::PrimaryRenderable))
                    .await?;
                self.dispatcher
                    .publish(DomainEvent::ModelUploaded {
                        model_id: model.id,
                        version_id: version.id,
                        blob_hash: hash.clone(),
                        is_new_entity: false,
                    })
                    .await;
                if model.active_version_id.is_none() {
                    // The model had no versions left, so this one became
                    // active on creation.
                    self.dispatcher
                        .publish(DomainEvent::ActiveVersionChanged {
                            model_id: model.id,
                            version_id: version.id,
                            prev_version_id: None,
                        })
                        .await;
                }
                Ok(UploadOutcome {
                    entity_id: model.id,
                    version_id: Some(version.id),
                    blob_hash: hash,
                    deduplicated: !blob_was_new,
                    created: true,
                })
            }
            UploadTarget::ExistingVersion { version_id, role } => {
                let version = self.catalog.get_version(*version_id).await?;
                let already = version
                    .blobs
                    .iter()
                    .any(|b| b.hash == hash && b.role == *role);
                if already {
                    return Ok(UploadOutcome {
                        entity_id: version.model_id,
                        version_id: Some(version.id),
                        blob_hash: hash,
                        deduplicated: true,
                        created: false,
                    });
                }

                self.catalog
                    .attach_blob(version.id, BlobRef::new(&hash, *role))
                    .await?;
                if *role == BlobRole::PrimaryRenderable {
                    self.dispatcher
                        .publish(DomainEvent::ModelUploaded {
                            model_id: version.model_id,
                            version_id: version.id,
                            blob_hash: hash.clone(),
                            is_new_entity: false,
                        })
                        .await;
                }
                Ok(UploadOutcome {
                    entity_id: version.model_id,
                    version_id: Some(version.id),
                    blob_hash: hash,
                    deduplicated: !blob_was_new,
                    created: true,
                })
            }
            UploadTarget::NewTextureSet { name } => {
                if let Some(set) = self.catalog.find_texture_set_with_blob(name, &hash).await? {
                    return Ok(UploadOutcome {
                        entity_id: set.id,
                        version_id: None,
                        blob_hash: hash,
                        deduplicated: true,
                        created: false,
                    });
                }

                let set = self.catalog.create_texture_set(name).await?;
                self.catalog
                    .add_texture(set.id, &hash, TextureType::Albedo, None)
                    .await?;
                self.dispatcher
                    .publish(DomainEvent::TextureSetChanged {
                        texture_set_id: set.id,
                        blob_hash: hash.clone(),
                    })
                    .await;
                Ok(UploadOutcome {
                    entity_id: set.id,
                    version_id: None,
                    blob_hash: hash,
                    deduplicated: !blob_was_new,
                    created: true,
                })
            }
            UploadTarget::ExistingTextureSet {
                texture_set_id,
                texture_type,
                source_channel,
            } => {
                let set = self.catalog.get_texture_set(*texture_set_id).await?;
                let replay = self
                    .catalog
                    .list_textures(set.id)
                    .await?
                    .iter()
                    .any(|t| {
                        t.blob_hash == hash
                            && t.texture_type == *texture_type
                            && t.source_channel == *source_channel
                    });
                if replay {
                    return Ok(UploadOutcome {
                        entity_id: set.id,
                        version_id: None,
                        blob_hash: hash,
                        deduplicated: true,
                        created: false,
                    });
                }

                self.catalog
                    .add_texture(set.id, &hash, *texture_type, *source_channel)
                    .await?;
                self.dispatcher
                    .publish(DomainEvent::TextureSetChanged {
                        texture_set_id: set.id,
                        blob_hash: hash.clone(),
                    })
                    .await;
                Ok(UploadOutcome {
                    entity_id: set.id,
                    version_id: None,
                    blob_hash: hash,
                    deduplicated: !blob_was_new,
                    created: true,
                })
            }
            UploadTarget::NewSound => {
                if let Some(sound) = self.catalog.find_sound_by_hash(&hash).await? {
                    return Ok(UploadOutcome {
                        entity_id: sound.id,
                        version_id: None,
                        blob_hash: hash,
                        deduplicated: true,
                        created: false,
                    });
                }

                let name = display_name(&request.filename);
                let sound = self.catalog.create_sound(&name, &hash).await?;
                self.dispatcher
                    .publish(DomainEvent::SoundUploaded {
                        sound_id: sound.id,
                        blob_hash: hash.clone(),
                        is_new_entity: true,
                    })
                    .await;
                Ok(UploadOutcome {
                    entity_id: sound.id,
                    version_id: None,
                    blob_hash: hash,
                    deduplicated: !blob_was_new,
                    created: true,
                })
            }
            UploadTarget::NewSprite => {
                if let Some(sprite) = self.catalog.find_sprite_by_hash(&hash).await? {
                    return Ok(UploadOutcome {
                        entity_id: sprite.id,
                        version_id: None,
                        blob_hash: hash,
                        deduplicated: true,
                        created: false,
                    });
                }

                let name = display_name(&request.filename);
                let sprite = self.catalog.create_sprite(&name, &hash).await?;
                self.dispatcher
                    .publish(DomainEvent::SpriteUploaded {
                        sprite_id: sprite.id,
                        blob_hash: hash.clone(),
                        is_new_entity: true,
                    })
                    .await;
                Ok(UploadOutcome {
                    entity_id: sprite.id,
                    version_id: None,
                    blob_hash: hash,
                    deduplicated: !blob_was_new,
                    created: true,
                })
            }
        }
    }
}

/// Derives a display name from the uploaded filename.
fn display_name(filename: &str) -> String {
    let stem = filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(filename);
    if stem.is_empty() {
        "untitled".to_string()
    } else {
        stem.to_string()
    }
}
