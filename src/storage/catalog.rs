//! Asset catalog: entities, versions, memberships, and derived state.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::{ApiError, ApiResult, ErrorCode};
use crate::models::{
    BatchUpload, BlobRecord, BlobRef, Container, ContainerKind, MemberKind, Membership, Model,
    ModelVersion, RecycleEntry, RecycleKind, RecycledItems, Sound, Sprite, Texture, TextureSet,
    TextureSetBinding, TextureType, Thumbnail, ThumbnailOwner, SourceChannel,
    TEXTURE_SET_NAME_MAX,
};

/// A page of results with the total row count across all pages.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: usize,
    pub page: usize,
    pub page_size: usize,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> usize {
        if self.page_size == 0 {
            return 0;
        }
        self.total_count.div_ceil(self.page_size)
    }
}

/// Membership filters for model listings.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelFilter {
    pub pack_id: Option<i64>,
    pub project_id: Option<i64>,
    pub texture_set_id: Option<i64>,
}

/// Entity ids whose queue rows should be purged alongside a catalog purge.
#[derive(Debug, Clone, Default)]
pub struct PurgeOutcome {
    pub job_target_ids: Vec<i64>,
}

/// Trait for the asset graph store.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    // Blob records
    async fn upsert_blob_record(&self, record: BlobRecord) -> ApiResult<BlobRecord>;
    async fn get_blob_record(&self, hash: &str) -> ApiResult<BlobRecord>;

    // Models and versions
    async fn create_model(&self, name: &str) -> ApiResult<Model>;
    async fn get_model(&self, id: i64) -> ApiResult<Model>;
    async fn list_models(
        &self,
        filter: ModelFilter,
        page: usize,
        page_size: usize,
    ) -> ApiResult<Page<Model>>;
    /// Allocates `max(existing) + 1` under the per-model lock. The first
    /// version becomes active automatically.
    async fn new_version(&self, model_id: i64) -> ApiResult<ModelVersion>;
    async fn get_version(&self, id: i64) -> ApiResult<ModelVersion>;
    async fn list_versions(&self, model_id: i64) -> ApiResult<Vec<ModelVersion>>;
    async fn attach_blob(&self, version_id: i64, blob_ref: BlobRef) -> ApiResult<ModelVersion>;
    /// Atomically repoints the active version. Returns the previous pointer.
    async fn set_active_version(&self, model_id: i64, version_id: i64)
        -> ApiResult<Option<i64>>;
    async fn set_default_texture_set(
        &self,
        model_id: i64,
        texture_set_id: Option<i64>,
    ) -> ApiResult<()>;

    // Idempotency lookups
    async fn find_version_by_primary_hash(&self, hash: &str) -> ApiResult<Option<(i64, i64)>>;
    async fn find_version_in_model_by_hash(
        &self,
        model_id: i64,
        hash: &str,
    ) -> ApiResult<Option<i64>>;
    async fn find_sound_by_hash(&self, hash: &str) -> ApiResult<Option<Sound>>;
    async fn find_sprite_by_hash(&self, hash: &str) -> ApiResult<Option<Sprite>>;
    async fn find_texture_set_with_blob(
        &self,
        name: &str,
        hash: &str,
    ) -> ApiResult<Option<TextureSet>>;

    // Texture sets
    async fn create_texture_set(&self, name: &str) -> ApiResult<TextureSet>;
    async fn get_texture_set(&self, id: i64) -> ApiResult<TextureSet>;
    async fn add_texture(
        &self,
        set_id: i64,
        blob_hash: &str,
        texture_type: TextureType,
        source_channel: Option<SourceChannel>,
    ) -> ApiResult<Texture>;
    /// Textures of a set. SPLIT_CHANNEL placeholders are included; external
    /// enumerations filter them out at the handler.
    async fn list_textures(&self, set_id: i64) -> ApiResult<Vec<Texture>>;
    async fn bind_texture_set(&self, set_id: i64, version_id: i64) -> ApiResult<()>;
    /// Texture sets bound to any of the model's versions.
    async fn model_texture_sets(&self, model_id: i64) -> ApiResult<Vec<i64>>;

    // Sounds and sprites
    async fn create_sound(&self, name: &str, blob_hash: &str) -> ApiResult<Sound>;
    async fn get_sound(&self, id: i64) -> ApiResult<Sound>;
    async fn create_sprite(&self, name: &str, blob_hash: &str) -> ApiResult<Sprite>;
    async fn get_sprite(&self, id: i64) -> ApiResult<Sprite>;

    // Containers and membership
    async fn create_container(
        &self,
        kind: ContainerKind,
        name: &str,
        description: Option<String>,
    ) -> ApiResult<Container>;
    async fn get_container(&self, id: i64) -> ApiResult<Container>;
    async fn add_member(
        &self,
        container_id: i64,
        member_kind: MemberKind,
        member_id: i64,
    ) -> ApiResult<()>;
    async fn remove_member(
        &self,
        container_id: i64,
        member_kind: MemberKind,
        member_id: i64,
    ) -> ApiResult<()>;

    // Derived state
    async fn put_thumbnail(&self, thumbnail: Thumbnail) -> ApiResult<()>;
    async fn get_thumbnail(&self, owner: ThumbnailOwner) -> ApiResult<Option<Thumbnail>>;
    /// Applies `update` to the existing row, or to a fresh pending row when
    /// none exists yet.
    async fn update_thumbnail(
        &self,
        owner: ThumbnailOwner,
        update: Box<dyn for<'a> FnOnce(&'a mut Thumbnail) + Send + 'static>,
    ) -> ApiResult<Thumbnail>;

    // Batch uploads
    async fn add_batch_upload(&self, record: BatchUpload) -> ApiResult<()>;
    async fn list_batch_uploads(&self, batch_tag: &str) -> ApiResult<Vec<BatchUpload>>;
    async fn next_batch_upload_id(&self) -> i64;

    // Recycle bin
    async fn soft_delete(&self, kind: RecycleKind, id: i64) -> ApiResult<()>;
    async fn soft_delete_file(&self, hash: &str) -> ApiResult<()>;
    async fn restore(&self, kind: RecycleKind, id: i64) -> ApiResult<()>;
    async fn restore_file(&self, hash: &str) -> ApiResult<()>;
    async fn list_recycled(&self) -> ApiResult<RecycledItems>;
    /// Permanently removes a recycled row and its owned rows. Fails with
    /// PRECONDITION when the row is not in the bin.
    async fn purge(&self, kind: RecycleKind, id: i64) -> ApiResult<PurgeOutcome>;
    async fn purge_file(&self, hash: &str) -> ApiResult<()>;

    /// Hashes referenced by any live row; everything else is GC-eligible.
    async fn referenced_hashes(&self) -> ApiResult<std::collections::HashSet<String>>;
}

/// In-memory implementation of the catalog.
pub struct MemoryCatalog {
    blobs: DashMap<String, BlobRecord>,
    models: DashMap<i64, Model>,
    versions: DashMap<i64, ModelVersion>,
    /// model id -> version ids in creation order.
    model_versions: DashMap<i64, Vec<i64>>,
    texture_sets: DashMap<i64, TextureSet>,
    textures: DashMap<i64, Texture>,
    /// set id -> texture ids.
    set_textures: DashMap<i64, Vec<i64>>,
    bindings: RwLock<Vec<TextureSetBinding>>,
    sounds: DashMap<i64, Sound>,
    sprites: DashMap<i64, Sprite>,
    containers: DashMap<i64, Container>,
    memberships: RwLock<Vec<Membership>>,
    thumbnails: DashMap<ThumbnailOwner, Thumbnail>,
    batch_uploads: RwLock<Vec<BatchUpload>>,

    next_model_id: AtomicI64,
    next_version_id: AtomicI64,
    next_texture_set_id: AtomicI64,
    next_texture_id: AtomicI64,
    next_sound_id: AtomicI64,
    next_sprite_id: AtomicI64,
    next_container_id: AtomicI64,
    next_batch_id: AtomicI64,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self {
            blobs: DashMap::new(),
            models: DashMap::new(),
            versions: DashMap::new(),
            model_versions: DashMap::new(),
            texture_sets: DashMap::new(),
            textures: DashMap::new(),
            set_textures: DashMap::new(),
            bindings: RwLock::new(Vec::new()),
            sounds: DashMap::new(),
            sprites: DashMap::new(),
            containers: DashMap::new(),
            memberships: RwLock::new(Vec::new()),
            thumbnails: DashMap::new(),
            batch_uploads: RwLock::new(Vec::new()),
            next_model_id: AtomicI64::new(1),
            next_version_id: AtomicI64::new(1),
            next_texture_set_id: AtomicI64::new(1),
            next_texture_id: AtomicI64::new(1),
            next_sound_id: AtomicI64::new(1),
            next_sprite_id: AtomicI64::new(1),
            next_container_id: AtomicI64::new(1),
            next_batch_id: AtomicI64::new(1),
        }
    }

    fn member_ids(&self, container_id: i64, member_kind: MemberKind) -> Vec<i64> {
        self.memberships
            .read()
            .iter()
            .filter(|m| m.container_id == container_id && m.member_kind == member_kind)
            .map(|m| m.member_id)
            .collect()
    }
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn upsert_blob_record(&self, record: BlobRecord) -> ApiResult<BlobRecord> {
        match self.blobs.entry(record.hash.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => Ok(existing.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn get_blob_record(&self, hash: &str) -> ApiResult<BlobRecord> {
        self.blobs
            .get(hash)
            .map(|r| r.value().clone())
            .ok_or_else(|| ApiError::not_found(format!("no blob record for {}", hash)))
    }

    async fn create_model(&self, name: &str) -> ApiResult<Model> {
        let id = self.next_model_id.fetch_add(1, Ordering::SeqCst);
        let model = Model::new(id, name);
        self.models.insert(id, model.clone());
        self.model_versions.insert(id, Vec::new());
        Ok(model)
    }

    async fn get_model(&self, id: i64) -> ApiResult<Model> {
        self.models
            .get(&id)
            .map(|m| m.value().clone())
            .ok_or_else(|| ApiError::not_found(format!("model {} does not exist", id)))
    }

    async fn list_models(
        &self,
        filter: ModelFilter,
        page: usize,
        page_size: usize,
    ) -> ApiResult<Page<Model>> {
        let pack_members = filter
            .pack_id
            .map(|id| self.member_ids(id, MemberKind::Model));
        let project_members = filter
            .project_id
            .map(|id| self.member_ids(id, MemberKind::Model));
        let set_models: Option<Vec<i64>> = match filter.texture_set_id {
            Some(set_id) => {
                let version_ids: Vec<i64> = self
                    .bindings
                    .read()
                    .iter()
                    .filter(|b| b.texture_set_id == set_id)
                    .map(|b| b.model_version_id)
                    .collect();
                Some(
                    version_ids
                        .iter()
                        .filter_map(|vid| self.versions.get(vid).map(|v| v.model_id))
                        .collect(),
                )
            }
            None => None,
        };

        let mut matching: Vec<Model> = self
            .models
            .iter()
            .filter(|entry| {
                let model = entry.value();
                if model.is_deleted {
                    return false;
                }
                if let Some(ref ids) = pack_members {
                    if !ids.contains(&model.id) {
                        return false;
                    }
                }
                if let Some(ref ids) = project_members {
                    if !ids.contains(&model.id) {
                        return false;
                    }
                }
                if let Some(ref ids) = set_models {
                    if !ids.contains(&model.id) {
                        return false;
                    }
                }
                true
            })
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by_key(|m| m.id);

        let total_count = matching.len();
        let page = page.max(1);
        let page_size = page_size.clamp(1, 500);
        let start = (page - 1).saturating_mul(page_size);
        let items = matching.into_iter().skip(start).take(page_size).collect();

        Ok(Page {
            items,
            total_count,
            page,
            page_size,
        })
    }

    async fn new_version(&self, model_id: i64) -> ApiResult<ModelVersion> {
        // The exclusive model entry is the per-model allocation lock: no
        // concurrent new_version for the same model can interleave here.
        let mut model = self
            .models
            .get_mut(&model_id)
            .ok_or_else(|| ApiError::not_found(format!("model {} does not exist", model_id)))?;

        let mut ids = self.model_versions.entry(model_id).or_default();
        let next_number = ids
            .iter()
            .filter_map(|vid| self.versions.get(vid).map(|v| v.version_number))
            .max()
            .unwrap_or(0)
            + 1;

        let id = self.next_version_id.fetch_add(1, Ordering::SeqCst);
        let version = ModelVersion::new(id, model_id, next_number);
        self.versions.insert(id, version.clone());
        ids.push(id);
        drop(ids);

        if model.active_version_id.is_none() {
            model.active_version_id = Some(id);
        }
        model.touch();
        Ok(version)
    }

    async fn get_version(&self, id: i64) -> ApiResult<ModelVersion> {
        self.versions
            .get(&id)
            .map(|v| v.value().clone())
            .ok_or_else(|| ApiError::not_found(format!("model version {} does not exist", id)))
    }

    async fn list_versions(&self, model_id: i64) -> ApiResult<Vec<ModelVersion>> {
        let ids = self
            .model_versions
            .get(&model_id)
            .map(|v| v.value().clone())
            .unwrap_or_default();
        let mut versions: Vec<ModelVersion> = ids
            .iter()
            .filter_map(|id| self.versions.get(id).map(|v| v.value().clone()))
            .collect();
        versions.sort_by_key(|v| v.version_number);
        Ok(versions)
    }

    async fn attach_blob(&self, version_id: i64, blob_ref: BlobRef) -> ApiResult<ModelVersion> {
        let mut version = self.versions.get_mut(&version_id).ok_or_else(|| {
            ApiError::not_found(format!("model version {} does not exist", version_id))
        })?;
        if !version.blobs.iter().any(|b| b.hash == blob_ref.hash && b.role == blob_ref.role) {
            version.blobs.push(blob_ref);
        }
        Ok(version.clone())
    }

    async fn set_active_version(
        &self,
        model_id: i64,
        version_id: i64,
    ) -> ApiResult<Option<i64>> {
        let belongs = self
            .versions
            .get(&version_id)
            .map(|v| v.model_id == model_id && !v.is_deleted)
            .unwrap_or(false);
        if !belongs {
            return Err(ApiError::precondition(format!(
                "version {} does not belong to model {}",
                version_id, model_id
            )));
        }
        let mut model = self
            .models
            .get_mut(&model_id)
            .ok_or_else(|| ApiError::not_found(format!("model {} does not exist", model_id)))?;
        let prev = model.active_version_id;
        model.active_version_id = Some(version_id);
        model.touch();
        Ok(prev)
    }

    async fn set_default_texture_set(
        &self,
        model_id: i64,
        texture_set_id: Option<i64>,
    ) -> ApiResult<()> {
        if let Some(set_id) = texture_set_id {
            let associated = self.model_texture_sets(model_id).await?;
            if !associated.contains(&set_id) {
                return Err(ApiError::precondition(format!(
                    "texture set {} is not associated with model {}",
                    set_id, model_id
                )));
            }
        }
        let mut model = self
            .models
            .get_mut(&model_id)
            .ok_or_else(|| ApiError::not_found(format!("model {} does not exist", model_id)))?;
        model.default_texture_set_id = texture_set_id;
        model.touch();
        Ok(())
    }

    async fn find_version_by_primary_hash(&self, hash: &str) -> ApiResult<Option<(i64, i64)>> {
        // Collect candidates first; checking model liveness while holding
        // a versions shard would invert the model -> versions lock order.
        let candidates: Vec<(i64, i64)> = self
            .versions
            .iter()
            .filter(|entry| {
                !entry.value().is_deleted && entry.value().primary_blob_hash() == Some(hash)
            })
            .map(|entry| (entry.value().model_id, entry.value().id))
            .collect();
        for (model_id, version_id) in candidates {
            let model_live = self
                .models
                .get(&model_id)
                .map(|m| !m.is_deleted)
                .unwrap_or(false);
            if model_live {
                return Ok(Some((model_id, version_id)));
            }
        }
        Ok(None)
    }

    async fn find_version_in_model_by_hash(
        &self,
        model_id: i64,
        hash: &str,
    ) -> ApiResult<Option<i64>> {
        let versions = self.list_versions(model_id).await?;
        Ok(versions
            .iter()
            .find(|v| !v.is_deleted && v.blobs.iter().any(|b| b.hash == hash))
            .map(|v| v.id))
    }

    async fn find_sound_by_hash(&self, hash: &str) -> ApiResult<Option<Sound>> {
        Ok(self
            .sounds
            .iter()
            .find(|e| !e.value().is_deleted && e.value().blob_hash == hash)
            .map(|e| e.value().clone()))
    }

    async fn find_sprite_by_hash(&self, hash: &str) -> ApiResult<Option<Sprite>> {
        Ok(self
            .sprites
            .iter()
            .find(|e| !e.value().is_deleted && e.value().blob_hash == hash)
            .map(|e| e.value().clone()))
    }

    async fn find_texture_set_with_blob(
        &self,
        name: &str,
        hash: &str,
    ) -> ApiResult<Option<TextureSet>> {
        let named_sets: Vec<TextureSet> = self
            .texture_sets
            .iter()
            .filter(|entry| !entry.value().is_deleted && entry.value().name == name)
            .map(|entry| entry.value().clone())
            .collect();
        for set in named_sets {
            let has_blob = self
                .list_textures(set.id)
                .await?
                .iter()
                .any(|t| t.blob_hash == hash);
            if has_blob {
                return Ok(Some(set));
            }
        }
        Ok(None)
    }

    async fn create_texture_set(&self, name: &str) -> ApiResult<TextureSet> {
        if name.is_empty() || name.len() > TEXTURE_SET_NAME_MAX {
            return Err(ApiError::validation(format!(
                "texture set name must be 1..={} characters",
                TEXTURE_SET_NAME_MAX
            )));
        }
        let id = self.next_texture_set_id.fetch_add(1, Ordering::SeqCst);
        let set = TextureSet::new(id, name);
        self.texture_sets.insert(id, set.clone());
        self.set_textures.insert(id, Vec::new());
        Ok(set)
    }

    async fn get_texture_set(&self, id: i64) -> ApiResult<TextureSet> {
        self.texture_sets
            .get(&id)
            .map(|s| s.value().clone())
            .ok_or_else(|| ApiError::not_found(format!("texture set {} does not exist", id)))
    }

    async fn add_texture(
        &self,
        set_id: i64,
        blob_hash: &str,
        texture_type: TextureType,
        source_channel: Option<SourceChannel>,
    ) -> ApiResult<Texture> {
        // Validate under the exclusive set-textures entry so two concurrent
        // adds cannot both pass the uniqueness checks.
        let mut ids = self
            .set_textures
            .get_mut(&set_id)
            .ok_or_else(|| ApiError::not_found(format!("texture set {} does not exist", set_id)))?;

        let existing: Vec<Texture> = ids
            .iter()
            .filter_map(|id| self.textures.get(id).map(|t| t.value().clone()))
            .filter(|t| !t.is_deleted)
            .collect();

        if texture_type.is_elevation()
            && existing
                .iter()
                .any(|t| t.texture_type.is_elevation() && t.texture_type != texture_type)
        {
            return Err(ApiError::precondition(
                "HEIGHT, DISPLACEMENT, and BUMP are mutually exclusive within a texture set",
            ));
        }
        let duplicate_mapping = existing.iter().any(|t| {
            t.blob_hash == blob_hash
                && t.source_channel == source_channel
                && t.texture_type != TextureType::SplitChannel
                && texture_type != TextureType::SplitChannel
        });
        if duplicate_mapping {
            return Err(ApiError::precondition(
                "a texture for this blob and source channel already exists in the set",
            ));
        }

        let id = self.next_texture_id.fetch_add(1, Ordering::SeqCst);
        let texture = Texture::new(id, set_id, blob_hash, texture_type, source_channel);
        self.textures.insert(id, texture.clone());
        ids.push(id);
        Ok(texture)
    }

    async fn list_textures(&self, set_id: i64) -> ApiResult<Vec<Texture>> {
        let ids = self
            .set_textures
            .get(&set_id)
            .map(|v| v.value().clone())
            .ok_or_else(|| ApiError::not_found(format!("texture set {} does not exist", set_id)))?;
        Ok(ids
            .iter()
            .filter_map(|id| self.textures.get(id).map(|t| t.value().clone()))
            .collect())
    }

    async fn bind_texture_set(&self, set_id: i64, version_id: i64) -> ApiResult<()> {
        if !self.texture_sets.contains_key(&set_id) {
            return Err(ApiError::not_found(format!(
                "texture set {} does not exist",
                set_id
            )));
        }
        if !self.versions.contains_key(&version_id) {
            return Err(ApiError::not_found(format!(
                "model version {} does not exist",
                version_id
            )));
        }
        let mut bindings = self.bindings.write();
        let already = bindings
            .iter()
            .any(|b| b.texture_set_id == set_id && b.model_version_id == version_id);
        if !already {
            bindings.push(TextureSetBinding::new(set_id, version_id));
        }
        Ok(())
    }

    async fn model_texture_sets(&self, model_id: i64) -> ApiResult<Vec<i64>> {
        let version_ids = self
            .model_versions
            .get(&model_id)
            .map(|v| v.value().clone())
            .ok_or_else(|| ApiError::not_found(format!("model {} does not exist", model_id)))?;
        let mut set_ids: Vec<i64> = self
            .bindings
            .read()
            .iter()
            .filter(|b| version_ids.contains(&b.model_version_id))
            .map(|b| b.texture_set_id)
            .collect();
        set_ids.sort_unstable();
        set_ids.dedup();
        Ok(set_ids)
    }

    async fn create_sound(&self, name: &str, blob_hash: &str) -> ApiResult<Sound> {
        let id = self.next_sound_id.fetch_add(1, Ordering::SeqCst);
        let sound = Sound::new(id, name, blob_hash);
        self.sounds.insert(id, sound.clone());
        Ok(sound)
    }

    async fn get_sound(&self, id: i64) -> ApiResult<Sound> {
        self.sounds
            .get(&id)
            .map(|s| s.value().clone())
            .ok_or_else(|| ApiError::not_found(format!("sound {} does not exist", id)))
    }

    async fn create_sprite(&self, name: &str, blob_hash: &str) -> ApiResult<Sprite> {
        let id = self.next_sprite_id.fetch_add(1, Ordering::SeqCst);
        let sprite = Sprite::new(id, name, blob_hash);
        self.sprites.insert(id, sprite.clone());
        Ok(sprite)
    }

    async fn get_sprite(&self, id: i64) -> ApiResult<Sprite> {
        self.sprites
            .get(&id)
            .map(|s| s.value().clone())
            .ok_or_else(|| ApiError::not_found(format!("sprite {} does not exist", id)))
    }

    async fn create_container(
        &self,
        kind: ContainerKind,
        name: &str,
        description: Option<String>,
    ) -> ApiResult<Container> {
        if name.is_empty() {
            return Err(ApiError::validation("container name is required"));
        }
        let clash = self
            .containers
            .iter()
            .any(|e| e.value().kind == kind && e.value().name == name);
        if clash {
            return Err(ApiError::with_message(
                ErrorCode::Conflict,
                format!("a {} named {:?} already exists", kind.as_str(), name),
            ));
        }
        let id = self.next_container_id.fetch_add(1, Ordering::SeqCst);
        let mut container = Container::new(id, kind, name);
        container.description = description;
        self.containers.insert(id, container.clone());
        Ok(container)
    }

    async fn get_container(&self, id: i64) -> ApiResult<Container> {
        self.containers
            .get(&id)
            .map(|c| c.value().clone())
            .ok_or_else(|| ApiError::not_found(format!("container {} does not exist", id)))
    }

    async fn add_member(
        &self,
        container_id: i64,
        member_kind: MemberKind,
        member_id: i64,
    ) -> ApiResult<()> {
        if !self.containers.contains_key(&container_id) {
            return Err(ApiError::not_found(format!(
                "container {} does not exist",
                container_id
            )));
        }
        let mut memberships = self.memberships.write();
        let already = memberships.iter().any(|m| {
            m.container_id == container_id
                && m.member_kind == member_kind
                && m.member_id == member_id
        });
        if !already {
            memberships.push(Membership::new(container_id, member_kind, member_id));
        }
        Ok(())
    }

    async fn remove_member(
        &self,
        container_id: i64,
        member_kind: MemberKind,
        member_id: i64,
    ) -> ApiResult<()> {
        self.memberships.write().retain(|m| {
            !(m.container_id == container_id
                && m.member_kind == member_kind
                && m.member_id == member_id)
        });
        Ok(())
    }

    async fn put_thumbnail(&self, thumbnail: Thumbnail) -> ApiResult<()> {
        self.thumbnails.insert(thumbnail.owner, thumbnail);
        Ok(())
    }

    async fn get_thumbnail(&self, owner: ThumbnailOwner) -> ApiResult<Option<Thumbnail>> {
        Ok(self.thumbnails.get(&owner).map(|t| t.value().clone()))
    }

    async fn update_thumbnail(
        &self,
        owner: ThumbnailOwner,
        update: Box<dyn for<'a> FnOnce(&'a mut Thumbnail) + Send + 'static>,
    ) -> ApiResult<Thumbnail> {
        let mut entry = self
            .thumbnails
            .entry(owner)
            .or_insert_with(|| Thumbnail::pending(owner));
        update(entry.value_mut());
        Ok(entry.value().clone())
    }

    async fn add_batch_upload(&self, record: BatchUpload) -> ApiResult<()> {
        self.batch_uploads.write().push(record);
        Ok(())
    }

    async fn list_batch_uploads(&self, batch_tag: &str) -> ApiResult<Vec<BatchUpload>> {
        Ok(self
            .batch_uploads
            .read()
            .iter()
            .filter(|b| b.batch_tag == batch_tag)
            .cloned()
            .collect())
    }

    async fn next_batch_upload_id(&self) -> i64 {
        self.next_batch_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn soft_delete(&self, kind: RecycleKind, id: i64) -> ApiResult<()> {
        let now = Utc::now();
        let found = match kind {
            RecycleKind::Model => self.models.get_mut(&id).map(|mut m| {
                m.is_deleted = true;
                m.deleted_at = Some(now);
            }),
            RecycleKind::ModelVersion => self.versions.get_mut(&id).map(|mut v| {
                v.is_deleted = true;
                v.deleted_at = Some(now);
            }),
            RecycleKind::TextureSet => self.texture_sets.get_mut(&id).map(|mut s| {
                s.is_deleted = true;
                s.deleted_at = Some(now);
            }),
            RecycleKind::Texture => self.textures.get_mut(&id).map(|mut t| {
                t.is_deleted = true;
                t.deleted_at = Some(now);
            }),
            RecycleKind::Sprite => self.sprites.get_mut(&id).map(|mut s| {
                s.is_deleted = true;
                s.deleted_at = Some(now);
            }),
            RecycleKind::Sound => self.sounds.get_mut(&id).map(|mut s| {
                s.is_deleted = true;
                s.deleted_at = Some(now);
            }),
            RecycleKind::File => None,
        };
        found.ok_or_else(|| {
            ApiError::not_found(format!("{} {} does not exist", kind.as_str(), id))
        })
    }

    async fn soft_delete_file(&self, hash: &str) -> ApiResult<()> {
        let mut record = self
            .blobs
            .get_mut(hash)
            .ok_or_else(|| ApiError::not_found(format!("no blob record for {}", hash)))?;
        record.is_deleted = true;
        record.deleted_at = Some(Utc::now());
        Ok(())
    }

    async fn restore(&self, kind: RecycleKind, id: i64) -> ApiResult<()> {
        let found = match kind {
            RecycleKind::Model => self.models.get_mut(&id).map(|mut m| {
                m.is_deleted = false;
                m.deleted_at = None;
            }),
            RecycleKind::ModelVersion => self.versions.get_mut(&id).map(|mut v| {
                v.is_deleted = false;
                v.deleted_at = None;
            }),
            RecycleKind::TextureSet => self.texture_sets.get_mut(&id).map(|mut s| {
                s.is_deleted = false;
                s.deleted_at = None;
            }),
            RecycleKind::Texture => self.textures.get_mut(&id).map(|mut t| {
                t.is_deleted = false;
                t.deleted_at = None;
            }),
            RecycleKind::Sprite => self.sprites.get_mut(&id).map(|mut s| {
                s.is_deleted = false;
                s.deleted_at = None;
            }),
            RecycleKind::Sound => self.sounds.get_mut(&id).map(|mut s| {
                s.is_deleted = false;
                s.deleted_at = None;
            }),
            RecycleKind::File => None,
        };
        found.ok_or_else(|| {
            ApiError::not_found(format!("{} {} does not exist", kind.as_str(), id))
        })
    }

    async fn restore_file(&self, hash: &str) -> ApiResult<()> {
        let mut record = self
            .blobs
            .get_mut(hash)
            .ok_or_else(|| ApiError::not_found(format!("no blob record for {}", hash)))?;
        record.is_deleted = false;
        record.deleted_at = None;
        Ok(())
    }

    async fn list_recycled(&self) -> ApiResult<RecycledItems> {
        let mut items = RecycledItems::default();
        for entry in self.models.iter() {
            let m = entry.value();
            if let (true, Some(deleted_at)) = (m.is_deleted, m.deleted_at) {
                items.models.push(RecycleEntry {
                    kind: RecycleKind::Model,
                    id: m.id,
                    name: m.name.clone(),
                    deleted_at,
                });
            }
        }
        for entry in self.versions.iter() {
            let v = entry.value();
            if let (true, Some(deleted_at)) = (v.is_deleted, v.deleted_at) {
                items.model_versions.push(RecycleEntry {
                    kind: RecycleKind::ModelVersion,
                    id: v.id,
                    name: format!("model {} v{}", v.model_id, v.version_number),
                    deleted_at,
                });
            }
        }
        for entry in self.blobs.iter() {
            let b = entry.value();
            if let (true, Some(deleted_at)) = (b.is_deleted, b.deleted_at) {
                items.files.push(RecycleEntry {
                    kind: RecycleKind::File,
                    id: 0,
                    name: b.hash.clone(),
                    deleted_at,
                });
            }
        }
        for entry in self.texture_sets.iter() {
            let s = entry.value();
            if let (true, Some(deleted_at)) = (s.is_deleted, s.deleted_at) {
                items.texture_sets.push(RecycleEntry {
                    kind: RecycleKind::TextureSet,
                    id: s.id,
                    name: s.name.clone(),
                    deleted_at,
                });
            }
        }
        for entry in self.textures.iter() {
            let t = entry.value();
            if let (true, Some(deleted_at)) = (t.is_deleted, t.deleted_at) {
                items.textures.push(RecycleEntry {
                    kind: RecycleKind::Texture,
                    id: t.id,
                    name: format!("{} ({})", t.texture_type.as_str(), t.blob_hash),
                    deleted_at,
                });
            }
        }
        for entry in self.sprites.iter() {
            let s = entry.value();
            if let (true, Some(deleted_at)) = (s.is_deleted, s.deleted_at) {
                items.sprites.push(RecycleEntry {
                    kind: RecycleKind::Sprite,
                    id: s.id,
                    name: s.name.clone(),
                    deleted_at,
                });
            }
        }
        for entry in self.sounds.iter() {
            let s = entry.value();
            if let (true, Some(deleted_at)) = (s.is_deleted, s.deleted_at) {
                items.sounds.push(RecycleEntry {
                    kind: RecycleKind::Sound,
                    id: s.id,
                    name: s.name.clone(),
                    deleted_at,
                });
            }
        }
        Ok(items)
    }

    async fn purge(&self, kind: RecycleKind, id: i64) -> ApiResult<PurgeOutcome> {
        let mut outcome = PurgeOutcome::default();
        match kind {
            RecycleKind::Model => {
                let deleted = self.models.get(&id).map(|m| m.is_deleted).unwrap_or(false);
                if !deleted {
                    return Err(ApiError::precondition(
                        "only recycled entries can be purged",
                    ));
                }
                let version_ids = self
                    .model_versions
                    .remove(&id)
                    .map(|(_, ids)| ids)
                    .unwrap_or_default();
                for vid in &version_ids {
                    self.versions.remove(vid);
                    self.thumbnails.remove(&ThumbnailOwner::ModelVersion(*vid));
                    self.bindings.write().retain(|b| b.model_version_id != *vid);
                }
                outcome.job_target_ids = version_ids;
                self.models.remove(&id);
                self.memberships
                    .write()
                    .retain(|m| !(m.member_kind == MemberKind::Model && m.member_id == id));
            }
            RecycleKind::ModelVersion => {
                let version = self
                    .versions
                    .get(&id)
                    .map(|v| v.value().clone())
                    .ok_or_else(|| ApiError::not_found(format!("model version {} does not exist", id)))?;
                if !version.is_deleted {
                    return Err(ApiError::precondition(
                        "only recycled entries can be purged",
                    ));
                }
                self.versions.remove(&id);
                let remaining: Vec<i64> = match self.model_versions.get_mut(&version.model_id) {
                    Some(mut ids) => {
                        ids.retain(|vid| *vid != id);
                        ids.clone()
                    }
                    None => Vec::new(),
                };
                if let Some(mut model) = self.models.get_mut(&version.model_id) {
                    if model.active_version_id == Some(id) {
                        // Keep the exactly-one-active invariant: promote
                        // the newest surviving version, if any.
                        model.active_version_id = remaining
                            .iter()
                            .filter_map(|vid| {
                                self.versions
                                    .get(vid)
                                    .filter(|v| !v.is_deleted)
                                    .map(|v| (v.version_number, *vid))
                            })
                            .max()
                            .map(|(_, vid)| vid);
                    }
                }
                self.thumbnails.remove(&ThumbnailOwner::ModelVersion(id));
                self.bindings.write().retain(|b| b.model_version_id != id);
                outcome.job_target_ids = vec![id];
            }
            RecycleKind::TextureSet => {
                let deleted = self
                    .texture_sets
                    .get(&id)
                    .map(|s| s.is_deleted)
                    .unwrap_or(false);
                if !deleted {
                    return Err(ApiError::precondition(
                        "only recycled entries can be purged",
                    ));
                }
                let texture_ids = self
                    .set_textures
                    .remove(&id)
                    .map(|(_, ids)| ids)
                    .unwrap_or_default();
                for tid in texture_ids {
                    self.textures.remove(&tid);
                }
                self.texture_sets.remove(&id);
                self.thumbnails.remove(&ThumbnailOwner::TextureSet(id));
                self.bindings.write().retain(|b| b.texture_set_id != id);
                self.memberships
                    .write()
                    .retain(|m| !(m.member_kind == MemberKind::TextureSet && m.member_id == id));
                for mut model in self.models.iter_mut() {
                    if model.default_texture_set_id == Some(id) {
                        model.default_texture_set_id = None;
                    }
                }
                outcome.job_target_ids = vec![id];
            }
            RecycleKind::Texture => {
                let deleted = self
                    .textures
                    .get(&id)
                    .map(|t| t.is_deleted)
                    .unwrap_or(false);
                if !deleted {
                    return Err(ApiError::precondition(
                        "only recycled entries can be purged",
                    ));
                }
                if let Some((_, texture)) = self.textures.remove(&id) {
                    if let Some(mut ids) = self.set_textures.get_mut(&texture.texture_set_id) {
                        ids.retain(|tid| *tid != id);
                    }
                }
            }
            RecycleKind::Sprite => {
                let deleted = self.sprites.get(&id).map(|s| s.is_deleted).unwrap_or(false);
                if !deleted {
                    return Err(ApiError::precondition(
                        "only recycled entries can be purged",
                    ));
                }
                self.sprites.remove(&id);
                self.memberships
                    .write()
                    .retain(|m| !(m.member_kind == MemberKind::Sprite && m.member_id == id));
            }
            RecycleKind::Sound => {
                let deleted = self.sounds.get(&id).map(|s| s.is_deleted).unwrap_or(false);
                if !deleted {
                    return Err(ApiError::precondition(
                        "only recycled entries can be purged",
                    ));
                }
                self.sounds.remove(&id);
                self.thumbnails.remove(&ThumbnailOwner::Sound(id));
                self.memberships
                    .write()
                    .retain(|m| !(m.member_kind == MemberKind::Sound && m.member_id == id));
                outcome.job_target_ids = vec![id];
            }
            RecycleKind::File => {
                return Err(ApiError::validation(
                    "file entries are purged by hash, not id",
                ));
            }
        }
        Ok(outcome)
    }

    async fn purge_file(&self, hash: &str) -> ApiResult<()> {
        let deleted = self
            .blobs
            .get(hash)
            .map(|b| b.is_deleted)
            .ok_or_else(|| ApiError::not_found(format!("no blob record for {}", hash)))?;
        if !deleted {
            return Err(ApiError::precondition(
                "only recycled entries can be purged",
            ));
        }
        self.blobs.remove(hash);
        Ok(())
    }

    async fn referenced_hashes(&self) -> ApiResult<std::collections::HashSet<String>> {
        let mut referenced = std::collections::HashSet::new();
        for entry in self.blobs.iter() {
            referenced.insert(entry.key().clone());
        }
        for entry in self.versions.iter() {
            for blob_ref in &entry.value().blobs {
                referenced.insert(blob_ref.hash.clone());
            }
        }
        for entry in self.textures.iter() {
            referenced.insert(entry.value().blob_hash.clone());
        }
        for entry in self.sounds.iter() {
            referenced.insert(entry.value().blob_hash.clone());
        }
        for entry in self.sprites.iter() {
            referenced.insert(entry.value().blob_hash.clone());
        }
        for entry in self.thumbnails.iter() {
            if let Some(hash) = &entry.value().output_blob_hash {
                referenced.insert(hash.clone());
            }
            if let Some(hash) = &entry.value().preview_blob_hash {
                referenced.insert(hash.clone());
            }
        }
        Ok(referenced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn version_numbers_are_gapless_and_first_is_active() {
        let catalog = MemoryCatalog::new();
        let model = catalog.create_model("crate").await.unwrap();
        let v1 = catalog.new_version(model.id).await.unwrap();
        let v2 = catalog.new_version(model.id).await.unwrap();
        assert_eq!(v1.version_number, 1);
        assert_eq!(v2.version_number, 2);
        let reread = catalog.get_model(model.id).await.unwrap();
        assert_eq!(reread.active_version_id, Some(v1.id));
    }

    #[tokio::test]
    async fn default_texture_set_requires_association() {
        let catalog = MemoryCatalog::new();
        let model = catalog.create_model("crate").await.unwrap();
        let version = catalog.new_version(model.id).await.unwrap();
        let set = catalog.create_texture_set("wood").await.unwrap();

        let err = catalog
            .set_default_texture_set(model.id, Some(set.id))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Precondition);

        catalog.bind_texture_set(set.id, version.id).await.unwrap();
        catalog
            .set_default_texture_set(model.id, Some(set.id))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn elevation_textures_are_mutually_exclusive() {
        let catalog = MemoryCatalog::new();
        let set = catalog.create_texture_set("rock").await.unwrap();
        catalog
            .add_texture(set.id, "h1", TextureType::Height, None)
            .await
            .unwrap();
        let err = catalog
            .add_texture(set.id, "h2", TextureType::Bump, None)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Precondition);
    }

    #[tokio::test]
    async fn channel_mapping_is_unique_per_blob() {
        let catalog = MemoryCatalog::new();
        let set = catalog.create_texture_set("packed").await.unwrap();
        catalog
            .add_texture(set.id, "packed1", TextureType::Roughness, Some(SourceChannel::R))
            .await
            .unwrap();
        let err = catalog
            .add_texture(set.id, "packed1", TextureType::Metallic, Some(SourceChannel::R))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Precondition);
        // A different channel of the same packed image is fine.
        catalog
            .add_texture(set.id, "packed1", TextureType::Metallic, Some(SourceChannel::G))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn purge_requires_recycled_state() {
        let catalog = MemoryCatalog::new();
        let model = catalog.create_model("crate").await.unwrap();
        let err = catalog.purge(RecycleKind::Model, model.id).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Precondition);

        catalog.soft_delete(RecycleKind::Model, model.id).await.unwrap();
        catalog.purge(RecycleKind::Model, model.id).await.unwrap();
        assert!(catalog.get_model(model.id).await.is_err());
    }
}
