//! Domain events and their side-effect dispatcher.
//!
//! Domain operations return events; the application layer publishes them
//! here after the originating write is durable. Advisory handler failures
//! are logged at warn and never bubble into the originating operation.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::hub::{EntityKind, Hub, ServerEvent};
use crate::models::{Job, JobKind, Thumbnail, ThumbnailOwner, ThumbnailStatus};
use crate::queue::JobQueue;
use crate::storage::CatalogStore;

/// Above this many pending jobs, `JobAdded` notifications are coalesced to
/// avoid fan-out storms. Enqueue itself always succeeds.
const JOB_ADDED_HIGH_WATER: usize = 1024;

/// Events raised by domain operations after a successful write.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    ModelUploaded {
        model_id: i64,
        version_id: i64,
        blob_hash: String,
        is_new_entity: bool,
    },
    SoundUploaded {
        sound_id: i64,
        blob_hash: String,
        is_new_entity: bool,
    },
    SpriteUploaded {
        sprite_id: i64,
        blob_hash: String,
        is_new_entity: bool,
    },
    TextureSetChanged {
        texture_set_id: i64,
        blob_hash: String,
    },
    ActiveVersionChanged {
        model_id: i64,
        version_id: i64,
        prev_version_id: Option<i64>,
    },
}

/// Derived output reported by a processor in the job result payload.
/// External workers post the same shape through the worker API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedOutput {
    pub poster_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_hash: Option<String>,
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
}

/// Publishes domain events to their side-effect handlers and owns the
/// job-lifecycle hooks shared by the worker loop and the worker HTTP API.
pub struct Dispatcher {
    queue: Arc<dyn JobQueue>,
    catalog: Arc<dyn CatalogStore>,
    hub: Arc<Hub>,
    max_attempts: u32,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        catalog: Arc<dyn CatalogStore>,
        hub: Arc<Hub>,
        max_attempts: u32,
    ) -> Self {
        Self {
            queue,
            catalog,
            hub,
            max_attempts,
        }
    }

    /// Publishes an event. Handlers run within the same logical operation;
    /// advisory failures are absorbed here.
    pub async fn publish(&self, event: DomainEvent) {
        match event {
            DomainEvent::ModelUploaded {
                version_id,
                blob_hash,
                ..
            } => {
                self.enqueue_derivation(JobKind::ModelThumbnail, version_id, &blob_hash)
                    .await;
            }
            DomainEvent::SoundUploaded {
                sound_id,
                blob_hash,
                ..
            } => {
                self.enqueue_derivation(JobKind::SoundWaveform, sound_id, &blob_hash)
                    .await;
            }
            DomainEvent::SpriteUploaded { sprite_id, .. } => {
                // Sprites have no v1 derivation; the event exists for
                // symmetry and future processors.
                debug!(sprite_id, "sprite uploaded");
            }
            DomainEvent::TextureSetChanged {
                texture_set_id,
                blob_hash,
            } => {
                self.enqueue_derivation(JobKind::TextureSetThumbnail, texture_set_id, &blob_hash)
                    .await;
            }
            DomainEvent::ActiveVersionChanged {
                model_id,
                version_id,
                prev_version_id,
            } => {
                let thumbnail = self
                    .catalog
                    .get_thumbnail(ThumbnailOwner::ModelVersion(version_id))
                    .await
                    .ok()
                    .flatten();
                let ready = thumbnail
                    .as_ref()
                    .map(|t| t.status == ThumbnailStatus::Ready)
                    .unwrap_or(false);
                let url = ready.then(|| format!("/models/{}/thumbnail/file", model_id));
                self.hub.publish_entity(
                    EntityKind::Model,
                    model_id,
                    ServerEvent::ActiveVersionChanged {
                        model_id,
                        version_id,
                        prev_version_id,
                        thumbnail_ready: ready,
                        thumbnail_url: url,
                    },
                );
            }
        }
    }

    /// Enqueues a derivation job, writes the pending derived-state row, and
    /// announces the job. Returns the job when one is active afterwards.
    pub async fn enqueue_derivation(
        &self,
        kind: JobKind,
        target_entity_id: i64,
        blob_hash: &str,
    ) -> Option<Job> {
        let enqueued = self
            .queue
            .enqueue(
                kind,
                target_entity_id,
                blob_hash,
                serde_json::json!({}),
                self.max_attempts,
            )
            .await;

        let (job, was_new) = match enqueued {
            Ok(pair) => pair,
            Err(e) => {
                warn!(
                    kind = kind.as_str(),
                    target_entity_id,
                    "failed to enqueue derivation job: {}",
                    e
                );
                return None;
            }
        };

        if was_new {
            if let Some(owner) = derived_owner(kind, target_entity_id) {
                if let Err(e) = self
                    .catalog
                    .update_thumbnail(
                        owner,
                        Box::new(|row| {
                            if row.status.is_terminal() {
                                *row = Thumbnail::pending(row.owner);
                            }
                        }),
                    )
                    .await
                {
                    warn!(job_id = job.id, "failed to write pending derived row: {}", e);
                }
            }

            let pending = self.queue.pending_count().await;
            if pending <= JOB_ADDED_HIGH_WATER {
                self.hub.publish_jobs(ServerEvent::JobAdded {
                    job_id: job.id,
                    kind: kind.as_str().to_string(),
                });
            } else {
                debug!(pending, "coalescing JobAdded notifications above high water");
            }
        }
        Some(job)
    }

    /// Completion side-effect hook. Fires after `Queue.Complete` succeeded:
    /// writes the derived-state row and broadcasts the status change.
    pub async fn job_completed(&self, job: &Job, result: &serde_json::Value) {
        self.hub
            .publish_jobs(ServerEvent::JobCompleted { job_id: job.id });

        let Some(owner) = derived_owner(job.kind, job.target_entity_id) else {
            return;
        };
        let output: DerivedOutput = match serde_json::from_value(result.clone()) {
            Ok(output) => output,
            Err(e) => {
                warn!(job_id = job.id, "job result payload is not a derived output: {}", e);
                return;
            }
        };

        // Record the derived blobs so the recycle bin and GC see them.
        // Uploads routed through POST /blobs already wrote richer records;
        // upsert keeps those.
        for hash in std::iter::once(&output.poster_hash).chain(output.preview_hash.iter()) {
            let record = crate::models::BlobRecord::new(
                hash.clone(),
                output.size_bytes,
                crate::models::AssetKind::Image,
                Some("image/svg+xml".to_string()),
                None,
            );
            if let Err(e) = self.catalog.upsert_blob_record(record).await {
                warn!(job_id = job.id, "failed to record derived blob: {}", e);
            }
        }

        let written = self
            .catalog
            .update_thumbnail(
                owner,
                Box::new({
                    let output = output.clone();
                    move |row| {
                        row.mark_ready(
                            output.poster_hash,
                            output.preview_hash,
                            output.width,
                            output.height,
                            output.size_bytes,
                        );
                    }
                }),
            )
            .await;
        if let Err(e) = written {
            warn!(job_id = job.id, "failed to write derived state: {}", e);
            return;
        }

        match owner {
            ThumbnailOwner::ModelVersion(version_id) => {
                let model_id = self
                    .catalog
                    .get_version(version_id)
                    .await
                    .map(|v| v.model_id)
                    .ok();
                let url = model_id
                    .map(|id| format!("/models/{}/thumbnail/file", id))
                    .unwrap_or_else(|| format!("/versions/{}/thumbnail/file", version_id));
                self.hub.publish_entity(
                    EntityKind::ModelVersion,
                    version_id,
                    ServerEvent::ThumbnailStatusChanged {
                        version_id,
                        status: ThumbnailStatus::Ready.as_str().to_string(),
                        url: Some(url),
                        error: None,
                    },
                );
            }
            ThumbnailOwner::TextureSet(set_id) => {
                self.hub.publish_entity(
                    EntityKind::TextureSet,
                    set_id,
                    ServerEvent::ThumbnailStatusChanged {
                        version_id: set_id,
                        status: ThumbnailStatus::Ready.as_str().to_string(),
                        url: Some(format!("/texture-sets/{}/thumbnail/file", set_id)),
                        error: None,
                    },
                );
            }
            ThumbnailOwner::Sound(sound_id) => {
                self.hub.publish_entity(
                    EntityKind::Sound,
                    sound_id,
                    ServerEvent::WaveformReady {
                        sound_id,
                        url: format!("/sounds/{}/waveform/file", sound_id),
                    },
                );
            }
        }
    }

    /// Marks a leased job's derived row as processing. Advisory.
    pub async fn job_leased(&self, job: &Job) {
        if let Some(owner) = derived_owner(job.kind, job.target_entity_id) {
            let _ = self
                .catalog
                .update_thumbnail(owner, Box::new(|row| row.mark_processing()))
                .await;
        }
    }

    /// Failure hook for a terminal (attempt-capped) failure.
    pub async fn job_failed_terminally(&self, job: &Job) {
        let reason = job
            .last_error
            .clone()
            .unwrap_or_else(|| "processing failed".to_string());
        self.hub.publish_jobs(ServerEvent::JobFailed {
            job_id: job.id,
            reason: reason.clone(),
        });

        let Some(owner) = derived_owner(job.kind, job.target_entity_id) else {
            return;
        };
        let written = self
            .catalog
            .update_thumbnail(
                owner,
                Box::new({
                    let reason = reason.clone();
                    move |row| row.mark_failed(reason)
                }),
            )
            .await;
        if let Err(e) = written {
            warn!(job_id = job.id, "failed to record derived failure: {}", e);
        }

        if let ThumbnailOwner::ModelVersion(version_id) = owner {
            self.hub.publish_entity(
                EntityKind::ModelVersion,
                version_id,
                ServerEvent::ThumbnailStatusChanged {
                    version_id,
                    status: ThumbnailStatus::Failed.as_str().to_string(),
                    url: None,
                    error: Some(reason),
                },
            );
        }
    }
}

/// Maps a job kind to the derived-state row it feeds.
fn derived_owner(kind: JobKind, target_entity_id: i64) -> Option<ThumbnailOwner> {
    match kind {
        JobKind::ModelThumbnail => Some(ThumbnailOwner::ModelVersion(target_entity_id)),
        JobKind::TextureSetThumbnail => Some(ThumbnailOwner::TextureSet(target_entity_id)),
        JobKind::SoundWaveform => Some(ThumbnailOwner::Sound(target_entity_id)),
        JobKind::MeshAnalysis => None,
    }
}

