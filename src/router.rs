//! Request routing.

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;

use crate::config::Config;
use crate::events::Dispatcher;
use crate::handlers;
use crate::hub::{ws_handler, Hub};
use crate::queue::JobQueue;
use crate::storage::{BlobStore, CatalogStore};
use crate::upload::UploadService;

/// Application state shared between handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub blobs: Arc<dyn BlobStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub queue: Arc<dyn JobQueue>,
    pub hub: Arc<Hub>,
    pub dispatcher: Arc<Dispatcher>,
    pub uploads: Arc<UploadService>,
}

/// Creates the main router.
pub fn create_router(state: AppState) -> Router {
    let upload_limit = state.config.upload_max_bytes as usize + 1024 * 1024;

    Router::new()
        // Models
        .route("/models", post(handlers::upload_model).get(handlers::list_models))
        .route(
            "/models/:id",
            get(handlers::get_model).delete(handlers::delete_model),
        )
        .route("/models/:id/versions", post(handlers::upload_model_version))
        .route("/models/:id/active-version", put(handlers::set_active_version))
        .route(
            "/models/:id/default-texture-set",
            put(handlers::set_default_texture_set),
        )
        .route("/models/:id/thumbnail", get(handlers::get_model_thumbnail))
        .route(
            "/models/:id/thumbnail/file",
            get(handlers::get_model_thumbnail_file),
        )
        .route(
            "/models/:id/thumbnail/regenerate",
            post(handlers::regenerate_model_thumbnail),
        )
        // Auxiliary files
        .route("/files", post(handlers::upload_file))
        // Texture sets
        .route("/texture-sets", post(handlers::upload_texture_set))
        .route("/texture-sets/:id/textures", get(handlers::list_textures))
        .route("/texture-sets/:id/bindings", post(handlers::bind_texture_set))
        .route(
            "/texture-sets/:id/thumbnail",
            get(handlers::get_texture_set_thumbnail),
        )
        .route(
            "/texture-sets/:id/thumbnail/file",
            get(handlers::get_texture_set_thumbnail_file),
        )
        // Sounds and sprites
        .route("/sounds", post(handlers::upload_sound))
        .route("/sounds/:id/waveform", get(handlers::get_sound_waveform))
        .route(
            "/sounds/:id/waveform/file",
            get(handlers::get_sound_waveform_file),
        )
        .route("/sprites", post(handlers::upload_sprite))
        // Containers and membership
        .route("/packs", post(handlers::create_pack))
        .route("/projects", post(handlers::create_project))
        .route(
            "/containers/:id/members",
            post(handlers::add_member).delete(handlers::remove_member),
        )
        // Content endpoints (worker blob access)
        .route("/blobs", post(handlers::put_blob))
        .route("/blobs/:hash", get(handlers::get_blob))
        // Worker API
        .route("/jobs/lease", post(handlers::lease_job))
        .route("/jobs/:id", get(handlers::get_job))
        .route("/jobs/:id/events", get(handlers::get_job_events))
        .route("/jobs/:id/renew", post(handlers::renew_job))
        .route("/jobs/:id/complete", post(handlers::complete_job))
        .route("/jobs/:id/fail", post(handlers::fail_job))
        .route("/jobs/:id/progress", post(handlers::report_progress))
        // Recycle bin
        .route("/recycled", get(handlers::list_recycled))
        .route(
            "/recycled/:kind/:id",
            delete(handlers::purge_recycled),
        )
        .route(
            "/recycled/:kind/:id/restore",
            post(handlers::restore_recycled),
        )
        // Batch-upload reporting
        .route("/uploads/batches/:tag", get(handlers::list_batch_uploads))
        // Push hub
        .route("/ws", get(ws_handler))
        .layer(DefaultBodyLimit::max(upload_limit))
        .with_state(state)
}
