//! Derived-state endpoints: thumbnails and waveforms.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::models::{Model, Thumbnail, ThumbnailOwner, ThumbnailStatus};
use crate::router::AppState;
use crate::storage::{BlobStore, CatalogStore};

fn thumbnail_body(thumbnail: Option<&Thumbnail>, file_url: &str) -> serde_json::Value {
    let Some(thumbnail) = thumbnail else {
        return json!({ "status": ThumbnailStatus::Pending.as_str() });
    };
    let mut body = json!({
        "status": thumbnail.status.as_str(),
        "createdAt": thumbnail.created_at,
    });
    if thumbnail.status == ThumbnailStatus::Ready {
        body["fileUrl"] = json!(file_url);
    }
    if let Some(size) = thumbnail.size_bytes {
        body["sizeBytes"] = json!(size);
    }
    if let Some(width) = thumbnail.width {
        body["width"] = json!(width);
    }
    if let Some(height) = thumbnail.height {
        body["height"] = json!(height);
    }
    if let Some(error) = &thumbnail.error_message {
        body["errorMessage"] = json!(error);
    }
    if let Some(processed_at) = thumbnail.processed_at {
        body["processedAt"] = json!(processed_at);
    }
    body
}

/// Resolves a live model and its active version id.
async fn active_version(state: &AppState, model_id: i64) -> ApiResult<(Model, i64)> {
    let model = state.catalog.get_model(model_id).await?;
    if model.is_deleted {
        return Err(ApiError::not_found(format!(
            "model {} does not exist",
            model_id
        )));
    }
    let version_id = model
        .active_version_id
        .ok_or_else(|| ApiError::not_found(format!("model {} has no versions", model_id)))?;
    Ok((model, version_id))
}

/// GET /models/{id}/thumbnail - derived-state summary for the active
/// version.
pub async fn get_model_thumbnail(
    State(state): State<AppState>,
    Path(model_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let (_, version_id) = active_version(&state, model_id).await?;
    let thumbnail = state
        .catalog
        .get_thumbnail(ThumbnailOwner::ModelVersion(version_id))
        .await?;
    Ok(Json(thumbnail_body(
        thumbnail.as_ref(),
        &format!("/models/{}/thumbnail/file", model_id),
    )))
}

/// Streams a ready derived blob with long-lived caching headers.
async fn stream_derived(
    state: &AppState,
    thumbnail: Option<Thumbnail>,
    request_headers: &HeaderMap,
) -> ApiResult<Response> {
    let thumbnail = thumbnail
        .filter(|t| t.status == ThumbnailStatus::Ready)
        .ok_or_else(|| ApiError::not_found("no ready derived image"))?;
    let hash = thumbnail
        .output_blob_hash
        .as_ref()
        .ok_or_else(|| ApiError::not_found("no ready derived image"))?;

    // The content hash is a stable ETag: same bytes, same tag.
    let etag = format!("\"{}\"", hash);
    if let Some(candidate) = request_headers.get(header::IF_NONE_MATCH) {
        if candidate.to_str().map(|v| v == etag).unwrap_or(false) {
            return Ok(StatusCode::NOT_MODIFIED.into_response());
        }
    }

    let bytes = state.blobs.get(hash).await?;
    let record = state.catalog.get_blob_record(hash).await.ok();
    let content_type = record
        .and_then(|r| r.mime_hint)
        .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string());

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, bytes.len())
        .header(header::CACHE_CONTROL, "public, max-age=86400")
        .header(header::ETAG, etag)
        .body(Body::from(bytes))
        .map_err(|e| ApiError::with_message(crate::error::ErrorCode::FatalInternal, e.to_string()))?;
    Ok(response)
}

/// GET /models/{id}/thumbnail/file - stream the poster image.
pub async fn get_model_thumbnail_file(
    State(state): State<AppState>,
    Path(model_id): Path<i64>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let (_, version_id) = active_version(&state, model_id).await?;
    let thumbnail = state
        .catalog
        .get_thumbnail(ThumbnailOwner::ModelVersion(version_id))
        .await?;
    stream_derived(&state, thumbnail, &headers).await
}

/// POST /models/{id}/thumbnail/regenerate - enqueue a fresh derivation.
pub async fn regenerate_model_thumbnail(
    State(state): State<AppState>,
    Path(model_id): Path<i64>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let (_, version_id) = active_version(&state, model_id).await?;
    let version = state.catalog.get_version(version_id).await?;
    let hash = version
        .primary_blob_hash()
        .ok_or_else(|| {
            ApiError::precondition(format!(
                "version {} has no primary renderable blob",
                version_id
            ))
        })?
        .to_string();

    let job = state
        .dispatcher
        .enqueue_derivation(crate::models::JobKind::ModelThumbnail, version_id, &hash)
        .await
        .ok_or_else(|| ApiError::new(crate::error::ErrorCode::FatalInternal))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "jobId": job.id, "status": job.status.as_str() })),
    ))
}

/// GET /sounds/{id}/waveform - derived-state summary for a sound.
pub async fn get_sound_waveform(
    State(state): State<AppState>,
    Path(sound_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let sound = state.catalog.get_sound(sound_id).await?;
    if sound.is_deleted {
        return Err(ApiError::not_found(format!(
            "sound {} does not exist",
            sound_id
        )));
    }
    let thumbnail = state
        .catalog
        .get_thumbnail(ThumbnailOwner::Sound(sound_id))
        .await?;
    Ok(Json(thumbnail_body(
        thumbnail.as_ref(),
        &format!("/sounds/{}/waveform/file", sound_id),
    )))
}

/// GET /sounds/{id}/waveform/file - stream the waveform image.
pub async fn get_sound_waveform_file(
    State(state): State<AppState>,
    Path(sound_id): Path<i64>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    state.catalog.get_sound(sound_id).await?;
    let thumbnail = state
        .catalog
        .get_thumbnail(ThumbnailOwner::Sound(sound_id))
        .await?;
    stream_derived(&state, thumbnail, &headers).await
}

/// GET /texture-sets/{id}/thumbnail - derived-state summary for a set.
pub async fn get_texture_set_thumbnail(
    State(state): State<AppState>,
    Path(set_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    state.catalog.get_texture_set(set_id).await?;
    let thumbnail = state
        .catalog
        .get_thumbnail(ThumbnailOwner::TextureSet(set_id))
        .await?;
    Ok(Json(thumbnail_body(
        thumbnail.as_ref(),
        &format!("/texture-sets/{}/thumbnail/file", set_id),
    )))
}

/// GET /texture-sets/{id}/thumbnail/file - stream the sphere preview.
pub async fn get_texture_set_thumbnail_file(
    State(state): State<AppState>,
    Path(set_id): Path<i64>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    state.catalog.get_texture_set(set_id).await?;
    let thumbnail = state
        .catalog
        .get_thumbnail(ThumbnailOwner::TextureSet(set_id))
        .await?;
    stream_derived(&state, thumbnail, &headers).await
}
