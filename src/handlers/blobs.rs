//! Content endpoints: resolve a blob by hash, accept derived uploads.

use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::error::{ApiError, ApiResult, ErrorCode};
use crate::models::{AssetKind, BlobRecord};
use crate::router::AppState;
use crate::storage::{BlobStore, CatalogStore};
use crate::upload::extension_allowed;

/// GET /blobs/{hash} - stream stored content by its hash.
pub async fn get_blob(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> ApiResult<Response> {
    let bytes = state.blobs.get(&hash).await?;
    let record = state.catalog.get_blob_record(&hash).await.ok();
    let content_type = record
        .and_then(|r| r.mime_hint)
        .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string());

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, bytes.len())
        .header(header::ETAG, format!("\"{}\"", hash))
        .body(Body::from(bytes))
        .map_err(|e| ApiError::with_message(ErrorCode::FatalInternal, e.to_string()))?;
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct BlobUploadParams {
    pub kind: Option<String>,
}

/// POST /blobs - store a derived blob (worker upload path). Capped at the
/// thumbnail size limit; primary asset uploads go through their entity
/// endpoints instead.
pub async fn put_blob(
    State(state): State<AppState>,
    Query(params): Query<BlobUploadParams>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let kind = match params.kind.as_deref() {
        Some(raw) => AssetKind::from_str(raw)
            .ok_or_else(|| ApiError::validation(format!("unknown asset kind {:?}", raw)))?,
        None => AssetKind::Image,
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(format!("malformed multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::validation("file field is missing a filename"))?;
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::validation(format!("failed to read upload body: {}", e)))?;

        if bytes.is_empty() {
            return Err(ApiError::validation("upload body is empty"));
        }
        if bytes.len() as u64 > state.config.thumbnail_max_bytes {
            return Err(ApiError::with_message(
                ErrorCode::PayloadTooLarge,
                format!(
                    "derived blob of {} bytes exceeds the {} byte cap",
                    bytes.len(),
                    state.config.thumbnail_max_bytes
                ),
            ));
        }
        if !extension_allowed(kind, &filename) {
            return Err(ApiError::with_message(
                ErrorCode::UnsupportedFormat,
                format!("{:?} is not an accepted {} file", filename, kind.as_str()),
            ));
        }

        let put = state.blobs.put(bytes).await?;
        state
            .catalog
            .upsert_blob_record(BlobRecord::new(
                put.hash.clone(),
                put.bytes_written,
                kind,
                content_type,
                Some(filename),
            ))
            .await?;

        let status = if put.was_new {
            StatusCode::CREATED
        } else {
            StatusCode::OK
        };
        return Ok((
            status,
            Json(json!({
                "hash": put.hash,
                "sizeBytes": put.bytes_written,
                "wasNew": put.was_new,
            })),
        ));
    }
    Err(ApiError::validation("multipart field 'file' is required"))
}
