//! Upload endpoints.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::models::{AssetKind, BlobRole, SourceChannel, TextureType};
use crate::router::AppState;
use crate::storage::CatalogStore;
use crate::upload::{UploadOutcome, UploadRequest, UploadTarget};

/// Multipart `file` field pulled into memory.
struct UploadedFile {
    bytes: Bytes,
    filename: String,
    content_type: Option<String>,
}

/// Reads the `file` field from a multipart body.
async fn read_file_field(mut multipart: Multipart) -> ApiResult<UploadedFile> {
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
        return Ok(UploadedFile {
            bytes,
            filename,
            content_type,
        });
    }
    Err(ApiError::validation("multipart field 'file' is required"))
}

fn upload_response(outcome: UploadOutcome) -> Response {
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let mut body = json!({
        "id": outcome.entity_id,
        "blobHash": outcome.blob_hash,
        "deduplicated": outcome.deduplicated,
    });
    if let Some(version_id) = outcome.version_id {
        body["versionId"] = json!(version_id);
    }
    (status, Json(body)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct BatchParams {
    pub batch: Option<String>,
    #[serde(rename = "batchKind")]
    pub batch_kind: Option<String>,
}

impl BatchParams {
    fn tag(&self, default_kind: &str) -> Option<(String, String)> {
        self.batch.clone().map(|tag| {
            (
                tag,
                self.batch_kind
                    .clone()
                    .unwrap_or_else(|| default_kind.to_string()),
            )
        })
    }
}

/// POST /models - upload a renderable and create a model with version 1.
pub async fn upload_model(
    State(state): State<AppState>,
    Query(params): Query<BatchParams>,
    multipart: Multipart,
) -> ApiResult<Response> {
    let file = read_file_field(multipart).await?;
    let outcome = state
        .uploads
        .upload(UploadRequest {
            bytes: file.bytes,
            filename: file.filename,
            content_type: file.content_type,
            declared_kind: AssetKind::Model,
            target: UploadTarget::NewModel,
            batch: params.tag("model"),
        })
        .await?;
    Ok(upload_response(outcome))
}

/// POST /models/{id}/versions - upload a renderable as a new version.
pub async fn upload_model_version(
    State(state): State<AppState>,
    Path(model_id): Path<i64>,
    Query(params): Query<BatchParams>,
    multipart: Multipart,
) -> ApiResult<Response> {
    let file = read_file_field(multipart).await?;
    let outcome = state
        .uploads
        .upload(UploadRequest {
            bytes: file.bytes,
            filename: file.filename,
            content_type: file.content_type,
            declared_kind: AssetKind::Model,
            target: UploadTarget::NewModelVersion { model_id },
            batch: params.tag("model"),
        })
        .await?;
    Ok(upload_response(outcome))
}

#[derive(Debug, Deserialize)]
pub struct FileUploadParams {
    #[serde(rename = "textureSetId")]
    pub texture_set_id: Option<i64>,
    #[serde(rename = "versionId")]
    pub version_id: Option<i64>,
    pub role: Option<String>,
    #[serde(rename = "textureType")]
    pub texture_type: Option<String>,
    pub channel: Option<String>,
    pub batch: Option<String>,
    #[serde(rename = "batchKind")]
    pub batch_kind: Option<String>,
}

/// POST /files - upload an auxiliary file tagged with its destination.
pub async fn upload_file(
    State(state): State<AppState>,
    Query(params): Query<FileUploadParams>,
    multipart: Multipart,
) -> ApiResult<Response> {
    let file = read_file_field(multipart).await?;
    let batch = params.batch.clone().map(|tag| {
        (
            tag,
            params
                .batch_kind
                .clone()
                .unwrap_or_else(|| "file".to_string()),
        )
    });

    let (declared_kind, target) = if let Some(set_id) = params.texture_set_id {
        let texture_type = match params.texture_type.as_deref() {
            Some(raw) => TextureType::from_str(raw)
                .ok_or_else(|| ApiError::validation(format!("unknown texture type {:?}", raw)))?,
            None => TextureType::Albedo,
        };
        let source_channel = match params.channel.as_deref() {
            Some(raw) => Some(
                SourceChannel::from_str(raw)
                    .ok_or_else(|| ApiError::validation(format!("unknown channel {:?}", raw)))?,
            ),
            None => None,
        };
        (
            AssetKind::Texture,
            UploadTarget::ExistingTextureSet {
                texture_set_id: set_id,
                texture_type,
                source_channel,
            },
        )
    } else if let Some(version_id) = params.version_id {
        let role = match params.role.as_deref() {
            Some(raw) => BlobRole::from_str(raw)
                .ok_or_else(|| ApiError::validation(format!("unknown blob role {:?}", raw)))?,
            None => BlobRole::Auxiliary,
        };
        let kind = if role == BlobRole::PrimaryRenderable {
            AssetKind::Model
        } else {
            AssetKind::ProjectFile
        };
        (kind, UploadTarget::ExistingVersion { version_id, role })
    } else {
        return Err(ApiError::validation(
            "either textureSetId or versionId must identify the destination",
        ));
    };

    let outcome = state
        .uploads
        .upload(UploadRequest {
            bytes: file.bytes,
            filename: file.filename,
            content_type: file.content_type,
            declared_kind,
            target,
            batch,
        })
        .await?;
    Ok(upload_response(outcome))
}

/// POST /texture-sets - upload a texture image and create a set around it.
pub async fn upload_texture_set(
    State(state): State<AppState>,
    Query(params): Query<BatchParams>,
    multipart: Multipart,
) -> ApiResult<Response> {
    let file = read_file_field(multipart).await?;
    let name = file
        .filename
        .rsplit_once('.')
        .map(|(stem, _)| stem.to_string())
        .unwrap_or_else(|| file.filename.clone());
    let outcome = state
        .uploads
        .upload(UploadRequest {
            bytes: file.bytes,
            filename: file.filename,
            content_type: file.content_type,
            declared_kind: AssetKind::Texture,
            target: UploadTarget::NewTextureSet { name },
            batch: params.tag("texture"),
        })
        .await?;
    Ok(upload_response(outcome))
}

/// POST /sounds - upload an audio file as a sound asset.
pub async fn upload_sound(
    State(state): State<AppState>,
    Query(params): Query<BatchParams>,
    multipart: Multipart,
) -> ApiResult<Response> {
    let file = read_file_field(multipart).await?;
    let outcome = state
        .uploads
        .upload(UploadRequest {
            bytes: file.bytes,
            filename: file.filename,
            content_type: file.content_type,
            declared_kind: AssetKind::Sound,
            target: UploadTarget::NewSound,
            batch: params.tag("sound"),
        })
        .await?;
    Ok(upload_response(outcome))
}

/// POST /sprites - upload an image as a sprite asset.
pub async fn upload_sprite(
    State(state): State<AppState>,
    Query(params): Query<BatchParams>,
    multipart: Multipart,
) -> ApiResult<Response> {
    let file = read_file_field(multipart).await?;
    let outcome = state
        .uploads
        .upload(UploadRequest {
            bytes: file.bytes,
            filename: file.filename,
            content_type: file.content_type,
            declared_kind: AssetKind::Image,
            target: UploadTarget::NewSprite,
            batch: params.tag("sprite"),
        })
        .await?;
    Ok(upload_response(outcome))
}

/// GET /uploads/batches/{tag} - batch-upload report.
pub async fn list_batch_uploads(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let records = state.catalog.list_batch_uploads(&tag).await?;
    let items: Vec<serde_json::Value> = records
        .iter()
        .map(|r| {
            json!({
                "id": r.id,
                "batchTag": r.batch_tag,
                "uploadKind": r.upload_kind,
                "blobHash": r.blob_hash,
                "entityKind": r.entity_kind.as_str(),
                "entityId": r.entity_id,
                "createdAt": r.created_at,
            })
        })
        .collect();
    Ok(Json(json!({ "batchTag": tag, "items": items })))
}
