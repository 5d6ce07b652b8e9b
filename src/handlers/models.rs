//! Asset graph endpoints: model queries, version management, membership.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use super::page_envelope;
use crate::error::{ApiError, ApiResult};
use crate::events::DomainEvent;
use crate::models::{
    ContainerKind, MemberKind, Model, ModelVersion, RecycleKind, TextureType, Thumbnail,
    ThumbnailOwner, ThumbnailStatus,
};
use crate::router::AppState;
use crate::storage::CatalogStore;

#[derive(Debug, Deserialize)]
pub struct ListModelsParams {
    pub page: Option<usize>,
    #[serde(rename = "pageSize")]
    pub page_size: Option<usize>,
    #[serde(rename = "packId")]
    pub pack_id: Option<i64>,
    #[serde(rename = "projectId")]
    pub project_id: Option<i64>,
    #[serde(rename = "textureSetId")]
    pub texture_set_id: Option<i64>,
}

fn model_summary(model: &Model) -> serde_json::Value {
    let mut body = json!({
        "id": model.id,
        "name": model.name,
        "tags": model.tags,
        "createdAt": model.created_at,
        "updatedAt": model.updated_at,
    });
    if let Some(description) = &model.description {
        body["description"] = json!(description);
    }
    if let Some(set_id) = model.default_texture_set_id {
        body["defaultTextureSetId"] = json!(set_id);
    }
    if let Some(version_id) = model.active_version_id {
        body["activeVersionId"] = json!(version_id);
    }
    body
}

fn version_summary(version: &ModelVersion, thumbnail: Option<&Thumbnail>) -> serde_json::Value {
    let mut body = json!({
        "id": version.id,
        "versionNumber": version.version_number,
        "createdAt": version.created_at,
        "blobs": version.blobs.iter().map(|b| json!({
            "hash": b.hash,
            "role": b.role.as_str(),
        })).collect::<Vec<_>>(),
    });
    if let Some(description) = &version.description {
        body["description"] = json!(description);
    }
    body["thumbnailStatus"] = json!(thumbnail
        .map(|t| t.status)
        .unwrap_or(ThumbnailStatus::Pending)
        .as_str());
    body
}

/// GET /models - paginated listing with membership filters.
pub async fn list_models(
    State(state): State<AppState>,
    Query(params): Query<ListModelsParams>,
) -> ApiResult<Json<serde_json::Value>> {
    let page = state
        .catalog
        .list_models(
            crate::storage::ModelFilter {
                pack_id: params.pack_id,
                project_id: params.project_id,
                texture_set_id: params.texture_set_id,
            },
            params.page.unwrap_or(1),
            params.page_size.unwrap_or(50),
        )
        .await?;

    let page = crate::storage::Page {
        items: page.items.iter().map(model_summary).collect::<Vec<_>>(),
        total_count: page.total_count,
        page: page.page,
        page_size: page.page_size,
    };
    Ok(Json(page_envelope(page)))
}

/// GET /models/{id} - model with versions and active-version summary.
pub async fn get_model(
    State(state): State<AppState>,
    Path(model_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let model = state.catalog.get_model(model_id).await?;
    if model.is_deleted {
        return Err(ApiError::not_found(format!(
            "model {} does not exist",
            model_id
        )));
    }

    let versions = state.catalog.list_versions(model_id).await?;
    let mut version_bodies = Vec::with_capacity(versions.len());
    let mut active_summary = None;
    for version in versions.iter().filter(|v| !v.is_deleted) {
        let thumbnail = state
            .catalog
            .get_thumbnail(ThumbnailOwner::ModelVersion(version.id))
            .await?;
        let body = version_summary(version, thumbnail.as_ref());
        if Some(version.id) == model.active_version_id {
            active_summary = Some(body.clone());
        }
        version_bodies.push(body);
    }

    let mut body = model_summary(&model);
    body["versions"] = json!(version_bodies);
    if let Some(active) = active_summary {
        body["activeVersion"] = active;
    }
    Ok(Json(body))
}

/// DELETE /models/{id} - soft delete into the recycle bin.
pub async fn delete_model(
    State(state): State<AppState>,
    Path(model_id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.catalog.get_model(model_id).await?;
    state.catalog.soft_delete(RecycleKind::Model, model_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SetActiveVersionBody {
    #[serde(rename = "versionId")]
    pub version_id: i64,
}

/// PUT /models/{id}/active-version - atomically repoint the active version.
pub async fn set_active_version(
    State(state): State<AppState>,
    Path(model_id): Path<i64>,
    Json(body): Json<SetActiveVersionBody>,
) -> ApiResult<StatusCode> {
    let prev = state
        .catalog
        .set_active_version(model_id, body.version_id)
        .await?;
    state
        .dispatcher
        .publish(DomainEvent::ActiveVersionChanged {
            model_id,
            version_id: body.version_id,
            prev_version_id: prev.filter(|p| *p != body.version_id),
        })
        .await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SetDefaultTextureSetBody {
    #[serde(rename = "textureSetId")]
    pub texture_set_id: Option<i64>,
}

/// PUT /models/{id}/default-texture-set - set or clear the default set.
pub async fn set_default_texture_set(
    State(state): State<AppState>,
    Path(model_id): Path<i64>,
    Json(body): Json<SetDefaultTextureSetBody>,
) -> ApiResult<StatusCode> {
    state
        .catalog
        .set_default_texture_set(model_id, body.texture_set_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct BindTextureSetBody {
    #[serde(rename = "versionId")]
    pub version_id: i64,
}

/// POST /texture-sets/{id}/bindings - associate a set with a model version.
pub async fn bind_texture_set(
    State(state): State<AppState>,
    Path(set_id): Path<i64>,
    Json(body): Json<BindTextureSetBody>,
) -> ApiResult<StatusCode> {
    state
        .catalog
        .bind_texture_set(set_id, body.version_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /texture-sets/{id}/textures - external texture enumeration.
/// SPLIT_CHANNEL placeholders stay internal.
pub async fn list_textures(
    State(state): State<AppState>,
    Path(set_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let set = state.catalog.get_texture_set(set_id).await?;
    let textures = state.catalog.list_textures(set_id).await?;
    let items: Vec<serde_json::Value> = textures
        .iter()
        .filter(|t| !t.is_deleted && t.texture_type != TextureType::SplitChannel)
        .map(|t| {
            let mut body = json!({
                "id": t.id,
                "blobHash": t.blob_hash,
                "textureType": t.texture_type.as_str(),
                "createdAt": t.created_at,
            });
            if let Some(channel) = t.source_channel {
                body["sourceChannel"] = json!(channel.as_str());
            }
            body
        })
        .collect();
    Ok(Json(json!({
        "id": set.id,
        "name": set.name,
        "uvScale": set.uv_scale,
        "textures": items,
    })))
}

#[derive(Debug, Deserialize)]
pub struct CreateContainerBody {
    pub name: String,
    pub description: Option<String>,
}

async fn create_container(
    state: &AppState,
    kind: ContainerKind,
    body: CreateContainerBody,
) -> ApiResult<Json<serde_json::Value>> {
    let container = state
        .catalog
        .create_container(kind, &body.name, body.description)
        .await?;
    let mut response = json!({
        "id": container.id,
        "name": container.name,
        "kind": container.kind.as_str(),
        "createdAt": container.created_at,
    });
    if let Some(description) = &container.description {
        response["description"] = json!(description);
    }
    Ok(Json(response))
}

/// POST /packs - create a pack container.
pub async fn create_pack(
    State(state): State<AppState>,
    Json(body): Json<CreateContainerBody>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let response = create_container(&state, ContainerKind::Pack, body).await?;
    Ok((StatusCode::CREATED, response))
}

/// POST /projects - create a project container.
pub async fn create_project(
    State(state): State<AppState>,
    Json(body): Json<CreateContainerBody>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let response = create_container(&state, ContainerKind::Project, body).await?;
    Ok((StatusCode::CREATED, response))
}

#[derive(Debug, Deserialize)]
pub struct MembershipBody {
    pub kind: String,
    pub id: i64,
}

fn parse_member_kind(raw: &str) -> ApiResult<MemberKind> {
    match raw {
        "model" => Ok(MemberKind::Model),
        "textureSet" => Ok(MemberKind::TextureSet),
        "sprite" => Ok(MemberKind::Sprite),
        "sound" => Ok(MemberKind::Sound),
        other => Err(ApiError::validation(format!(
            "unknown member kind {:?}",
            other
        ))),
    }
}

/// POST /containers/{id}/members - add a member association.
pub async fn add_member(
    State(state): State<AppState>,
    Path(container_id): Path<i64>,
    Json(body): Json<MembershipBody>,
) -> ApiResult<StatusCode> {
    let kind = parse_member_kind(&body.kind)?;
    state.catalog.add_member(container_id, kind, body.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /containers/{id}/members - remove a member association.
pub async fn remove_member(
    State(state): State<AppState>,
    Path(container_id): Path<i64>,
    Json(body): Json<MembershipBody>,
) -> ApiResult<StatusCode> {
    let kind = parse_member_kind(&body.kind)?;
    state
        .catalog
        .remove_member(container_id, kind, body.id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
