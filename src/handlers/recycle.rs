//! Recycle bin endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::error::{ApiError, ApiResult};
use crate::models::{RecycleKind, RecycledItems};
use crate::queue::JobQueue;
use crate::router::AppState;
use crate::storage::CatalogStore;

/// GET /recycled - enumerate soft-deleted rows across entity kinds.
pub async fn list_recycled(State(state): State<AppState>) -> ApiResult<Json<RecycledItems>> {
    Ok(Json(state.catalog.list_recycled().await?))
}

fn parse_kind(raw: &str) -> ApiResult<RecycleKind> {
    RecycleKind::from_str(raw)
        .ok_or_else(|| ApiError::validation(format!("unknown recycle kind {:?}", raw)))
}

/// POST /recycled/{kind}/{id}/restore - clear the soft-delete flags.
pub async fn restore_recycled(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let kind = parse_kind(&kind)?;
    match kind {
        RecycleKind::File => state.catalog.restore_file(&id).await?,
        _ => {
            let id: i64 = id
                .parse()
                .map_err(|_| ApiError::validation("entry id must be numeric"))?;
            state.catalog.restore(kind, id).await?;
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /recycled/{kind}/{id} - permanent purge. Cascades owned rows and
/// terminal queue rows; blob bytes are left to the GC pass.
pub async fn purge_recycled(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let kind = parse_kind(&kind)?;
    match kind {
        RecycleKind::File => state.catalog.purge_file(&id).await?,
        _ => {
            let id: i64 = id
                .parse()
                .map_err(|_| ApiError::validation("entry id must be numeric"))?;
            let outcome = state.catalog.purge(kind, id).await?;
            if !outcome.job_target_ids.is_empty() {
                state
                    .queue
                    .purge_terminal_for_targets(&outcome.job_target_ids)
                    .await?;
            }
        }
    }
    Ok(StatusCode::NO_CONTENT)
}
