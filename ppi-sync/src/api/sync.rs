//! Sync trigger handlers
//!
//! POST /api/sync/all, /projects, /sectors, /statuses, /questions
//!
//! Runs are synchronous: the response carries the summary. Only one run may
//! be active per process; a concurrent trigger gets 409.

use axum::{
    extract::{Query, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OwnedMutexGuard;

use crate::error::{ApiError, ApiResult};
use crate::reconcile::SyncSummary;
use crate::services::{FullSyncReport, QuestionSyncSummary};
use crate::AppState;

/// `?limit=` for sync triggers
#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

/// Reference-data sync response
#[derive(Debug, Serialize)]
pub struct ReferenceSyncResponse {
    pub count: usize,
    pub items: Vec<Value>,
}

/// Claim the per-process sync slot
pub(crate) fn begin_sync(state: &AppState) -> ApiResult<OwnedMutexGuard<()>> {
    state
        .sync_guard
        .clone()
        .try_lock_owned()
        .map_err(|_| ApiError::Conflict("A sync run is already in progress".to_string()))
}

/// Convert a run result, remembering failures for `/health`
pub(crate) async fn settle<T, E>(state: &AppState, result: Result<T, E>) -> ApiResult<T>
where
    E: Into<ApiError>,
{
    match result {
        Ok(value) => Ok(value),
        Err(e) => {
            let err: ApiError = e.into();
            state.record_error(err.to_string()).await;
            Err(err)
        }
    }
}

/// POST /api/sync/all
pub async fn sync_all(State(state): State<AppState>) -> ApiResult<Json<FullSyncReport>> {
    let _guard = begin_sync(&state)?;
    tracing::info!("Full sync requested");
    let report = settle(&state, state.sync.sync_all().await).await?;
    Ok(Json(report))
}

/// POST /api/sync/projects?limit=N
pub async fn sync_projects(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<SyncSummary>> {
    let _guard = begin_sync(&state)?;
    tracing::info!(limit = ?query.limit, "Project sync requested");
    let summary = settle(&state, state.sync.sync_projects(query.limit).await).await?;
    Ok(Json(summary))
}

/// POST /api/sync/sectors
pub async fn sync_sectors(State(state): State<AppState>) -> ApiResult<Json<ReferenceSyncResponse>> {
    let _guard = begin_sync(&state)?;
    let items = settle(&state, state.sync.sectors().await).await?;
    Ok(Json(ReferenceSyncResponse {
        count: items.len(),
        items,
    }))
}

/// POST /api/sync/statuses
pub async fn sync_statuses(
    State(state): State<AppState>,
) -> ApiResult<Json<ReferenceSyncResponse>> {
    let _guard = begin_sync(&state)?;
    let items = settle(&state, state.sync.statuses().await).await?;
    Ok(Json(ReferenceSyncResponse {
        count: items.len(),
        items,
    }))
}

/// POST /api/sync/questions?limit=N
pub async fn sync_questions(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<QuestionSyncSummary>> {
    let _guard = begin_sync(&state)?;
    let limit = query.limit.map(|l| l as i64);
    let summary = settle(&state, state.questions.sync_all(limit, None).await).await?;
    Ok(Json(summary))
}

/// Build sync routes
pub fn sync_routes() -> Router<AppState> {
    Router::new()
        .route("/api/sync/all", post(sync_all))
        .route("/api/sync/projects", post(sync_projects))
        .route("/api/sync/sectors", post(sync_sectors))
        .route("/api/sync/statuses", post(sync_statuses))
        .route("/api/sync/questions", post(sync_questions))
}
