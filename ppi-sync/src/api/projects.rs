//! Project handlers
//!
//! GET /api/projects, GET /api/projects/:id, POST /api/projects

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use ppi_common::db::{self, NormalizedProject};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::sync::{begin_sync, settle};
use crate::config::LOCAL_PREFIX;
use crate::error::{ApiError, ApiResult};
use crate::identity::looks_like_guid;
use crate::mapping::{clamp_percent, estimate_progress, map_status, DEFAULT_STATUS};
use crate::reconcile::SyncSummary;
use crate::AppState;

/// GET /api/projects query
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// Run a project sync before listing
    #[serde(default)]
    pub sync: bool,
}

/// GET /api/projects/:id query
#[derive(Debug, Default, Deserialize)]
pub struct DetailQuery {
    /// Refresh from the source before returning
    #[serde(default)]
    pub sync: bool,
}

/// GET /api/projects response
#[derive(Debug, Serialize)]
pub struct ProjectListResponse {
    pub projects: Vec<NormalizedProject>,
    pub total: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncSummary>,
}

/// POST /api/projects request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub sector: Option<String>,
    pub sub_sector: Option<String>,
    pub status: Option<String>,
    pub estimated_cost: Option<f64>,
    pub progress: Option<f64>,
    pub current_situation: Option<String>,
    pub next_steps: Option<String>,
    pub risks: Option<Vec<String>>,
}

/// GET /api/projects?limit&offset&sync
///
/// Newest first.
pub async fn list_projects(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ProjectListResponse>> {
    if matches!(query.limit, Some(l) if l < 0) || matches!(query.offset, Some(o) if o < 0) {
        return Err(ApiError::BadRequest(
            "limit and offset must not be negative".to_string(),
        ));
    }

    let sync = if query.sync {
        let _guard = begin_sync(&state)?;
        Some(settle(&state, state.sync.sync_projects(None).await).await?)
    } else {
        None
    };

    let projects = db::projects::list_projects(&state.db, query.limit, query.offset).await?;
    let total = db::projects::count_projects(&state.db).await?;

    Ok(Json(ProjectListResponse {
        projects,
        total,
        sync,
    }))
}

/// GET /api/projects/:id?sync
///
/// Ids carrying the source tag are fetched live and upserted. Otherwise the
/// id is a local uuid or an external id; with `sync=true` a GUID-keyed
/// project is refreshed from the source first.
pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DetailQuery>,
) -> ApiResult<Json<NormalizedProject>> {
    if let Some(key) = state.sync.driver().resolver().untagged(&id) {
        let key = key.to_string();
        let project = settle(&state, state.sync.sync_project(&key).await).await?;
        return Ok(Json(project));
    }

    let project = find_project(&state, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Project not found: {}", id)))?;

    if query.sync && looks_like_guid(&project.external_id) {
        let refreshed = settle(&state, state.sync.sync_project(&project.external_id).await).await?;
        return Ok(Json(refreshed));
    }

    Ok(Json(project))
}

/// POST /api/projects
///
/// Creates a local project; its external id is `local-<millis>`.
pub async fn create_project(
    State(state): State<AppState>,
    Json(request): Json<CreateProjectRequest>,
) -> ApiResult<(StatusCode, Json<NormalizedProject>)> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Project name is required".to_string()));
    }

    let external_id = format!("{}{}", LOCAL_PREFIX, Utc::now().timestamp_millis());
    if db::projects::load_project_by_external_id(&state.db, &external_id)
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict(format!(
            "Project {} already exists",
            external_id
        )));
    }

    let status = request
        .status
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(map_status)
        .unwrap_or_else(|| DEFAULT_STATUS.to_string());
    let progress = request
        .progress
        .filter(|p| p.is_finite())
        .map(clamp_percent)
        .unwrap_or_else(|| estimate_progress(&status));

    let mut project = NormalizedProject::new(external_id, name);
    project.description = request.description;
    project.sector = request.sector;
    project.sub_sector = request.sub_sector;
    project.status = status;
    project.estimated_cost = request.estimated_cost;
    project.progress = Some(progress);
    project.current_situation = request.current_situation;
    project.next_steps = request.next_steps;
    project.risks = request.risks;
    project.raw_data = json!({ "source": "local" });

    db::projects::insert_project(&state.db, &project).await?;

    tracing::info!(
        id = %project.id,
        external_id = %project.external_id,
        "Local project created"
    );

    Ok((StatusCode::CREATED, Json(project)))
}

/// Look a project up by local uuid, then by external id
pub(crate) async fn find_project(
    state: &AppState,
    id: &str,
) -> ApiResult<Option<NormalizedProject>> {
    if let Ok(uuid) = Uuid::parse_str(id) {
        if let Some(project) = db::projects::load_project(&state.db, uuid).await? {
            return Ok(Some(project));
        }
    }
    Ok(db::projects::load_project_by_external_id(&state.db, id).await?)
}

/// Build project routes
pub fn project_routes() -> Router<AppState> {
    Router::new()
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/projects/:id", get(get_project))
}
