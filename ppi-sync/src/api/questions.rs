//! Questionnaire handlers
//!
//! GET /api/questions, POST /api/questions/import,
//! GET /api/projects/:id/questions

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use ppi_common::db::{self, Question};
use serde::Serialize;
use uuid::Uuid;

use super::projects::find_project;
use crate::error::{ApiError, ApiResult};
use crate::identity::looks_like_guid;
use crate::services::question_sync::{
    build_timeline, format_answers_for_cards, parse_question_catalog, TimelineEntry,
};
use crate::services::{ProjectCards, QuestionAnswer};
use crate::AppState;

/// GET /api/questions response
#[derive(Debug, Serialize)]
pub struct QuestionListResponse {
    pub questions: Vec<Question>,
    pub total: usize,
}

/// POST /api/questions/import response
#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub imported: usize,
    pub duplicates: Vec<String>,
    pub invalid: usize,
}

/// GET /api/projects/:id/questions response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectQuestionsResponse {
    pub project_id: Uuid,
    pub guid: String,
    pub answers: Vec<QuestionAnswer>,
    pub cards: ProjectCards,
    pub timeline: Vec<TimelineEntry>,
}

/// GET /api/questions
pub async fn list_questions(State(state): State<AppState>) -> ApiResult<Json<QuestionListResponse>> {
    let questions = db::questions::list_active_questions(&state.db).await?;
    Ok(Json(QuestionListResponse {
        total: questions.len(),
        questions,
    }))
}

/// POST /api/questions/import
///
/// Body is the catalog CSV; it replaces the stored catalog.
pub async fn import_questions(
    State(state): State<AppState>,
    body: String,
) -> ApiResult<Json<ImportResponse>> {
    if body.trim().is_empty() {
        return Err(ApiError::BadRequest("Catalog CSV body is empty".to_string()));
    }

    let catalog = parse_question_catalog(&body)?;
    if catalog.questions.is_empty() {
        return Err(ApiError::BadRequest(
            "Catalog contains no valid questions".to_string(),
        ));
    }

    let imported = db::questions::replace_questions(&state.db, &catalog.questions).await?;
    tracing::info!(
        imported,
        duplicates = catalog.duplicates.len(),
        invalid = catalog.invalid,
        "Question catalog replaced"
    );

    Ok(Json(ImportResponse {
        imported,
        duplicates: catalog.duplicates,
        invalid: catalog.invalid,
    }))
}

/// GET /api/projects/:id/questions
///
/// Fetches live answers for the catalog and card questions.
pub async fn project_questions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProjectQuestionsResponse>> {
    let project = find_project(&state, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Project not found: {}", id)))?;

    let guid = state
        .sync
        .driver()
        .resolver()
        .override_lookup_key(&project.raw_data, &project.external_id);
    if !looks_like_guid(&guid) {
        return Err(ApiError::BadRequest(format!(
            "Project {} has no source GUID",
            project.external_id
        )));
    }

    let answers = state.questions.project_answers(&guid).await?;
    let cards = format_answers_for_cards(&answers);
    let timeline = build_timeline(&cards);

    Ok(Json(ProjectQuestionsResponse {
        project_id: project.id,
        guid,
        answers,
        cards,
        timeline,
    }))
}

/// Build questionnaire routes
pub fn question_routes() -> Router<AppState> {
    Router::new()
        .route("/api/questions", get(list_questions))
        .route("/api/questions/import", post(import_questions))
        .route("/api/projects/:id/questions", get(project_questions))
}
