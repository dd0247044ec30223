//! Questionnaire enrichment
//!
//! Per-project questionnaire answers from the source are condensed into
//! "cards" (current situation, attention points, next steps and four stage
//! periods). Question sync folds the cards back into persisted projects:
//! situation, next steps and risks are filled when the answers carry
//! information, and the stage periods are stored as `rawData.QuestionsTimeline`.
//!
//! The question catalog itself is imported from a CSV file with columns
//! `cod_source, question_id, dsc_type, dsc_title` and one header row.

use super::source_client::{SourceClient, SourceError};
use crate::identity::{looks_like_guid, IdentityResolver};
use crate::normalize::{
    extract_text, format_date_text, format_percent_text, is_likely_date, lookup_path,
    split_items, NOT_PROVIDED,
};
use chrono::Utc;
use ppi_common::db::{self, NewQuestion, NormalizedProject};
use ppi_common::{Error, Meaningful, Result};
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Timeline key inside `raw_data`
pub const TIMELINE_KEY: &str = "QuestionsTimeline";

pub const CODE_CURRENT_SITUATION: &str = "2000726";
pub const CODE_ATTENTION_POINTS: &str = "2000727";
pub const CODE_NEXT_STEPS: &str = "2000728";

const CODE_STUDIES_START: &str = "2001217";
const CODE_STUDIES_END: &str = "2001218";
const CODE_STUDIES_STATUS: &str = "2001219";
const CODE_CONSULTATION_START: &str = "2001220";
const CODE_CONSULTATION_END: &str = "2001221";
const CODE_CONSULTATION_STATUS: &str = "2001222";
const CODE_AUDIT_START: &str = "2001223";
const CODE_AUDIT_END: &str = "2001224";
const CODE_AUDIT_STATUS: &str = "2001225";
const CODE_TENDER_PUBLISHED: &str = "2001226";
const CODE_TENDER_STATUS: &str = "2001227";
const CODE_TENDER_START: &str = "2001228";
const CODE_TENDER_END: &str = "2001229";

/// Codes the card formatter reads
pub const CARD_QUESTION_CODES: &[&str] = &[
    CODE_CURRENT_SITUATION,
    CODE_ATTENTION_POINTS,
    CODE_NEXT_STEPS,
    CODE_STUDIES_START,
    CODE_STUDIES_END,
    CODE_STUDIES_STATUS,
    CODE_CONSULTATION_START,
    CODE_CONSULTATION_END,
    CODE_CONSULTATION_STATUS,
    CODE_AUDIT_START,
    CODE_AUDIT_END,
    CODE_AUDIT_STATUS,
    CODE_TENDER_PUBLISHED,
    CODE_TENDER_STATUS,
    CODE_TENDER_START,
    CODE_TENDER_END,
];

/// One answer fetched from the source
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuestionAnswer {
    pub cod_source: String,
    pub question: Option<String>,
    pub answer: Option<Value>,
    pub status: Option<String>,
    pub stage: Option<String>,
    pub theme: Option<String>,
    pub field_type: Option<String>,
    pub field_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QuestionAnswer {
    /// Build from a `questions/search` payload
    pub fn from_payload(cod_source: &str, question: Option<String>, payload: &Value) -> Self {
        let text_at = |path: &str| lookup_path(payload, path).and_then(extract_text);
        Self {
            cod_source: cod_source.to_string(),
            question,
            answer: payload.get("FieldValue").cloned().filter(|v| !v.is_null()),
            status: text_at("Status.Status"),
            stage: text_at("Stage.Value"),
            theme: text_at("Theme.Value"),
            field_type: text_at("Field.Type"),
            field_title: text_at("Field.Title"),
            error: None,
        }
    }

    fn failed(cod_source: &str, question: Option<String>, error: &SourceError) -> Self {
        Self {
            cod_source: cod_source.to_string(),
            question,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }
}

/// Start/end/status of a stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StagePeriod {
    #[serde(rename = "inicio")]
    pub start: String,
    #[serde(rename = "fim")]
    pub end: String,
    pub status: String,
}

/// Tender stage, which also carries a publication date
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TenderStage {
    #[serde(rename = "publicacao")]
    pub published: String,
    pub status: String,
    #[serde(rename = "inicio")]
    pub start: String,
    #[serde(rename = "fim")]
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stages {
    #[serde(rename = "estudos")]
    pub studies: StagePeriod,
    #[serde(rename = "consulta_publica")]
    pub public_consultation: StagePeriod,
    #[serde(rename = "tcu")]
    pub audit: StagePeriod,
    #[serde(rename = "edital")]
    pub tender: TenderStage,
}

/// Card view of a project's questionnaire
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectCards {
    #[serde(rename = "situacao_atual")]
    pub current_situation: String,
    #[serde(rename = "pontos_atencao")]
    pub attention_points: String,
    #[serde(rename = "proximos_passos")]
    pub next_steps: String,
    #[serde(rename = "etapas")]
    pub stages: Stages,
}

/// Timeline entry stored under `rawData.QuestionsTimeline`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub milestone: String,
    pub date: String,
    pub status: String,
    pub raw_status: String,
}

fn answer_text(answers: &[QuestionAnswer], code: &str) -> Option<String> {
    answers
        .iter()
        .find(|a| a.cod_source == code)
        .and_then(|a| a.answer.as_ref())
        .and_then(extract_text)
}

fn date_of(answers: &[QuestionAnswer], code: &str) -> String {
    answer_text(answers, code)
        .map(|t| format_date_text(&t))
        .unwrap_or_else(|| NOT_PROVIDED.to_string())
}

fn text_or_sentinel(answers: &[QuestionAnswer], code: &str) -> String {
    answer_text(answers, code).unwrap_or_else(|| NOT_PROVIDED.to_string())
}

/// Condense answers into cards
pub fn format_answers_for_cards(answers: &[QuestionAnswer]) -> ProjectCards {
    let current_situation = match answer_text(answers, CODE_CURRENT_SITUATION) {
        Some(text) if is_likely_date(&text) => format_date_text(&text),
        Some(text) => format_percent_text(&text),
        None => NOT_PROVIDED.to_string(),
    };

    let period = |start: &str, end: &str, status: &str| StagePeriod {
        start: date_of(answers, start),
        end: date_of(answers, end),
        status: text_or_sentinel(answers, status),
    };

    ProjectCards {
        current_situation,
        attention_points: text_or_sentinel(answers, CODE_ATTENTION_POINTS),
        next_steps: text_or_sentinel(answers, CODE_NEXT_STEPS),
        stages: Stages {
            studies: period(CODE_STUDIES_START, CODE_STUDIES_END, CODE_STUDIES_STATUS),
            public_consultation: period(
                CODE_CONSULTATION_START,
                CODE_CONSULTATION_END,
                CODE_CONSULTATION_STATUS,
            ),
            audit: period(CODE_AUDIT_START, CODE_AUDIT_END, CODE_AUDIT_STATUS),
            tender: TenderStage {
                published: date_of(answers, CODE_TENDER_PUBLISHED),
                status: text_or_sentinel(answers, CODE_TENDER_STATUS),
                start: date_of(answers, CODE_TENDER_START),
                end: date_of(answers, CODE_TENDER_END),
            },
        },
    }
}

/// Stage timeline in milestone order
///
/// Each entry's date is the first provided of publication, start and end.
pub fn build_timeline(cards: &ProjectCards) -> Vec<TimelineEntry> {
    let stages = &cards.stages;
    vec![
        timeline_entry(
            "Estudos",
            &[&stages.studies.start, &stages.studies.end],
            &stages.studies.status,
        ),
        timeline_entry(
            "Consulta Pública",
            &[
                &stages.public_consultation.start,
                &stages.public_consultation.end,
            ],
            &stages.public_consultation.status,
        ),
        timeline_entry(
            "Controle Externo / TCU",
            &[&stages.audit.start, &stages.audit.end],
            &stages.audit.status,
        ),
        timeline_entry(
            "Edital",
            &[
                &stages.tender.published,
                &stages.tender.start,
                &stages.tender.end,
            ],
            &stages.tender.status,
        ),
    ]
}

fn timeline_entry(label: &str, dates: &[&String], status: &str) -> TimelineEntry {
    let date = dates
        .iter()
        .find(|d| is_provided(d))
        .map(|d| d.to_string())
        .unwrap_or_else(|| NOT_PROVIDED.to_string());
    let status = if status.is_meaningful() {
        status.trim().to_string()
    } else {
        NOT_PROVIDED.to_string()
    };
    TimelineEntry {
        milestone: label.to_string(),
        date,
        raw_status: status.clone(),
        status,
    }
}

fn is_provided(text: &str) -> bool {
    text.is_meaningful() && text.trim() != NOT_PROVIDED
}

/// Fold cards into a project
///
/// Situation, next steps and risks are replaced only by provided values.
/// Returns `true` when the project changed.
pub fn apply_cards(project: &mut NormalizedProject, cards: &ProjectCards) -> bool {
    let before = project.clone();

    if is_provided(&cards.current_situation) {
        project.current_situation = Some(cards.current_situation.trim().to_string());
    }
    if is_provided(&cards.next_steps) {
        project.next_steps = Some(cards.next_steps.trim().to_string());
    }
    if is_provided(&cards.attention_points) {
        let risks = split_items(&cards.attention_points);
        if risks.is_meaningful() {
            project.risks = Some(risks);
        }
    }

    let timeline = json!(build_timeline(cards));
    match &mut project.raw_data {
        Value::Object(map) => {
            map.insert(TIMELINE_KEY.to_string(), timeline);
        }
        other => *other = json!({ TIMELINE_KEY: timeline }),
    }

    *project != before
}

/// Counts of a question sync run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuestionSyncSummary {
    pub total: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Outcome for one project
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectQuestionOutcome {
    Updated,
    Unchanged,
    Skipped,
}

/// Fetches questionnaire answers and folds them into projects
pub struct QuestionSync {
    db: SqlitePool,
    source: Arc<SourceClient>,
    resolver: IdentityResolver,
}

impl QuestionSync {
    pub fn new(db: SqlitePool, source: Arc<SourceClient>, resolver: IdentityResolver) -> Self {
        Self {
            db,
            source,
            resolver,
        }
    }

    /// Fetch answers for `codes`; a failed code yields an answer with `error`
    pub async fn fetch_answers(
        &self,
        guid: &str,
        codes: &[(String, Option<String>)],
    ) -> Vec<QuestionAnswer> {
        let mut answers = Vec::with_capacity(codes.len());
        for (code, title) in codes {
            match self.source.question_answer(guid, code).await {
                Ok(payload) => {
                    answers.push(QuestionAnswer::from_payload(code, title.clone(), &payload))
                }
                Err(e) => {
                    debug!(guid = %guid, code = %code, error = %e, "Question fetch failed");
                    answers.push(QuestionAnswer::failed(code, title.clone(), &e));
                }
            }
        }
        answers
    }

    /// Answers for the active catalog plus the card codes
    pub async fn project_answers(&self, guid: &str) -> Result<Vec<QuestionAnswer>> {
        let catalog = db::questions::list_active_questions(&self.db).await?;
        let mut seen = HashSet::new();
        let mut codes = Vec::new();
        for question in catalog {
            if seen.insert(question.cod_source.clone()) {
                codes.push((question.cod_source, Some(question.dsc_title)));
            }
        }
        for code in CARD_QUESTION_CODES {
            if seen.insert(code.to_string()) {
                codes.push((code.to_string(), None));
            }
        }
        Ok(self.fetch_answers(guid, &codes).await)
    }

    /// Enrich one persisted project
    pub async fn sync_project(
        &self,
        project: &mut NormalizedProject,
    ) -> Result<ProjectQuestionOutcome> {
        let guid = self
            .resolver
            .override_lookup_key(&project.raw_data, &project.external_id);
        if !looks_like_guid(&guid) {
            debug!(external_id = %project.external_id, "Not a source GUID, skipping questions");
            return Ok(ProjectQuestionOutcome::Skipped);
        }

        let codes: Vec<(String, Option<String>)> = CARD_QUESTION_CODES
            .iter()
            .map(|c| (c.to_string(), None))
            .collect();
        let answers = self.fetch_answers(&guid, &codes).await;
        if answers.iter().all(|a| a.error.is_some()) {
            return Err(Error::Internal(format!(
                "No questionnaire answers available for {}",
                guid
            )));
        }

        let cards = format_answers_for_cards(&answers);
        if !apply_cards(project, &cards) {
            return Ok(ProjectQuestionOutcome::Unchanged);
        }

        project.last_synced_at = Some(Utc::now());
        db::projects::upsert_project(&self.db, project).await?;
        Ok(ProjectQuestionOutcome::Updated)
    }

    /// Enrich a page of persisted projects
    pub async fn sync_all(
        &self,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<QuestionSyncSummary> {
        let projects = db::projects::list_projects(&self.db, limit, offset).await?;
        let mut summary = QuestionSyncSummary {
            total: projects.len(),
            ..Default::default()
        };

        for mut project in projects {
            match self.sync_project(&mut project).await {
                Ok(ProjectQuestionOutcome::Updated) => summary.updated += 1,
                Ok(ProjectQuestionOutcome::Unchanged) => {}
                Ok(ProjectQuestionOutcome::Skipped) => summary.skipped += 1,
                Err(e) => {
                    warn!(external_id = %project.external_id, error = %e, "Question sync failed");
                    summary.errors += 1;
                }
            }
        }

        info!(
            total = summary.total,
            updated = summary.updated,
            skipped = summary.skipped,
            errors = summary.errors,
            "Question sync finished"
        );
        Ok(summary)
    }
}

/// Parsed question catalog
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuestionCatalog {
    pub questions: Vec<NewQuestion>,
    pub duplicates: Vec<String>,
    pub invalid: usize,
}

/// Parse a catalog CSV
///
/// Rows without a code or title are counted as invalid; repeated codes are
/// skipped and reported.
pub fn parse_question_catalog(content: &str) -> Result<QuestionCatalog> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut catalog = QuestionCatalog::default();
    let mut seen = HashSet::new();

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.map_err(|e| {
            Error::InvalidInput(format!("CSV parse error at row {}: {}", row_idx + 2, e))
        })?;
        let field = |i: usize| record.get(i).map(str::trim).unwrap_or_default();

        let code = field(0);
        let title = field(3);
        if code.is_empty() || title.is_empty() {
            warn!(row = row_idx + 2, "Ignoring catalog row without code or title");
            catalog.invalid += 1;
            continue;
        }
        if !seen.insert(code.to_string()) {
            warn!(code = %code, title = %title, "Duplicate question code ignored");
            catalog.duplicates.push(code.to_string());
            continue;
        }

        let question_id = field(1);
        let dsc_type = field(2);
        catalog.questions.push(NewQuestion {
            cod_source: code.to_string(),
            question_id: (!question_id.is_empty()).then(|| question_id.to_string()),
            dsc_type: if dsc_type.is_empty() { "Text" } else { dsc_type }.to_string(),
            dsc_title: title.to_string(),
        });
    }

    Ok(catalog)
}

/// Replace the stored catalog with the contents of `path`
pub async fn import_question_catalog(pool: &SqlitePool, path: &Path) -> Result<QuestionCatalog> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read question catalog {}: {}",
            path.display(),
            e
        ))
    })?;
    let catalog = parse_question_catalog(&content)?;
    let inserted = db::questions::replace_questions(pool, &catalog.questions).await?;
    info!(
        path = %path.display(),
        inserted,
        duplicates = catalog.duplicates.len(),
        invalid = catalog.invalid,
        "Question catalog imported"
    );
    Ok(catalog)
}
