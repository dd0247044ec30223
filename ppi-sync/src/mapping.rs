//! Record Mapper
//!
//! Maps an external record onto the fields of a `NormalizedProject` through
//! per-field candidate lists, and owns the status and sector vocabularies.

use crate::normalize::{resolve_list, resolve_number, resolve_text};
use serde::Serialize;
use serde_json::Value;

pub const NAME_FIELDS: &[&str] = &["Name", "name", "Title", "title"];
pub const DESCRIPTION_FIELDS: &[&str] = &["Description", "description", "Summary"];
pub const SECTOR_FIELDS: &[&str] = &["Sector.Value", "Sector.Name", "Sector", "sector"];
pub const SUB_SECTOR_FIELDS: &[&str] = &["SubSector.Value", "SubSector.Name", "SubSector"];
pub const STATUS_FIELDS: &[&str] = &["CurrentProjectStatus.Value", "CurrentProjectStatus", "Status", "status"];
pub const ESTIMATED_COST_FIELDS: &[&str] = &["EstimatedCapitalCost", "EstimatedCost"];
pub const COMPLETION_FIELDS: &[&str] = &["Completion"];
pub const PROGRESS_FIELDS: &[&str] = &["Progress"];
pub const CURRENT_SITUATION_FIELDS: &[&str] = &["CurrentSituation"];
pub const NEXT_STEPS_FIELDS: &[&str] = &["NextSteps"];
pub const RISKS_FIELDS: &[&str] = &["Risks", "KeyRisks"];

pub const DEFAULT_NAME: &str = "Projeto sem nome";
pub const DEFAULT_STATUS: &str = "Rascunho";

/// Local project status vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProjectStatus {
    EmAndamento,
    Concluido,
    EmPausa,
    Cancelado,
    Rascunho,
    EmPlanejamento,
    EmAprovacao,
    Suspenso,
}

impl ProjectStatus {
    pub const ALL: [ProjectStatus; 8] = [
        ProjectStatus::EmAndamento,
        ProjectStatus::Concluido,
        ProjectStatus::EmPausa,
        ProjectStatus::Cancelado,
        ProjectStatus::Rascunho,
        ProjectStatus::EmPlanejamento,
        ProjectStatus::EmAprovacao,
        ProjectStatus::Suspenso,
    ];

    /// Stored label
    pub fn label(self) -> &'static str {
        match self {
            ProjectStatus::EmAndamento => "Em andamento",
            ProjectStatus::Concluido => "Concluído",
            ProjectStatus::EmPausa => "Em pausa",
            ProjectStatus::Cancelado => "Cancelado",
            ProjectStatus::Rascunho => "Rascunho",
            ProjectStatus::EmPlanejamento => "Em planejamento",
            ProjectStatus::EmAprovacao => "Em aprovação",
            ProjectStatus::Suspenso => "Suspenso",
        }
    }

    /// Slug used by the reference-data endpoint
    pub fn slug(self) -> &'static str {
        match self {
            ProjectStatus::EmAndamento => "em_andamento",
            ProjectStatus::Concluido => "concluido",
            ProjectStatus::EmPausa => "pausado",
            ProjectStatus::Cancelado => "cancelado",
            ProjectStatus::Rascunho => "rascunho",
            ProjectStatus::EmPlanejamento => "planejamento",
            ProjectStatus::EmAprovacao => "em_aprovacao",
            ProjectStatus::Suspenso => "suspenso",
        }
    }

    /// Parse a source or local status label
    pub fn parse(raw: &str) -> Option<Self> {
        let key = raw.trim().to_lowercase();
        let status = match key.as_str() {
            "in progress" | "em andamento" | "em_andamento" => ProjectStatus::EmAndamento,
            "completed" | "concluído" | "concluido" => ProjectStatus::Concluido,
            "on hold" | "em pausa" | "pausado" => ProjectStatus::EmPausa,
            "cancelled" | "canceled" | "cancelado" => ProjectStatus::Cancelado,
            "draft" | "rascunho" => ProjectStatus::Rascunho,
            "planning" | "em planejamento" | "planejamento" => ProjectStatus::EmPlanejamento,
            "under approval" | "em aprovação" | "em_aprovacao" => ProjectStatus::EmAprovacao,
            "suspended" | "suspenso" => ProjectStatus::Suspenso,
            _ => return None,
        };
        Some(status)
    }

    /// Progress assumed for a project in this status
    pub fn estimated_progress(self) -> i64 {
        match self {
            ProjectStatus::Rascunho => 10,
            ProjectStatus::EmPlanejamento => 25,
            ProjectStatus::EmAprovacao => 40,
            ProjectStatus::EmAndamento => 60,
            ProjectStatus::EmPausa => 75,
            ProjectStatus::Concluido => 100,
            ProjectStatus::Cancelado | ProjectStatus::Suspenso => 0,
        }
    }
}

/// Map a raw status onto the local vocabulary; unknown labels pass through
pub fn map_status(raw: &str) -> String {
    match ProjectStatus::parse(raw) {
        Some(status) => status.label().to_string(),
        None => raw.trim().to_string(),
    }
}

/// Progress estimated from a stored status label
///
/// Unknown labels estimate 0.
pub fn estimate_progress(status: &str) -> i64 {
    ProjectStatus::parse(status)
        .map(ProjectStatus::estimated_progress)
        .unwrap_or(0)
}

/// Translate an English sector name; other names pass through
pub fn translate_sector(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed {
        "Transport" => "Transporte",
        "Energy" => "Energia",
        "Infrastructure" => "Infraestrutura",
        "Technology" => "Tecnologia",
        other => other,
    }
    .to_string()
}

/// Source completion to a 0-100 percentage
///
/// Values up to 1 are fractions; larger values are already percentages.
pub fn completion_to_progress(completion: f64) -> Option<i64> {
    if !completion.is_finite() {
        return None;
    }
    let percent = if completion <= 1.0 {
        completion * 100.0
    } else {
        completion
    };
    Some(clamp_percent(percent))
}

/// Curated completion, always a fraction
pub fn fraction_to_progress(fraction: f64) -> Option<i64> {
    fraction
        .is_finite()
        .then(|| clamp_percent(fraction * 100.0))
}

pub fn clamp_percent(percent: f64) -> i64 {
    percent.round().clamp(0.0, 100.0) as i64
}

/// Fields extracted from one external record
///
/// Every field is optional; the merger decides what wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectFields {
    pub name: Option<String>,
    pub description: Option<String>,
    pub sector: Option<String>,
    pub sub_sector: Option<String>,
    pub status: Option<String>,
    pub estimated_cost: Option<f64>,
    pub progress: Option<i64>,
    pub current_situation: Option<String>,
    pub next_steps: Option<String>,
    pub risks: Option<Vec<String>>,
}

impl ProjectFields {
    pub fn from_record(record: &Value) -> Self {
        let progress = resolve_number(record, COMPLETION_FIELDS)
            .and_then(completion_to_progress)
            .or_else(|| resolve_number(record, PROGRESS_FIELDS).map(clamp_percent));

        Self {
            name: resolve_text(record, NAME_FIELDS),
            description: resolve_text(record, DESCRIPTION_FIELDS),
            sector: resolve_text(record, SECTOR_FIELDS).map(|s| translate_sector(&s)),
            sub_sector: resolve_text(record, SUB_SECTOR_FIELDS),
            status: resolve_text(record, STATUS_FIELDS).map(|s| map_status(&s)),
            estimated_cost: resolve_number(record, ESTIMATED_COST_FIELDS),
            progress,
            current_situation: resolve_text(record, CURRENT_SITUATION_FIELDS),
            next_steps: resolve_text(record, NEXT_STEPS_FIELDS),
            risks: resolve_list(record, RISKS_FIELDS),
        }
    }
}
