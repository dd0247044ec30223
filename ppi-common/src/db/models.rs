//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Canonical local representation of a project
///
/// `external_id` is unique across the table; every write of externally
/// sourced fields goes through an upsert keyed on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedProject {
    /// Local primary key, assigned on first insert and kept afterwards
    pub id: Uuid,
    pub external_id: String,
    pub name: String,
    pub description: String,
    pub sector: Option<String>,
    pub sub_sector: Option<String>,
    pub status: String,
    pub estimated_cost: Option<f64>,
    /// Completion percentage, 0–100
    pub progress: Option<i64>,
    pub current_situation: Option<String>,
    pub next_steps: Option<String>,
    pub risks: Option<Vec<String>>,
    /// Full external payload, merged key-wise across syncs
    pub raw_data: Value,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl NormalizedProject {
    /// Empty project shell for a new external id
    pub fn new(external_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_id: external_id.into(),
            name: name.into(),
            description: String::new(),
            sector: None,
            sub_sector: None,
            status: String::new(),
            estimated_cost: None,
            progress: None,
            current_situation: None,
            next_steps: None,
            risks: None,
            raw_data: Value::Object(Default::default()),
            last_synced_at: None,
        }
    }
}

/// Questionnaire catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub cod_source: String,
    pub question_id: Option<String>,
    pub dsc_type: String,
    pub dsc_title: String,
    pub is_active: bool,
}

/// Question row prior to insertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewQuestion {
    pub cod_source: String,
    pub question_id: Option<String>,
    pub dsc_type: String,
    pub dsc_title: String,
}
