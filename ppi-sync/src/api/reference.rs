//! Reference data handlers
//!
//! GET /api/sectors, GET /api/statuses
//!
//! Served from the source registry; when it is unreachable or returns
//! nothing a static list is served instead.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use serde_json::Value;

use crate::mapping::{map_status, translate_sector, ProjectStatus};
use crate::normalize::{extract_text, resolve_text};
use crate::AppState;

pub const FALLBACK_SECTORS: &[&str] = &[
    "Transporte",
    "Energia",
    "Infraestrutura",
    "Tecnologia",
    "Saúde",
    "Educação",
];

const ID_KEYS: &[&str] = &["Id", "id", "Key", "Value", "Name"];
const NAME_KEYS: &[&str] = &["Value", "Name", "Title", "name"];

/// One selectable value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceItem {
    pub id: String,
    pub name: String,
}

/// Reference list response
#[derive(Debug, Serialize)]
pub struct ReferenceResponse {
    pub items: Vec<ReferenceItem>,
    /// "registry" or "fallback"
    pub source: &'static str,
}

fn item_of(entry: &Value, translate: fn(&str) -> String) -> Option<ReferenceItem> {
    let name = resolve_text(entry, NAME_KEYS).or_else(|| extract_text(entry))?;
    let id = resolve_text(entry, ID_KEYS).unwrap_or_else(|| name.clone());
    Some(ReferenceItem {
        id,
        name: translate(&name),
    })
}

fn respond(
    kind: &str,
    fetched: Result<Vec<Value>, crate::services::SourceError>,
    translate: fn(&str) -> String,
    fallback: fn() -> Vec<ReferenceItem>,
) -> ReferenceResponse {
    match fetched {
        Ok(entries) => {
            let items: Vec<ReferenceItem> =
                entries.iter().filter_map(|e| item_of(e, translate)).collect();
            if !items.is_empty() {
                return ReferenceResponse {
                    items,
                    source: "registry",
                };
            }
            tracing::warn!(kind, "Registry returned no reference data, using fallback");
        }
        Err(e) => {
            tracing::warn!(kind, error = %e, "Reference data unavailable, using fallback");
        }
    }
    ReferenceResponse {
        items: fallback(),
        source: "fallback",
    }
}

pub fn fallback_sectors() -> Vec<ReferenceItem> {
    FALLBACK_SECTORS
        .iter()
        .map(|name| ReferenceItem {
            id: name.to_lowercase(),
            name: name.to_string(),
        })
        .collect()
}

pub fn fallback_statuses() -> Vec<ReferenceItem> {
    ProjectStatus::ALL
        .iter()
        .map(|status| ReferenceItem {
            id: status.slug().to_string(),
            name: status.label().to_string(),
        })
        .collect()
}

/// GET /api/sectors
pub async fn list_sectors(State(state): State<AppState>) -> Json<ReferenceResponse> {
    let fetched = state.source.sectors().await;
    Json(respond("sectors", fetched, translate_sector, fallback_sectors))
}

/// GET /api/statuses
pub async fn list_statuses(State(state): State<AppState>) -> Json<ReferenceResponse> {
    let fetched = state.source.statuses().await;
    Json(respond("statuses", fetched, map_status, fallback_statuses))
}

/// Build reference data routes
pub fn reference_routes() -> Router<AppState> {
    Router::new()
        .route("/api/sectors", get(list_sectors))
        .route("/api/statuses", get(list_statuses))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::SourceError;
    use serde_json::json;

    #[test]
    fn test_registry_items_are_translated() {
        let response = respond(
            "sectors",
            Ok(vec![json!({"Id": 3, "Value": "Transport"}), json!("Energy")]),
            translate_sector,
            fallback_sectors,
        );
        assert_eq!(response.source, "registry");
        assert_eq!(response.items[0].id, "3");
        assert_eq!(response.items[0].name, "Transporte");
        assert_eq!(response.items[1].id, "Energy");
    }

    #[test]
    fn test_failure_serves_fallback() {
        let response = respond(
            "statuses",
            Err(SourceError::Network("refused".to_string())),
            map_status,
            fallback_statuses,
        );
        assert_eq!(response.source, "fallback");
        assert_eq!(response.items.len(), ProjectStatus::ALL.len());
    }

    #[test]
    fn test_empty_registry_serves_fallback() {
        let response = respond("sectors", Ok(vec![]), translate_sector, fallback_sectors);
        assert_eq!(response.source, "fallback");
        assert_eq!(response.items[0].name, "Transporte");
    }
}
