//! Stage-status snapshot updates
//!
//! Applies a stage-status CSV (one row per project, keyed by display name)
//! to a JSON array of projects. Names are matched with [`NameMatcher`]
//! because the CSV and the snapshot share no identifier. The snapshot is
//! backed up before it is rewritten.

use crate::identity::{clean_name, NameMatcher};
use crate::mapping::NAME_FIELDS;
use crate::normalize::resolve_text;
use chrono::{DateTime, SecondsFormat, Utc};
use ppi_common::{Error, Result};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Stage key in the snapshot and the CSV column it is read from
pub const STAGE_COLUMNS: &[(&str, &str)] = &[
    ("etapa2", "Estudos"),
    ("etapa5", "Consulta Pública"),
    ("etapa9", "Edital"),
    ("etapa13", "Aviso/TCU"),
];

const NOT_AVAILABLE: &str = "Não Disponível";
const COMPLETED: &str = "Concluído";

/// Stage statuses for one CSV row
#[derive(Debug, Clone, PartialEq)]
pub struct StageStatusRow {
    pub name: String,
    /// Status per stage key, in [`STAGE_COLUMNS`] order
    pub stages: Vec<(&'static str, String)>,
}

/// Counts of one snapshot update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageUpdateSummary {
    pub total: usize,
    pub updated: usize,
    pub not_found: Vec<String>,
}

/// Translate a CSV stage status; unknown values pass through
pub fn map_stage_status(raw: &str) -> String {
    match raw.trim() {
        "" => NOT_AVAILABLE,
        "Completed" => COMPLETED,
        "In progress" => "Em Andamento",
        "Not started" => "Não Iniciado",
        "Not Available" => NOT_AVAILABLE,
        other => other,
    }
    .to_string()
}

/// Overall project status implied by its stage statuses
///
/// The latest completed stage wins; with none completed the project is
/// still being planned.
pub fn derive_overall_status(stages: &Map<String, Value>) -> &'static str {
    let completed = |key: &str| {
        stages
            .get(key)
            .and_then(|s| s.get("status"))
            .and_then(Value::as_str)
            .is_some_and(|s| s == COMPLETED || s.eq_ignore_ascii_case("Completed"))
    };

    if completed("etapa13") {
        "Contrato Assinado"
    } else if completed("etapa9") {
        "Em Licitação"
    } else if completed("etapa5") {
        "Em Análise"
    } else if completed("etapa2") {
        "Em Estudos"
    } else {
        "Em Planejamento"
    }
}

/// Parse the stage-status CSV
///
/// A `name` column is required; missing stage columns read as not available.
pub fn parse_stage_csv(content: &str) -> Result<Vec<StageStatusRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| Error::InvalidInput(format!("CSV header error: {}", e)))?
        .clone();
    let column = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));

    let name_idx = column("name")
        .ok_or_else(|| Error::InvalidInput("Stage CSV has no 'name' column".to_string()))?;
    let stage_idx: Vec<(&'static str, Option<usize>)> = STAGE_COLUMNS
        .iter()
        .map(|(key, header)| (*key, column(header)))
        .collect();

    let mut rows = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let record = result.map_err(|e| {
            Error::InvalidInput(format!("CSV parse error at row {}: {}", row_idx + 2, e))
        })?;

        let name = clean_name(record.get(name_idx).unwrap_or_default());
        if name.is_empty() {
            continue;
        }

        let stages = stage_idx
            .iter()
            .map(|(key, idx)| {
                let raw = idx.and_then(|i| record.get(i)).unwrap_or_default();
                (*key, map_stage_status(raw))
            })
            .collect();
        rows.push(StageStatusRow { name, stages });
    }

    Ok(rows)
}

/// Write stage statuses into matching projects
///
/// Projects are matched by name. With `derive_status` the top-level `status`
/// is recomputed from the stages.
pub fn apply_stage_statuses(
    projects: &mut [Value],
    rows: &[StageStatusRow],
    derive_status: bool,
    now: DateTime<Utc>,
) -> StageUpdateSummary {
    let matcher = NameMatcher::new(rows.iter().enumerate().map(|(i, r)| (r.name.clone(), i)));
    let stamp = now.to_rfc3339_opts(SecondsFormat::Millis, true);
    let mut summary = StageUpdateSummary {
        total: projects.len(),
        ..Default::default()
    };

    for project in projects.iter_mut() {
        let Some(name) = resolve_text(project, NAME_FIELDS) else {
            warn!("Skipping snapshot entry without a name");
            continue;
        };
        let Some(row) = matcher.find(&name).map(|i| &rows[i]) else {
            debug!(name = %name, "No stage status for project");
            summary.not_found.push(name);
            continue;
        };
        let Some(object) = project.as_object_mut() else {
            continue;
        };

        let details = object
            .entry("details")
            .or_insert_with(|| Value::Object(Map::new()));
        if !details.is_object() {
            *details = Value::Object(Map::new());
        }
        if let Value::Object(details) = details {
            for (key, status) in &row.stages {
                details.insert(
                    key.to_string(),
                    json!({"status": status, "lastUpdated": stamp}),
                );
            }
            if derive_status {
                let status = derive_overall_status(details);
                object.insert("status".to_string(), Value::String(status.to_string()));
            }
        }

        debug!(name = %name, matched = %row.name, "Updated stage statuses");
        summary.updated += 1;
    }

    summary
}

/// Backup path next to the snapshot, `<stem>_backup.json`
pub fn backup_path(snapshot: &Path) -> PathBuf {
    let stem = snapshot
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "projects".to_string());
    snapshot.with_file_name(format!("{}_backup.json", stem))
}

/// Back up, update and rewrite the snapshot at `projects_path`
pub fn update_snapshot_file(
    projects_path: &Path,
    csv_path: &Path,
    derive_status: bool,
) -> Result<StageUpdateSummary> {
    let snapshot = std::fs::read_to_string(projects_path).map_err(|e| {
        Error::Config(format!(
            "Failed to read project snapshot {}: {}",
            projects_path.display(),
            e
        ))
    })?;
    let csv_content = std::fs::read_to_string(csv_path).map_err(|e| {
        Error::Config(format!(
            "Failed to read stage CSV {}: {}",
            csv_path.display(),
            e
        ))
    })?;

    let mut projects: Vec<Value> = serde_json::from_str(&snapshot)?;
    let rows = parse_stage_csv(&csv_content)?;

    let backup = backup_path(projects_path);
    std::fs::write(&backup, &snapshot)?;
    info!(backup = %backup.display(), "Snapshot backed up");

    let summary = apply_stage_statuses(&mut projects, &rows, derive_status, Utc::now());
    std::fs::write(projects_path, serde_json::to_string_pretty(&projects)?)?;

    for name in &summary.not_found {
        warn!(name = %name, "No stage status found");
    }
    info!(
        total = summary.total,
        updated = summary.updated,
        not_found = summary.not_found.len(),
        rows = rows.len(),
        "Stage statuses applied"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const CSV: &str = "name,Estudos,Consulta Pública,Edital,Aviso/TCU\n\
                       Rodovia BR-101 Sul,Completed,Completed,In progress,\n\
                       Concess&#227;o Porto de Santos,Completed,Not started,Not started,Not Available\n";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 11, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_stage_csv_maps_statuses_and_cleans_names() {
        let rows = parse_stage_csv(CSV).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].name, "Concessão Porto de Santos");
        assert_eq!(
            rows[0].stages,
            vec![
                ("etapa2", "Concluído".to_string()),
                ("etapa5", "Concluído".to_string()),
                ("etapa9", "Em Andamento".to_string()),
                ("etapa13", NOT_AVAILABLE.to_string()),
            ]
        );
    }

    #[test]
    fn test_missing_name_column_is_rejected() {
        assert!(parse_stage_csv("titulo,Estudos\nX,Completed\n").is_err());
    }

    #[test]
    fn test_apply_matches_by_partial_name_and_derives_status() {
        let rows = parse_stage_csv(CSV).unwrap();
        let mut projects = vec![
            json!({"id": "a", "name": "rodovia br-101 sul", "status": "Rascunho"}),
            json!({"id": "b", "name": "Porto de Santos"}),
            json!({"id": "c", "name": "Ferrovia Transnordestina"}),
        ];

        let summary = apply_stage_statuses(&mut projects, &rows, true, now());

        assert_eq!(summary.total, 3);
        assert_eq!(summary.updated, 2);
        assert_eq!(summary.not_found, vec!["Ferrovia Transnordestina".to_string()]);
        assert_eq!(projects[0]["details"]["etapa5"]["status"], json!("Concluído"));
        assert_eq!(projects[0]["status"], json!("Em Análise"));
        assert_eq!(projects[1]["status"], json!("Em Estudos"));
        assert!(projects[2].get("details").is_none());
    }

    #[test]
    fn test_derive_overall_status_ladder() {
        let stages = |done: &[&str]| {
            let mut map = Map::new();
            for key in done {
                map.insert(key.to_string(), json!({"status": "Completed"}));
            }
            map
        };
        assert_eq!(derive_overall_status(&stages(&[])), "Em Planejamento");
        assert_eq!(derive_overall_status(&stages(&["etapa2"])), "Em Estudos");
        assert_eq!(
            derive_overall_status(&stages(&["etapa2", "etapa13"])),
            "Contrato Assinado"
        );
    }

    #[test]
    fn test_update_snapshot_file_writes_backup() {
        let dir = tempfile::tempdir().unwrap();
        let projects_path = dir.path().join("projects.json");
        let csv_path = dir.path().join("status.csv");
        let original = r#"[{"name": "Rodovia BR-101 Sul"}]"#;
        std::fs::write(&projects_path, original).unwrap();
        std::fs::write(&csv_path, CSV).unwrap();

        let summary = update_snapshot_file(&projects_path, &csv_path, false).unwrap();
        assert_eq!(summary.updated, 1);

        let backup = std::fs::read_to_string(dir.path().join("projects_backup.json")).unwrap();
        assert_eq!(backup, original);
        let updated: Vec<Value> =
            serde_json::from_str(&std::fs::read_to_string(&projects_path).unwrap()).unwrap();
        assert_eq!(updated[0]["details"]["etapa2"]["status"], json!("Concluído"));
        assert!(updated[0].get("status").is_none());
    }

    #[test]
    fn test_missing_snapshot_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = update_snapshot_file(
            &dir.path().join("missing.json"),
            &dir.path().join("missing.csv"),
            false,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
