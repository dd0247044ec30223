//! Override extraction from HTTP client log dumps
//!
//! An exported request log stores each response as
//! `"Response Body": "<escaped JSON>"`. Every body that decodes to a project
//! object with a GUID becomes one curated override record; when a GUID
//! appears more than once the last body wins.

use crate::normalize::{extract_text, resolve_number, resolve_text};
use crate::overrides::OverrideRecord;
use ppi_common::{Error, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

const BODY_MARKER: &str = "\"Response Body\"";

/// Counts of one extraction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractSummary {
    pub bodies: usize,
    pub parsed: usize,
    pub errors: usize,
    pub records: usize,
}

/// Extract override records from log text
pub fn extract_overrides(log: &str) -> (Vec<OverrideRecord>, ExtractSummary) {
    let mut summary = ExtractSummary::default();
    let mut records: Vec<OverrideRecord> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (offset, _) in log.match_indices(BODY_MARKER) {
        let rest = &log[offset + BODY_MARKER.len()..];
        let Some(literal) = rest.trim_start().strip_prefix(':') else {
            continue;
        };
        summary.bodies += 1;

        let project = match decode_body(literal.trim_start()) {
            Ok(project) => project,
            Err(reason) => {
                summary.errors += 1;
                if summary.errors <= 10 {
                    warn!(offset, reason = %reason, "Unreadable response body");
                }
                continue;
            }
        };
        summary.parsed += 1;

        let Some(record) = record_from_project(&project) else {
            continue;
        };
        match positions.get(&record.identifier) {
            Some(&pos) => records[pos] = record,
            None => {
                positions.insert(record.identifier.clone(), records.len());
                records.push(record);
            }
        }
    }

    summary.records = records.len();
    (records, summary)
}

/// Read `input`, extract and write the override array to `output`
pub fn extract_overrides_file(input: &Path, output: &Path) -> Result<ExtractSummary> {
    let log = std::fs::read_to_string(input).map_err(|e| {
        Error::Config(format!("Failed to read log dump {}: {}", input.display(), e))
    })?;

    let (records, summary) = extract_overrides(&log);
    let json = serde_json::to_string_pretty(&records)?;
    std::fs::write(output, json)?;

    info!(
        input = %input.display(),
        output = %output.display(),
        bodies = summary.bodies,
        parsed = summary.parsed,
        errors = summary.errors,
        records = summary.records,
        "Override extraction finished"
    );
    Ok(summary)
}

/// Decode the JSON string literal at the start of `literal`, then the
/// object it contains
fn decode_body(literal: &str) -> std::result::Result<Value, String> {
    if !literal.starts_with('"') {
        return Err("body is not a string".to_string());
    }
    let text = serde_json::Deserializer::from_str(literal)
        .into_iter::<String>()
        .next()
        .ok_or_else(|| "empty body".to_string())?
        .map_err(|e| e.to_string())?;

    let start = text.find('{').ok_or_else(|| "no JSON object".to_string())?;
    let end = text.rfind('}').ok_or_else(|| "no JSON object".to_string())?;
    if end < start {
        return Err("no JSON object".to_string());
    }
    serde_json::from_str(&text[start..=end]).map_err(|e| e.to_string())
}

fn record_from_project(project: &Value) -> Option<OverrideRecord> {
    let guid = resolve_text(project, &["Guid", "guid"])?;

    let text = |paths: &[&str]| resolve_text(project, paths).map(Value::String);
    let list = |key: &str| match project.get(key) {
        Some(Value::Array(items)) => Value::Array(items.clone()),
        _ => Value::Array(Vec::new()),
    };
    let number = |key: &str| match project.get(key) {
        Some(Value::Number(n)) => Some(Value::Number(n.clone())),
        _ => None,
    };
    let flag = |key: &str| Value::Bool(project.get(key).is_some_and(truthy));

    let territories: Vec<Value> = match project.get("Territories") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|t| extract_text(t).map(Value::String))
            .collect(),
        _ => Vec::new(),
    };

    let mut entry = Map::new();
    let mut put = |key: &str, value: Option<Value>| {
        entry.insert(key.to_string(), value.unwrap_or(Value::Null));
    };
    put("guid", Some(Value::String(guid)));
    put("name", text(&["Name", "name"]));
    put("description", text(&["Description", "description"]));
    put("sector", text(&["Sector.Value", "Sector.Name"]));
    put("subSector", text(&["SubSector.Value", "SubSector.Name"]));
    put("otherSubsector", text(&["OtherSubsector.Value"]));
    put("locations", Some(list("Locations")));
    put("territories", Some(Value::Array(territories)));
    put("isPPP", Some(flag("IsPPP")));
    put("isUnsolicited", Some(flag("IsUnsolicited")));
    put("typeOfProject", Some(list("TypeOfProject")));
    put("ownerOrganisation", text(&["OwnerOrganisation.Value"]));
    put("currentProjectStatus", text(&["CurrentProjectStatus.Value"]));
    put(
        "currentProjectStatusCustom",
        text(&["CurrentProjectStatusCustom.Value"]),
    );
    put("completion", number("Completion"));
    put("estimatedCapitalCost", number("EstimatedCapitalCost"));
    put("originalCurrency", text(&["OriginalCurrency.Value"]));
    put(
        "originalCurrencyEstimatedCapitalCost",
        resolve_number(project, &["OriginalCurrencyEstimatedCapitalCost"])
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
    );
    put("projectEstimatedDueDate", project.get("ProjectEstimatedDueDate").cloned());
    put("created", project.get("Created").cloned());
    put("modified", project.get("Modified").cloned());
    put("gpsCoordinates", Some(list("GPSCoordinates")));

    match OverrideRecord::try_from(entry) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(error = %e, "Skipping extracted project");
            None
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Null => false,
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn log_entry(body: &Value) -> String {
        let escaped = serde_json::to_string(&body.to_string()).unwrap();
        format!(
            "{{\n  \"Request URL\": \"https://api.example/projects/x\",\n  \"Response Body\": {}\n}}\n",
            escaped
        )
    }

    #[test]
    fn test_extracts_rich_fields() {
        let body = json!({
            "Guid": "3f2504e0-4f89-11d3-9a0c-0305e82c3301",
            "Name": "Porto de Itaqui",
            "Description": "Arrendamento \"IQI\"",
            "Sector": {"Value": "Transport"},
            "Territories": [{"Value": "MA"}, "PI"],
            "IsPPP": 1,
            "Completion": 0.4,
            "EstimatedCapitalCost": 1500000,
            "CurrentProjectStatus": {"Value": "In Progress"}
        });
        let (records, summary) = extract_overrides(&log_entry(&body));

        assert_eq!(summary.bodies, 1);
        assert_eq!(summary.parsed, 1);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.identifier, "3f2504e0-4f89-11d3-9a0c-0305e82c3301");
        assert_eq!(record.description.as_deref(), Some("Arrendamento \"IQI\""));
        assert_eq!(record.sector.as_deref(), Some("Transport"));
        assert_eq!(record.status.as_deref(), Some("In Progress"));
        assert_eq!(record.completion, Some(0.4));
        assert_eq!(record.estimated_cost, Some(1_500_000.0));
        assert_eq!(record.details["territories"], json!(["MA", "PI"]));
        assert_eq!(record.details["isPPP"], json!(true));
    }

    #[test]
    fn test_last_body_per_guid_wins_and_errors_counted() {
        let first = json!({"Guid": "g-1", "Name": "Antigo"});
        let second = json!({"Guid": "g-1", "Name": "Novo"});
        let no_guid = json!({"Name": "Sem guid"});
        let mut log = log_entry(&first);
        log.push_str("\"Response Body\": \"not json at all\"\n");
        log.push_str(&log_entry(&no_guid));
        log.push_str(&log_entry(&second));

        let (records, summary) = extract_overrides(&log);
        assert_eq!(summary.bodies, 4);
        assert_eq!(summary.parsed, 3);
        assert_eq!(summary.errors, 1);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name.as_deref(), Some("Novo"));
    }

    #[test]
    fn test_written_file_loads_as_override_table() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("dump.txt");
        let output = dir.path().join("overrides.json");
        std::fs::write(
            &input,
            log_entry(&json!({"Guid": "g-9", "Description": "Rica", "Completion": 0.5})),
        )
        .unwrap();

        let summary = extract_overrides_file(&input, &output).unwrap();
        assert_eq!(summary.records, 1);

        let table = crate::overrides::OverrideTable::load(&output).unwrap();
        let record = table.get("g-9").unwrap();
        assert_eq!(record.description.as_deref(), Some("Rica"));
        assert_eq!(record.completion, Some(0.5));
    }
}
