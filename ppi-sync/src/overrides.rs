//! Override Merger
//!
//! Combines three sources of truth for one project, field by field:
//!
//! 1. curated override (when meaningful and the field is eligible)
//! 2. fresh external value (when meaningful)
//! 3. prior persisted value
//!
//! A meaningful prior value is never blanked by an empty incoming one.
//! Curated records are loaded once into an [`OverrideTable`] and never mutated.

use crate::identity::IdentityResolver;
use crate::mapping::{
    estimate_progress, fraction_to_progress, map_status, translate_sector, ProjectFields,
    DEFAULT_NAME, DEFAULT_STATUS,
};
use crate::normalize::{extract_text, split_items};
use chrono::{DateTime, Utc};
use ppi_common::db::NormalizedProject;
use ppi_common::{Error, Meaningful, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Key under which curated detail keys are stored in `raw_data`
pub const MANUAL_DETAILS_KEY: &str = "ManualDetails";

/// Curated correction for one project
///
/// Read from a JSON object. The identifier may be spelled `identifier`,
/// `guid` or `Guid`; `currentProjectStatus` and `estimatedCapitalCost` are
/// accepted for `status` and `estimatedCost`. Every other key is kept in
/// `details`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", rename_all = "camelCase")]
pub struct OverrideRecord {
    #[serde(rename = "guid")]
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_sector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Fraction, 0.75 means 75%
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_situation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_steps: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risks: Option<Vec<String>>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

const IDENTIFIER_KEYS: &[&str] = &["identifier", "guid", "Guid"];

impl TryFrom<Map<String, Value>> for OverrideRecord {
    type Error = String;

    fn try_from(mut map: Map<String, Value>) -> std::result::Result<Self, Self::Error> {
        let identifier = take(&mut map, IDENTIFIER_KEYS)
            .as_ref()
            .and_then(extract_text)
            .ok_or_else(|| "override record without identifier".to_string())?;

        let text = |v: Option<Value>| v.as_ref().and_then(extract_text);
        let number = |v: Option<Value>| v.as_ref().and_then(crate::normalize::number_of);

        let name = text(take(&mut map, &["name"]));
        let description = text(take(&mut map, &["description"]));
        let sector = text(take(&mut map, &["sector"]));
        let sub_sector = text(take(&mut map, &["subSector"]));
        let status = text(take(&mut map, &["status", "currentProjectStatus"]));
        let completion = number(take(&mut map, &["completion"]));
        let estimated_cost = number(take(&mut map, &["estimatedCost", "estimatedCapitalCost"]));
        let current_situation = text(take(&mut map, &["currentSituation"]));
        let next_steps = text(take(&mut map, &["nextSteps"]));
        let risks = take(&mut map, &["risks"]).and_then(|v| match v {
            Value::Array(items) => Some(items.iter().filter_map(extract_text).collect()),
            other => extract_text(&other).map(|t| split_items(&t)),
        });

        Ok(Self {
            identifier,
            name,
            description,
            sector,
            sub_sector,
            status,
            completion,
            estimated_cost,
            current_situation,
            next_steps,
            risks,
            details: map,
        })
    }
}

/// Remove every key in `keys`, returning the first non-null value
fn take(map: &mut Map<String, Value>, keys: &[&str]) -> Option<Value> {
    let mut found = None;
    for key in keys {
        if let Some(value) = map.remove(*key) {
            if found.is_none() && !value.is_null() {
                found = Some(value);
            }
        }
    }
    found
}

impl OverrideRecord {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Default::default()
        }
    }
}

/// Immutable lookup of curated records by identifier
#[derive(Debug, Clone, Default)]
pub struct OverrideTable {
    records: HashMap<String, OverrideRecord>,
}

impl OverrideTable {
    /// Load a JSON array of override records
    ///
    /// Entries that are not objects or lack an identifier are skipped with a
    /// warning. A later entry for the same identifier replaces an earlier one.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read override file {}: {}",
                path.display(),
                e
            ))
        })?;
        let table = Self::from_json(&content)?;
        info!(
            path = %path.display(),
            records = table.len(),
            "Loaded curated overrides"
        );
        Ok(table)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let entries: Vec<Value> = serde_json::from_str(content)?;
        let mut records = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<OverrideRecord>(entry) {
                Ok(record) => records.push(record),
                Err(e) => warn!(index, error = %e, "Skipping override entry"),
            }
        }
        Ok(Self::from_records(records))
    }

    pub fn from_records(records: impl IntoIterator<Item = OverrideRecord>) -> Self {
        let mut map = HashMap::new();
        for record in records {
            if let Some(previous) = map.insert(record.identifier.clone(), record) {
                debug!(identifier = %previous.identifier, "Duplicate override, keeping last");
            }
        }
        Self { records: map }
    }

    pub fn get(&self, identifier: &str) -> Option<&OverrideRecord> {
        self.records.get(identifier)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Overridable project fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProjectField {
    Name,
    Description,
    Sector,
    SubSector,
    Status,
    EstimatedCost,
    Progress,
    CurrentSituation,
    NextSteps,
    Risks,
}

impl ProjectField {
    pub const ALL: [ProjectField; 10] = [
        ProjectField::Name,
        ProjectField::Description,
        ProjectField::Sector,
        ProjectField::SubSector,
        ProjectField::Status,
        ProjectField::EstimatedCost,
        ProjectField::Progress,
        ProjectField::CurrentSituation,
        ProjectField::NextSteps,
        ProjectField::Risks,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProjectField::Name => "name",
            ProjectField::Description => "description",
            ProjectField::Sector => "sector",
            ProjectField::SubSector => "subSector",
            ProjectField::Status => "status",
            ProjectField::EstimatedCost => "estimatedCost",
            ProjectField::Progress => "progress",
            ProjectField::CurrentSituation => "currentSituation",
            ProjectField::NextSteps => "nextSteps",
            ProjectField::Risks => "risks",
        }
    }
}

impl fmt::Display for ProjectField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let key: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();
        let field = match key.as_str() {
            "name" => ProjectField::Name,
            "description" => ProjectField::Description,
            "sector" => ProjectField::Sector,
            "subsector" => ProjectField::SubSector,
            "status" | "currentprojectstatus" => ProjectField::Status,
            "estimatedcost" | "estimatedcapitalcost" => ProjectField::EstimatedCost,
            "progress" | "completion" => ProjectField::Progress,
            "currentsituation" => ProjectField::CurrentSituation,
            "nextsteps" => ProjectField::NextSteps,
            "risks" => ProjectField::Risks,
            _ => {
                return Err(Error::InvalidInput(format!(
                    "Unknown project field: {}",
                    s.trim()
                )))
            }
        };
        Ok(field)
    }
}

/// Fields a curated override may set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSet(BTreeSet<ProjectField>);

impl FieldSet {
    pub fn all() -> Self {
        Self(ProjectField::ALL.into_iter().collect())
    }

    pub fn none() -> Self {
        Self(BTreeSet::new())
    }

    pub fn only(fields: impl IntoIterator<Item = ProjectField>) -> Self {
        Self(fields.into_iter().collect())
    }

    pub fn contains(&self, field: ProjectField) -> bool {
        self.0.contains(&field)
    }

    pub fn iter(&self) -> impl Iterator<Item = ProjectField> + '_ {
        self.0.iter().copied()
    }
}

impl Default for FieldSet {
    fn default() -> Self {
        Self::all()
    }
}

impl FromStr for FieldSet {
    type Err = Error;

    /// Comma-separated field names; blank or `all` means every field
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
            return Ok(Self::all());
        }
        trimmed
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(ProjectField::from_str)
            .collect::<Result<BTreeSet<_>>>()
            .map(Self)
    }
}

impl fmt::Display for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(ProjectField::as_str).collect();
        f.write_str(&names.join(","))
    }
}

/// Inputs for merging one project
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeSources<'a> {
    pub fresh: Option<&'a ProjectFields>,
    pub fresh_raw: Option<&'a Value>,
    pub curated: Option<&'a OverrideRecord>,
    pub prior: Option<&'a NormalizedProject>,
}

/// Per-field precedence merge
#[derive(Debug, Clone, Default)]
pub struct OverrideMerger {
    eligible: FieldSet,
}

impl OverrideMerger {
    pub fn new(eligible: FieldSet) -> Self {
        Self { eligible }
    }

    pub fn eligible(&self) -> &FieldSet {
        &self.eligible
    }

    /// Merge all sources into the project stored under `external_id`
    ///
    /// The local id of `prior` is kept. `synced_at` stamps the result; when
    /// `None` the prior stamp is kept.
    pub fn merge(
        &self,
        external_id: &str,
        sources: MergeSources<'_>,
        synced_at: Option<DateTime<Utc>>,
    ) -> NormalizedProject {
        let MergeSources {
            fresh,
            fresh_raw,
            curated,
            prior,
        } = sources;

        let curated_text = |field: ProjectField, value: Option<&String>| -> Option<String> {
            if self.eligible.contains(field) {
                value.cloned()
            } else {
                None
            }
        };

        let name = first_meaningful([
            curated_text(ProjectField::Name, curated.and_then(|c| c.name.as_ref())),
            fresh.and_then(|f| f.name.clone()),
            prior.map(|p| p.name.clone()),
        ])
        .unwrap_or_else(|| DEFAULT_NAME.to_string());

        let description = first_meaningful([
            curated_text(
                ProjectField::Description,
                curated.and_then(|c| c.description.as_ref()),
            ),
            fresh.and_then(|f| f.description.clone()),
            prior.map(|p| p.description.clone()),
        ])
        .unwrap_or_default();

        let sector = first_meaningful([
            curated_text(ProjectField::Sector, curated.and_then(|c| c.sector.as_ref()))
                .map(|s| translate_sector(&s)),
            fresh.and_then(|f| f.sector.clone()),
            prior.and_then(|p| p.sector.clone()),
        ]);

        let sub_sector = first_meaningful([
            curated_text(
                ProjectField::SubSector,
                curated.and_then(|c| c.sub_sector.as_ref()),
            ),
            fresh.and_then(|f| f.sub_sector.clone()),
            prior.and_then(|p| p.sub_sector.clone()),
        ]);

        let status = first_meaningful([
            curated_text(ProjectField::Status, curated.and_then(|c| c.status.as_ref()))
                .map(|s| map_status(&s)),
            fresh.and_then(|f| f.status.clone()),
            prior.map(|p| p.status.clone()),
        ])
        .unwrap_or_else(|| DEFAULT_STATUS.to_string());

        let estimated_cost = first_meaningful([
            curated
                .filter(|_| self.eligible.contains(ProjectField::EstimatedCost))
                .and_then(|c| c.estimated_cost),
            fresh.and_then(|f| f.estimated_cost),
            prior.and_then(|p| p.estimated_cost),
        ]);

        let progress = first_meaningful([
            curated
                .filter(|_| self.eligible.contains(ProjectField::Progress))
                .and_then(|c| c.completion)
                .and_then(fraction_to_progress),
            fresh.and_then(|f| f.progress),
            prior.and_then(measured_progress),
        ])
        .unwrap_or_else(|| estimate_progress(&status));

        let current_situation = first_meaningful([
            curated_text(
                ProjectField::CurrentSituation,
                curated.and_then(|c| c.current_situation.as_ref()),
            ),
            fresh.and_then(|f| f.current_situation.clone()),
            prior.and_then(|p| p.current_situation.clone()),
        ]);

        let next_steps = first_meaningful([
            curated_text(
                ProjectField::NextSteps,
                curated.and_then(|c| c.next_steps.as_ref()),
            ),
            fresh.and_then(|f| f.next_steps.clone()),
            prior.and_then(|p| p.next_steps.clone()),
        ]);

        let risks = first_meaningful([
            curated
                .filter(|_| self.eligible.contains(ProjectField::Risks))
                .and_then(|c| c.risks.clone()),
            fresh.and_then(|f| f.risks.clone()),
            prior.and_then(|p| p.risks.clone()),
        ]);

        let raw_data = merge_raw_data(
            prior.map(|p| &p.raw_data),
            fresh_raw,
            curated.map(|c| &c.details),
        );

        let mut project = match prior {
            Some(p) => NormalizedProject {
                external_id: external_id.to_string(),
                ..p.clone()
            },
            None => NormalizedProject::new(external_id, name.clone()),
        };
        project.name = name;
        project.description = description;
        project.sector = sector;
        project.sub_sector = sub_sector;
        project.status = status;
        project.estimated_cost = estimated_cost;
        project.progress = Some(progress);
        project.current_situation = current_situation;
        project.next_steps = next_steps;
        project.risks = risks;
        project.raw_data = raw_data;
        if synced_at.is_some() {
            project.last_synced_at = synced_at;
        }
        project
    }

    /// Merge a curated record onto a persisted project with no fresh data
    ///
    /// Returns `None` when nothing would change.
    pub fn apply_to(
        &self,
        project: &NormalizedProject,
        curated: &OverrideRecord,
    ) -> Option<NormalizedProject> {
        let merged = self.merge(
            &project.external_id,
            MergeSources {
                curated: Some(curated),
                prior: Some(project),
                ..Default::default()
            },
            None,
        );
        (merged != *project).then_some(merged)
    }
}

/// Summary of an override application run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OverrideSummary {
    pub total: usize,
    pub matched: usize,
    pub updated: usize,
    pub errors: usize,
}

/// Projects changed by applying `table` to `projects`
///
/// Pure; the caller persists the returned projects.
pub fn plan_override_updates(
    projects: &[NormalizedProject],
    table: &OverrideTable,
    merger: &OverrideMerger,
    resolver: &IdentityResolver,
) -> (usize, Vec<NormalizedProject>) {
    let mut matched = 0;
    let mut changed = Vec::new();
    for project in projects {
        let key = resolver.override_lookup_key(&project.raw_data, &project.external_id);
        let Some(curated) = table.get(&key) else {
            continue;
        };
        matched += 1;
        if let Some(updated) = merger.apply_to(project, curated) {
            debug!(external_id = %project.external_id, "Override changes project");
            changed.push(updated);
        }
    }
    (matched, changed)
}

fn first_meaningful<T: Meaningful, const N: usize>(candidates: [Option<T>; N]) -> Option<T> {
    candidates.into_iter().flatten().find(|v| v.is_meaningful())
}

fn merge_raw_data(
    prior: Option<&Value>,
    fresh: Option<&Value>,
    details: Option<&Map<String, Value>>,
) -> Value {
    let mut merged = match prior {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    if let Some(Value::Object(fresh)) = fresh {
        for (key, value) in fresh {
            merged.insert(key.clone(), value.clone());
        }
    }
    if let Some(details) = details.filter(|d| !d.is_empty()) {
        merged.insert(
            MANUAL_DETAILS_KEY.to_string(),
            Value::Object(details.clone()),
        );
    }
    Value::Object(merged)
}

/// Stored progress that did not come from a status estimate
///
/// A value equal to the estimate for the stored status is treated as derived
/// and follows the merged status instead.
fn measured_progress(project: &NormalizedProject) -> Option<i64> {
    project
        .progress
        .filter(|&progress| progress != estimate_progress(&project.status))
}
