//! Reconciliation Driver
//!
//! Single pass over a batch of external records:
//! resolve identity → map fields → merge with override and prior → stage.
//! Staged upserts are applied afterwards, one at a time.
//!
//! Planning is pure. Given the same records, snapshot, overrides and
//! `synced_at` it produces the same plan, so a repeated run stores the same
//! state.

use crate::identity::IdentityResolver;
use crate::mapping::ProjectFields;
use crate::overrides::{
    plan_override_updates, MergeSources, OverrideMerger, OverrideSummary, OverrideTable,
};
use chrono::{DateTime, Utc};
use ppi_common::db::projects::UpsertOutcome;
use ppi_common::db::{self, NormalizedProject};
use ppi_common::Result;
use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome counts of one reconciliation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub total: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl SyncSummary {
    /// Count records that never reached the driver because fetching failed
    pub fn add_fetch_failures(&mut self, failures: usize) {
        self.total += failures;
        self.errors += failures;
    }
}

/// Upserts staged by the plan phase, in record order
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub staged: Vec<NormalizedProject>,
    pub total: usize,
    pub skipped: usize,
}

/// Batch reconciler for one source
#[derive(Debug, Clone)]
pub struct ReconciliationDriver {
    resolver: IdentityResolver,
    merger: OverrideMerger,
    overrides: Arc<OverrideTable>,
}

impl ReconciliationDriver {
    pub fn new(
        resolver: IdentityResolver,
        merger: OverrideMerger,
        overrides: Arc<OverrideTable>,
    ) -> Self {
        Self {
            resolver,
            merger,
            overrides,
        }
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    /// Build the upserts for `records` against `snapshot`
    ///
    /// Records that are not objects or have no resolvable identity are
    /// skipped. A second record with the same identity merges onto the first.
    pub fn plan(
        &self,
        records: &[Value],
        snapshot: &HashMap<String, NormalizedProject>,
        synced_at: DateTime<Utc>,
    ) -> SyncPlan {
        let mut plan = SyncPlan {
            total: records.len(),
            ..Default::default()
        };
        let mut positions: HashMap<String, usize> = HashMap::new();

        for (index, record) in records.iter().enumerate() {
            if !record.is_object() {
                warn!(index, "Skipping record that is not an object");
                plan.skipped += 1;
                continue;
            }

            let Some(identity) = self.resolver.resolve(record, None) else {
                warn!(index, "Skipping record without identifier");
                plan.skipped += 1;
                continue;
            };
            let external_id = identity.external_id;

            let fresh = ProjectFields::from_record(record);
            let lookup_key = self.resolver.override_lookup_key(record, &external_id);
            let curated = self.overrides.get(&lookup_key);

            let staged_at = positions.get(&external_id).copied();
            let prior = match staged_at {
                Some(pos) => Some(&plan.staged[pos]),
                None => snapshot.get(&external_id),
            };

            let merged = self.merger.merge(
                &external_id,
                MergeSources {
                    fresh: Some(&fresh),
                    fresh_raw: Some(record),
                    curated,
                    prior,
                },
                Some(synced_at),
            );

            debug!(
                external_id = %external_id,
                kind = ?identity.kind,
                curated = curated.is_some(),
                "Staged project"
            );

            match staged_at {
                Some(pos) => plan.staged[pos] = merged,
                None => {
                    positions.insert(external_id, plan.staged.len());
                    plan.staged.push(merged);
                }
            }
        }

        plan
    }

    /// Write staged upserts; failures are counted, never fatal
    pub async fn apply(&self, plan: SyncPlan, pool: &SqlitePool) -> SyncSummary {
        let mut summary = SyncSummary {
            total: plan.total,
            skipped: plan.skipped,
            ..Default::default()
        };

        for project in &plan.staged {
            match db::projects::upsert_project(pool, project).await {
                Ok(UpsertOutcome::Created) => summary.created += 1,
                Ok(UpsertOutcome::Updated) => summary.updated += 1,
                Err(e) => {
                    warn!(external_id = %project.external_id, error = %e, "Failed to persist project");
                    summary.errors += 1;
                }
            }
        }

        summary
    }

    /// Snapshot, plan and apply in one call
    ///
    /// Fails only if the snapshot cannot be read.
    pub async fn run(
        &self,
        records: &[Value],
        pool: &SqlitePool,
        synced_at: DateTime<Utc>,
    ) -> Result<SyncSummary> {
        let snapshot = db::projects::load_snapshot(pool).await?;
        let plan = self.plan(records, &snapshot, synced_at);
        let summary = self.apply(plan, pool).await;

        info!(
            total = summary.total,
            created = summary.created,
            updated = summary.updated,
            skipped = summary.skipped,
            errors = summary.errors,
            "Reconciliation finished"
        );
        Ok(summary)
    }

    /// Merge curated overrides onto every persisted project
    ///
    /// Only projects whose merged form differs are written.
    pub async fn apply_overrides(&self, pool: &SqlitePool) -> Result<OverrideSummary> {
        let projects = db::projects::list_projects(pool, None, None).await?;
        let (matched, changed) =
            plan_override_updates(&projects, &self.overrides, &self.merger, &self.resolver);

        let mut summary = OverrideSummary {
            total: projects.len(),
            matched,
            ..Default::default()
        };

        for project in &changed {
            match db::projects::upsert_project(pool, project).await {
                Ok(_) => summary.updated += 1,
                Err(e) => {
                    warn!(external_id = %project.external_id, error = %e, "Failed to apply override");
                    summary.errors += 1;
                }
            }
        }

        info!(
            total = summary.total,
            matched = summary.matched,
            updated = summary.updated,
            errors = summary.errors,
            "Override application finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overrides::{FieldSet, OverrideRecord};
    use chrono::TimeZone;
    use serde_json::json;

    fn driver(overrides: OverrideTable) -> ReconciliationDriver {
        ReconciliationDriver::new(
            IdentityResolver::new("source"),
            OverrideMerger::new(FieldSet::all()),
            Arc::new(overrides),
        )
    }

    fn synced_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 11, 12, 4, 52).unwrap()
    }

    #[test]
    fn test_plan_skips_unidentifiable_records() {
        let records = vec![
            json!({"Guid": "abc-123", "Name": "Porto"}),
            json!({"Name": "Sem identificador"}),
            json!({"Id": 42, "Name": "Rodovia"}),
            json!("garbage"),
        ];
        let plan = driver(OverrideTable::default()).plan(&records, &HashMap::new(), synced_at());

        assert_eq!(plan.total, 4);
        assert_eq!(plan.skipped, 2);
        let ids: Vec<_> = plan.staged.iter().map(|p| p.external_id.as_str()).collect();
        assert_eq!(ids, vec!["abc-123", "source-42"]);
        assert!(plan
            .staged
            .iter()
            .all(|p| p.last_synced_at == Some(synced_at())));
    }

    #[test]
    fn test_duplicate_identity_merges_onto_first() {
        let records = vec![
            json!({"Guid": "abc-123", "Name": "Porto", "Description": "Primeiro"}),
            json!({"Guid": "abc-123", "Description": ""}),
        ];
        let plan = driver(OverrideTable::default()).plan(&records, &HashMap::new(), synced_at());

        assert_eq!(plan.staged.len(), 1);
        assert_eq!(plan.staged[0].name, "Porto");
        assert_eq!(plan.staged[0].description, "Primeiro");
    }

    #[test]
    fn test_override_applies_by_guid() {
        let mut curated = OverrideRecord::new("abc-123");
        curated.description = Some("Descrição curada".to_string());
        let table = OverrideTable::from_records([curated]);

        let records = vec![json!({"Guid": "abc-123", "Description": "Da fonte"})];
        let plan = driver(table).plan(&records, &HashMap::new(), synced_at());
        assert_eq!(plan.staged[0].description, "Descrição curada");
    }

    #[test]
    fn test_snapshot_entry_is_prior() {
        let mut existing = NormalizedProject::new("abc-123", "Porto");
        existing.description = "X".to_string();
        let snapshot = HashMap::from([("abc-123".to_string(), existing.clone())]);

        let records = vec![json!({"Guid": "abc-123", "Description": "", "Completion": 0.75})];
        let plan = driver(OverrideTable::default()).plan(&records, &snapshot, synced_at());

        let merged = &plan.staged[0];
        assert_eq!(merged.id, existing.id);
        assert_eq!(merged.description, "X");
        assert_eq!(merged.progress, Some(75));
    }
}
