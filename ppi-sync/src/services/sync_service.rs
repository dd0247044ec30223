//! Source → local store synchronization
//!
//! Fetches the project list, then each project's detail with bounded
//! concurrency, and hands the records to the reconciliation driver.
//! A failed list request fails the run; a failed detail request only counts
//! against that record.

use super::source_client::{SourceClient, SourceError};
use crate::identity::source_key;
use crate::reconcile::{ReconciliationDriver, SyncSummary};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use ppi_common::db::{self, NormalizedProject};
use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Sync run errors
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error(transparent)]
    Common(#[from] ppi_common::Error),
}

/// Result of `sync all`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullSyncReport {
    pub projects: SyncSummary,
    pub sectors: usize,
    pub statuses: usize,
    pub last_sync: DateTime<Utc>,
}

/// Fetched records plus the number of detail fetches that failed
#[derive(Debug, Clone, Default)]
pub struct FetchedRecords {
    pub records: Vec<Value>,
    pub failures: usize,
}

pub struct SyncService {
    db: SqlitePool,
    source: Arc<SourceClient>,
    driver: ReconciliationDriver,
    fetch_concurrency: usize,
}

impl SyncService {
    pub fn new(
        db: SqlitePool,
        source: Arc<SourceClient>,
        driver: ReconciliationDriver,
        fetch_concurrency: usize,
    ) -> Self {
        Self {
            db,
            source,
            driver,
            fetch_concurrency: fetch_concurrency.max(1),
        }
    }

    pub fn driver(&self) -> &ReconciliationDriver {
        &self.driver
    }

    /// List projects and fetch their details
    ///
    /// Entries without a source key are passed through unchanged so the
    /// driver can count them as skipped. Output keeps list order.
    pub async fn fetch_records(&self, limit: Option<usize>) -> Result<FetchedRecords, SyncError> {
        let mut listed = self.source.list_projects().await?;
        if let Some(limit) = limit {
            listed.truncate(limit);
        }
        info!(count = listed.len(), "Fetched project list");

        let source = &self.source;
        let mut fetched: Vec<(usize, Option<Value>)> = stream::iter(listed.into_iter().enumerate())
            .map(|(index, entry)| async move {
                let Some(key) = source_key(&entry) else {
                    return (index, Some(entry));
                };
                match source.project_detail(&key).await {
                    Ok(detail) => (index, Some(overlay(entry, detail))),
                    Err(e) => {
                        warn!(key = %key, error = %e, "Failed to fetch project detail");
                        (index, None)
                    }
                }
            })
            .buffer_unordered(self.fetch_concurrency)
            .collect()
            .await;
        fetched.sort_by_key(|(index, _)| *index);

        let mut result = FetchedRecords::default();
        for (_, record) in fetched {
            match record {
                Some(record) => result.records.push(record),
                None => result.failures += 1,
            }
        }
        Ok(result)
    }

    /// Fetch and reconcile all projects
    pub async fn sync_projects(&self, limit: Option<usize>) -> Result<SyncSummary, SyncError> {
        let fetched = self.fetch_records(limit).await?;
        let mut summary = self
            .driver
            .run(&fetched.records, &self.db, Utc::now())
            .await?;
        summary.add_fetch_failures(fetched.failures);
        Ok(summary)
    }

    /// Fetch one project by source key, merge it against the stored copy
    /// and upsert it
    pub async fn sync_project(&self, key: &str) -> Result<NormalizedProject, SyncError> {
        let detail = self.source.project_detail(key).await?;

        let Some(identity) = self.driver.resolver().resolve(&detail, None) else {
            return Err(ppi_common::Error::NotFound(format!(
                "Source project {} has no identifier",
                key
            ))
            .into());
        };

        let mut snapshot: HashMap<String, NormalizedProject> = HashMap::new();
        if let Some(prior) =
            db::projects::load_project_by_external_id(&self.db, &identity.external_id).await?
        {
            snapshot.insert(prior.external_id.clone(), prior);
        }

        let records = [detail];
        let plan = self.driver.plan(&records, &snapshot, Utc::now());
        let Some(project) = plan.staged.into_iter().next() else {
            return Err(ppi_common::Error::Internal(format!("Nothing staged for {}", key)).into());
        };

        db::projects::upsert_project(&self.db, &project).await?;
        Ok(project)
    }

    pub async fn sectors(&self) -> Result<Vec<Value>, SyncError> {
        Ok(self.source.sectors().await?)
    }

    pub async fn statuses(&self) -> Result<Vec<Value>, SyncError> {
        Ok(self.source.statuses().await?)
    }

    /// Reference data and projects in one run
    pub async fn sync_all(&self) -> Result<FullSyncReport, SyncError> {
        let sectors = self.sectors().await?;
        let statuses = self.statuses().await?;
        let projects = self.sync_projects(None).await?;

        Ok(FullSyncReport {
            projects,
            sectors: sectors.len(),
            statuses: statuses.len(),
            last_sync: Utc::now(),
        })
    }
}

/// List entry with detail keys laid over it
fn overlay(entry: Value, detail: Value) -> Value {
    match (entry, detail) {
        (Value::Object(mut base), Value::Object(detail)) => {
            base.extend(detail);
            Value::Object(base)
        }
        (_, Value::Object(detail)) => Value::Object(detail),
        (entry, _) => entry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_overlay_keeps_list_identity() {
        let merged = overlay(
            json!({"Id": 42, "Name": "Lista"}),
            json!({"Name": "Detalhe", "Description": "Completa"}),
        );
        assert_eq!(merged["Id"], json!(42));
        assert_eq!(merged["Name"], json!("Detalhe"));
        assert_eq!(merged["Description"], json!("Completa"));
    }

    #[test]
    fn test_overlay_ignores_non_object_detail() {
        let merged = overlay(json!({"Id": 1}), json!("oops"));
        assert_eq!(merged, json!({"Id": 1}));
    }
}
