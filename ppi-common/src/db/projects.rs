//! Project persistence
//!
//! `external_id` is the upsert key; the local `id` is assigned once and never
//! rewritten by an upsert.

use crate::db::models::NormalizedProject;
use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use uuid::Uuid;

const PROJECT_COLUMNS: &str = "id, external_id, name, description, sector, sub_sector, status, \
     estimated_cost, progress, current_situation, next_steps, risks, raw_data, last_synced_at";

/// Result of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Insert or update a project keyed by `external_id`
pub async fn upsert_project(pool: &SqlitePool, project: &NormalizedProject) -> Result<UpsertOutcome> {
    let existing: Option<String> =
        sqlx::query_scalar("SELECT id FROM projects WHERE external_id = ?")
            .bind(&project.external_id)
            .fetch_optional(pool)
            .await?;

    let risks = encode_risks(&project.risks)?;
    let raw_data = serde_json::to_string(&project.raw_data)?;

    sqlx::query(
        r#"
        INSERT INTO projects (
            id, external_id, name, description, sector, sub_sector, status,
            estimated_cost, progress, current_situation, next_steps, risks,
            raw_data, last_synced_at, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
        ON CONFLICT(external_id) DO UPDATE SET
            name = excluded.name,
            description = excluded.description,
            sector = excluded.sector,
            sub_sector = excluded.sub_sector,
            status = excluded.status,
            estimated_cost = excluded.estimated_cost,
            progress = excluded.progress,
            current_situation = excluded.current_situation,
            next_steps = excluded.next_steps,
            risks = excluded.risks,
            raw_data = excluded.raw_data,
            last_synced_at = excluded.last_synced_at,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(project.id.to_string())
    .bind(&project.external_id)
    .bind(&project.name)
    .bind(&project.description)
    .bind(&project.sector)
    .bind(&project.sub_sector)
    .bind(&project.status)
    .bind(project.estimated_cost)
    .bind(project.progress)
    .bind(&project.current_situation)
    .bind(&project.next_steps)
    .bind(risks)
    .bind(raw_data)
    .bind(project.last_synced_at.map(format_timestamp))
    .execute(pool)
    .await?;

    Ok(if existing.is_some() {
        UpsertOutcome::Updated
    } else {
        UpsertOutcome::Created
    })
}

/// Insert a brand-new project, failing if the external id is taken
pub async fn insert_project(pool: &SqlitePool, project: &NormalizedProject) -> Result<()> {
    let taken: Option<String> = sqlx::query_scalar("SELECT id FROM projects WHERE external_id = ?")
        .bind(&project.external_id)
        .fetch_optional(pool)
        .await?;
    if taken.is_some() {
        return Err(Error::InvalidInput(format!(
            "Project with external id {} already exists",
            project.external_id
        )));
    }

    match upsert_project(pool, project).await? {
        UpsertOutcome::Created => Ok(()),
        UpsertOutcome::Updated => Err(Error::Internal(format!(
            "Project {} was created concurrently",
            project.external_id
        ))),
    }
}

/// Load project by local id
pub async fn load_project(pool: &SqlitePool, id: Uuid) -> Result<Option<NormalizedProject>> {
    let sql = format!("SELECT {} FROM projects WHERE id = ?", PROJECT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(project_from_row).transpose()
}

/// Load project by external id
pub async fn load_project_by_external_id(
    pool: &SqlitePool,
    external_id: &str,
) -> Result<Option<NormalizedProject>> {
    let sql = format!("SELECT {} FROM projects WHERE external_id = ?", PROJECT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(external_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(project_from_row).transpose()
}

/// List projects, newest first
pub async fn list_projects(
    pool: &SqlitePool,
    limit: Option<i64>,
    offset: Option<i64>,
) -> Result<Vec<NormalizedProject>> {
    // SQLite requires a LIMIT for OFFSET; -1 means unbounded
    let sql = format!(
        "SELECT {} FROM projects ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
        PROJECT_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(limit.unwrap_or(-1))
        .bind(offset.unwrap_or(0))
        .fetch_all(pool)
        .await?;
    rows.iter().map(project_from_row).collect()
}

/// All persisted projects keyed by external id
pub async fn load_snapshot(pool: &SqlitePool) -> Result<HashMap<String, NormalizedProject>> {
    let projects = list_projects(pool, None, None).await?;
    Ok(projects
        .into_iter()
        .map(|p| (p.external_id.clone(), p))
        .collect())
}

pub async fn count_projects(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

fn project_from_row(row: &SqliteRow) -> Result<NormalizedProject> {
    let id_str: String = row.try_get("id")?;
    let risks: Option<String> = row.try_get("risks")?;
    let raw_data: String = row.try_get("raw_data")?;
    let last_synced_at: Option<String> = row.try_get("last_synced_at")?;

    Ok(NormalizedProject {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| Error::Internal(format!("Invalid project id {}: {}", id_str, e)))?,
        external_id: row.try_get("external_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        sector: row.try_get("sector")?,
        sub_sector: row.try_get("sub_sector")?,
        status: row.try_get("status")?,
        estimated_cost: row.try_get("estimated_cost")?,
        progress: row.try_get("progress")?,
        current_situation: row.try_get("current_situation")?,
        next_steps: row.try_get("next_steps")?,
        risks: risks.map(|r| serde_json::from_str(&r)).transpose()?,
        raw_data: serde_json::from_str(&raw_data)?,
        last_synced_at: last_synced_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

fn encode_risks(risks: &Option<Vec<String>>) -> Result<Option<String>> {
    Ok(risks.as_ref().map(serde_json::to_string).transpose()?)
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid timestamp {}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample_project(external_id: &str) -> NormalizedProject {
        let mut project = NormalizedProject::new(external_id, "Ferrovia Norte-Sul");
        project.description = "Trecho ferroviário".to_string();
        project.sector = Some("Transporte".to_string());
        project.status = "Em andamento".to_string();
        project.estimated_cost = Some(1_500_000.0);
        project.progress = Some(40);
        project.risks = Some(vec!["Licenciamento".to_string()]);
        project.raw_data = json!({"Guid": external_id});
        project.last_synced_at = Some(Utc.with_ymd_and_hms(2025, 11, 11, 12, 0, 0).unwrap());
        project
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates() {
        let pool = init_memory_database().await.unwrap();
        let mut project = sample_project("abc-123");

        assert_eq!(upsert_project(&pool, &project).await.unwrap(), UpsertOutcome::Created);

        project.progress = Some(55);
        assert_eq!(upsert_project(&pool, &project).await.unwrap(), UpsertOutcome::Updated);

        let loaded = load_project_by_external_id(&pool, "abc-123")
            .await
            .unwrap()
            .expect("project should exist");
        assert_eq!(loaded, project);
        assert_eq!(count_projects(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_keeps_original_local_id() {
        let pool = init_memory_database().await.unwrap();
        let first = sample_project("abc-123");
        upsert_project(&pool, &first).await.unwrap();

        // A second shell for the same external id carries a fresh uuid
        let second = sample_project("abc-123");
        assert_ne!(first.id, second.id);
        upsert_project(&pool, &second).await.unwrap();

        let loaded = load_project_by_external_id(&pool, "abc-123").await.unwrap().unwrap();
        assert_eq!(loaded.id, first.id);
        assert!(load_project(&pool, first.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_external_id() {
        let pool = init_memory_database().await.unwrap();
        insert_project(&pool, &sample_project("local-1")).await.unwrap();
        let err = insert_project(&pool, &sample_project("local-1")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_list_projects_pagination_and_snapshot() {
        let pool = init_memory_database().await.unwrap();
        for id in ["a", "b", "c"] {
            upsert_project(&pool, &sample_project(id)).await.unwrap();
        }

        let all = list_projects(&pool, None, None).await.unwrap();
        assert_eq!(all.len(), 3);
        // Same created_at second: insertion order breaks the tie, newest first
        assert_eq!(all[0].external_id, "c");

        let page = list_projects(&pool, Some(1), Some(1)).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].external_id, "b");

        let snapshot = load_snapshot(&pool).await.unwrap();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.contains_key("a"));
    }
}
