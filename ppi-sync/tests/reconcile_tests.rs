//! Reconciliation driver integration tests
//!
//! Runs the driver against an in-memory store: batch counting, idempotence
//! and the per-field precedence between curated, fresh and prior data.

use chrono::{DateTime, TimeZone, Utc};
use ppi_common::db::{self, NormalizedProject};
use ppi_sync::identity::IdentityResolver;
use ppi_sync::overrides::{
    FieldSet, OverrideMerger, OverrideRecord, OverrideTable, ProjectField,
};
use ppi_sync::reconcile::ReconciliationDriver;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;

const GUID_A: &str = "3f2504e0-4f89-11d3-9a0c-0305e82c3301";
const GUID_B: &str = "6fa459ea-ee8a-3ca4-894e-db77e160355e";

async fn setup_db() -> SqlitePool {
    db::init_memory_database()
        .await
        .expect("Should create in-memory database")
}

fn driver_with(overrides: OverrideTable, eligible: FieldSet) -> ReconciliationDriver {
    ReconciliationDriver::new(
        IdentityResolver::new("source"),
        OverrideMerger::new(eligible),
        Arc::new(overrides),
    )
}

fn plain_driver() -> ReconciliationDriver {
    driver_with(OverrideTable::default(), FieldSet::all())
}

fn synced_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 11, 12, 4, 52).unwrap()
}

async fn stored(pool: &SqlitePool, external_id: &str) -> NormalizedProject {
    db::projects::load_project_by_external_id(pool, external_id)
        .await
        .unwrap()
        .expect("Project should be stored")
}

// =============================================================================
// Batch counting
// =============================================================================

#[tokio::test]
async fn test_record_without_identifier_is_skipped() {
    let pool = setup_db().await;
    let records = vec![
        json!({"Guid": GUID_A, "Name": "Rodovia BR-101"}),
        json!({"Name": "Sem identificador"}),
        json!({"Id": 42, "Name": "Porto de Santos"}),
    ];

    let summary = plain_driver().run(&records, &pool, synced_at()).await.unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.created, 2);
    assert_eq!(summary.updated, 0);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.errors, 0);

    assert_eq!(stored(&pool, "source-42").await.name, "Porto de Santos");
    assert_eq!(db::projects::count_projects(&pool).await.unwrap(), 2);
}

#[tokio::test]
async fn test_non_object_records_are_skipped() {
    let pool = setup_db().await;
    let records = vec![json!("texto"), json!(null), json!({"Guid": GUID_A})];

    let summary = plain_driver().run(&records, &pool, synced_at()).await.unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.created, 1);
    assert_eq!(summary.skipped, 2);
}

#[tokio::test]
async fn test_empty_batch() {
    let pool = setup_db().await;
    let summary = plain_driver().run(&[], &pool, synced_at()).await.unwrap();
    assert_eq!(summary.total, 0);
    assert_eq!(summary.created + summary.updated + summary.skipped, 0);
}

// =============================================================================
// Idempotence
// =============================================================================

#[tokio::test]
async fn test_rerun_yields_identical_state() {
    let pool = setup_db().await;
    let driver = plain_driver();
    let records = vec![
        json!({
            "Guid": GUID_A,
            "Name": "Rodovia BR-101",
            "Sector": {"Value": "Transport"},
            "CurrentProjectStatus": {"Value": "In Progress"},
            "Completion": 0.4,
            "KeyRisks": "Licenciamento ambiental; Desapropriações"
        }),
        json!({"Id": 7, "Name": "Hospital Regional", "Description": "Nova ala"}),
    ];

    let first = driver.run(&records, &pool, synced_at()).await.unwrap();
    let after_first = db::projects::list_projects(&pool, None, None).await.unwrap();

    let second = driver.run(&records, &pool, synced_at()).await.unwrap();
    let after_second = db::projects::list_projects(&pool, None, None).await.unwrap();

    assert_eq!(first.created, 2);
    assert_eq!(second.created, 0);
    assert_eq!(second.updated, 2);
    assert_eq!(after_first, after_second);

    let project = stored(&pool, GUID_A).await;
    assert_eq!(project.sector.as_deref(), Some("Transporte"));
    assert_eq!(project.status, "Em andamento");
    assert_eq!(project.progress, Some(40));
    assert_eq!(
        project.risks,
        Some(vec![
            "Licenciamento ambiental".to_string(),
            "Desapropriações".to_string()
        ])
    );
}

// =============================================================================
// Precedence
// =============================================================================

#[tokio::test]
async fn test_prior_description_survives_empty_fresh_value() {
    let pool = setup_db().await;
    let driver = plain_driver();

    driver
        .run(&[json!({"Guid": GUID_A, "Description": "X"})], &pool, synced_at())
        .await
        .unwrap();
    driver
        .run(&[json!({"Guid": GUID_A, "Description": ""})], &pool, synced_at())
        .await
        .unwrap();

    assert_eq!(stored(&pool, GUID_A).await.description, "X");
}

#[tokio::test]
async fn test_fresh_completion_replaces_zero_progress() {
    let pool = setup_db().await;
    let driver = plain_driver();

    driver
        .run(&[json!({"Guid": GUID_A, "Status": "Cancelled"})], &pool, synced_at())
        .await
        .unwrap();
    assert_eq!(stored(&pool, GUID_A).await.progress, Some(0));

    driver
        .run(&[json!({"Guid": GUID_A, "Completion": 0.75})], &pool, synced_at())
        .await
        .unwrap();

    let project = stored(&pool, GUID_A).await;
    assert_eq!(project.progress, Some(75));
    assert_eq!(project.status, "Cancelado");
}

#[tokio::test]
async fn test_estimated_progress_tracks_status_changes() {
    let pool = setup_db().await;
    let driver = plain_driver();

    driver
        .run(&[json!({"Guid": GUID_A, "Status": "Draft"})], &pool, synced_at())
        .await
        .unwrap();
    assert_eq!(stored(&pool, GUID_A).await.progress, Some(10));

    driver
        .run(&[json!({"Guid": GUID_A, "Status": "Completed"})], &pool, synced_at())
        .await
        .unwrap();

    let project = stored(&pool, GUID_A).await;
    assert_eq!(project.status, "Concluído");
    assert_eq!(project.progress, Some(100));
}

#[tokio::test]
async fn test_reported_progress_kept_across_status_change() {
    let pool = setup_db().await;
    let driver = plain_driver();

    driver
        .run(
            &[json!({"Guid": GUID_A, "Status": "Draft", "Completion": 0.35})],
            &pool,
            synced_at(),
        )
        .await
        .unwrap();
    driver
        .run(&[json!({"Guid": GUID_A, "Status": "In Progress"})], &pool, synced_at())
        .await
        .unwrap();

    let project = stored(&pool, GUID_A).await;
    assert_eq!(project.status, "Em andamento");
    assert_eq!(project.progress, Some(35));
}

#[tokio::test]
async fn test_defaults_when_nothing_is_known() {
    let pool = setup_db().await;
    plain_driver()
        .run(&[json!({"Guid": GUID_A})], &pool, synced_at())
        .await
        .unwrap();

    let project = stored(&pool, GUID_A).await;
    assert_eq!(project.name, "Projeto sem nome");
    assert_eq!(project.description, "");
    assert_eq!(project.status, "Rascunho");
    assert_eq!(project.progress, Some(10));
    assert_eq!(project.last_synced_at, Some(synced_at()));
}

#[tokio::test]
async fn test_curated_override_beats_fresh_for_eligible_fields_only() {
    let pool = setup_db().await;

    let mut curated = OverrideRecord::new(GUID_A);
    curated.name = Some("Nome curado".to_string());
    curated.description = Some("Descrição curada".to_string());
    curated.completion = Some(0.9);
    let table = OverrideTable::from_records([curated]);

    let driver = driver_with(
        table,
        FieldSet::only([ProjectField::Description, ProjectField::Progress]),
    );
    driver
        .run(
            &[json!({
                "Guid": GUID_A,
                "Name": "Nome da fonte",
                "Description": "Descrição da fonte",
                "Completion": 0.2
            })],
            &pool,
            synced_at(),
        )
        .await
        .unwrap();

    let project = stored(&pool, GUID_A).await;
    assert_eq!(project.name, "Nome da fonte");
    assert_eq!(project.description, "Descrição curada");
    assert_eq!(project.progress, Some(90));
}

#[tokio::test]
async fn test_duplicate_identifiers_in_batch_merge() {
    let pool = setup_db().await;
    let records = vec![
        json!({"Guid": GUID_B, "Name": "Primeiro", "Description": "Detalhada"}),
        json!({"Guid": GUID_B, "Name": "Segundo"}),
    ];

    let summary = plain_driver().run(&records, &pool, synced_at()).await.unwrap();
    assert_eq!(summary.created, 1);

    let project = stored(&pool, GUID_B).await;
    assert_eq!(project.name, "Segundo");
    assert_eq!(project.description, "Detalhada");
}

#[tokio::test]
async fn test_raw_data_keeps_prior_keys() {
    let pool = setup_db().await;
    let driver = plain_driver();

    driver
        .run(&[json!({"Guid": GUID_A, "Locations": ["SP"]})], &pool, synced_at())
        .await
        .unwrap();
    driver
        .run(&[json!({"Guid": GUID_A, "Name": "Novo"})], &pool, synced_at())
        .await
        .unwrap();

    let raw: Value = stored(&pool, GUID_A).await.raw_data;
    assert_eq!(raw["Locations"], json!(["SP"]));
    assert_eq!(raw["Name"], json!("Novo"));
}

// =============================================================================
// Write failures
// =============================================================================

#[tokio::test]
async fn test_failed_writes_are_counted_not_fatal() {
    let pool = setup_db().await;
    let driver = plain_driver();
    let records = vec![json!({"Guid": GUID_A}), json!({"Id": 42})];
    let plan = driver.plan(&records, &HashMap::new(), synced_at());
    let staged = plan.staged.len();

    pool.close().await;
    let summary = driver.apply(plan, &pool).await;

    assert_eq!(summary.total, 2);
    assert_eq!(summary.errors, staged);
    assert_eq!(summary.created + summary.updated, 0);
}

#[tokio::test]
async fn test_failed_write_keeps_other_upserts() {
    let pool = setup_db().await;
    let driver = plain_driver();
    let records = vec![
        json!({"Guid": GUID_A, "Name": "Rodovia"}),
        json!({"Id": 42, "Name": "Porto"}),
        json!({"Guid": GUID_B, "Name": "Hospital"}),
    ];
    let mut plan = driver.plan(&records, &HashMap::new(), synced_at());
    // Rejected by the progress range check
    plan.staged[1].progress = Some(150);

    let summary = driver.apply(plan, &pool).await;

    assert_eq!(summary.created, 2);
    assert_eq!(summary.errors, 1);
    assert_eq!(stored(&pool, GUID_A).await.name, "Rodovia");
    assert_eq!(stored(&pool, GUID_B).await.name, "Hospital");
    assert!(db::projects::load_project_by_external_id(&pool, "source-42")
        .await
        .unwrap()
        .is_none());
}

// =============================================================================
// Override application
// =============================================================================

#[tokio::test]
async fn test_status_override_leaves_measured_progress() {
    let pool = setup_db().await;
    plain_driver()
        .run(
            &[json!({"Guid": GUID_A, "Status": "Draft", "Completion": 0.35})],
            &pool,
            synced_at(),
        )
        .await
        .unwrap();

    let mut curated = OverrideRecord::new(GUID_A);
    curated.status = Some("In Progress".to_string());
    let driver = driver_with(
        OverrideTable::from_records([curated]),
        FieldSet::only([ProjectField::Status, ProjectField::Description]),
    );
    let summary = driver.apply_overrides(&pool).await.unwrap();
    assert_eq!(summary.updated, 1);

    let project = stored(&pool, GUID_A).await;
    assert_eq!(project.status, "Em andamento");
    assert_eq!(project.progress, Some(35));
}

#[tokio::test]
async fn test_apply_overrides_writes_only_changed_projects() {
    let pool = setup_db().await;
    plain_driver()
        .run(
            &[
                json!({"Guid": GUID_A, "Name": "A"}),
                json!({"Guid": GUID_B, "Name": "B"}),
            ],
            &pool,
            synced_at(),
        )
        .await
        .unwrap();

    let mut curated = OverrideRecord::new(GUID_A);
    curated.description = Some("Texto revisado".to_string());
    let unmatched = OverrideRecord::new("00000000-0000-0000-0000-000000000000");
    let driver = driver_with(
        OverrideTable::from_records([curated, unmatched]),
        FieldSet::all(),
    );

    let summary = driver.apply_overrides(&pool).await.unwrap();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.matched, 1);
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.errors, 0);
    assert_eq!(stored(&pool, GUID_A).await.description, "Texto revisado");

    let again = driver.apply_overrides(&pool).await.unwrap();
    assert_eq!(again.updated, 0);
}
