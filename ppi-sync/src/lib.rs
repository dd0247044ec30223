//! ppi-sync library interface
//!
//! Project synchronization between the external PPI registry and the local
//! store: field normalization, identity resolution, curated override merging
//! and the reconciliation driver, plus the HTTP API built on top of them.

pub mod api;
pub mod config;
pub mod error;
pub mod identity;
pub mod mapping;
pub mod normalize;
pub mod overrides;
pub mod reconcile;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use reconcile::ReconciliationDriver;
use services::{QuestionSync, SourceClient, SyncService};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Source registry client
    pub source: Arc<SourceClient>,
    /// Project sync (list, details, reconciliation)
    pub sync: Arc<SyncService>,
    /// Questionnaire enrichment
    pub questions: Arc<QuestionSync>,
    /// Held for the duration of a sync run; one run per process
    pub sync_guard: Arc<Mutex<()>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(db: SqlitePool, source: Arc<SourceClient>, driver: ReconciliationDriver) -> Self {
        let fetch_concurrency = source.settings().fetch_concurrency;
        let questions = QuestionSync::new(db.clone(), source.clone(), driver.resolver().clone());
        let sync = SyncService::new(db.clone(), source.clone(), driver, fetch_concurrency);

        Self {
            db,
            source,
            sync: Arc::new(sync),
            questions: Arc::new(questions),
            sync_guard: Arc::new(Mutex::new(())),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Remember the most recent failure for `/health`
    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::project_routes())
        .merge(api::sync_routes())
        .merge(api::reference_routes())
        .merge(api::question_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
