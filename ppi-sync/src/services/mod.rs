//! Service modules for source synchronization
//!
//! - `source_client`: HTTP client for the external project registry
//! - `sync_service`: project list/detail fetch feeding the reconciliation driver
//! - `question_sync`: questionnaire answers folded into project cards
//! - `log_extract`: curated overrides recovered from HTTP log dumps
//! - `stage_snapshot`: stage-status CSV applied to a JSON project snapshot

pub mod log_extract;
pub mod question_sync;
pub mod source_client;
pub mod stage_snapshot;
pub mod sync_service;

pub use log_extract::{extract_overrides, extract_overrides_file, ExtractSummary};
pub use question_sync::{
    import_question_catalog, ProjectCards, QuestionAnswer, QuestionCatalog, QuestionSync,
    QuestionSyncSummary,
};
pub use source_client::{SourceClient, SourceError};
pub use stage_snapshot::{update_snapshot_file, StageUpdateSummary};
pub use sync_service::{FullSyncReport, SyncError, SyncService};
