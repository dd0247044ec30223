//! HTTP API handlers for ppi-sync
//!
//! JSON endpoints over the local store, plus triggers for sync runs.

pub mod health;
pub mod projects;
pub mod questions;
pub mod reference;
pub mod sync;

pub use health::health_routes;
pub use projects::project_routes;
pub use questions::question_routes;
pub use reference::reference_routes;
pub use sync::sync_routes;
