//! # PPI Common Library
//!
//! Shared code for the PPI project-sync workspace including:
//! - Error type and result alias
//! - Configuration loading (TOML + environment)
//! - SQLite schema, project and question repositories
//! - The "meaningful value" predicate used by every merge rule

pub mod config;
pub mod db;
pub mod error;
pub mod meaningful;

pub use error::{Error, Result};
pub use meaningful::Meaningful;
