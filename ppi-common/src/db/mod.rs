//! Database models and queries

pub mod init;
pub mod models;
pub mod projects;
pub mod questions;

pub use init::*;
pub use models::*;
