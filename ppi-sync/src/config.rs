//! Sync component assembly
//!
//! Turns a resolved [`Config`] into the identity resolver, override merger
//! and override table shared by the server and the CLI.

use crate::identity::IdentityResolver;
use crate::overrides::{FieldSet, OverrideMerger, OverrideTable};
use crate::reconcile::ReconciliationDriver;
use ppi_common::config::Config;
use ppi_common::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Prefix carried by locally created project ids
pub const LOCAL_PREFIX: &str = "local-";

/// Resolver for the configured source tag; locally created ids are also
/// recognized
pub fn identity_resolver(config: &Config) -> IdentityResolver {
    IdentityResolver::new(config.source.tag.clone()).with_prefix(LOCAL_PREFIX)
}

/// Merger restricted to `fields` (all fields when unset)
pub fn override_merger(fields: Option<&str>) -> Result<OverrideMerger> {
    let eligible = match fields {
        Some(list) => list.parse::<FieldSet>()?,
        None => FieldSet::all(),
    };
    info!(fields = %eligible, "Override-eligible fields");
    Ok(OverrideMerger::new(eligible))
}

/// Load the curated override table
///
/// No configured path yields an empty table; a configured path that cannot
/// be read is a configuration error.
pub fn load_override_table(path: Option<&Path>) -> Result<OverrideTable> {
    match path {
        Some(path) => OverrideTable::load(path),
        None => {
            info!("No override file configured");
            Ok(OverrideTable::default())
        }
    }
}

/// Driver wired from configuration
pub fn build_driver(config: &Config) -> Result<ReconciliationDriver> {
    let resolver = identity_resolver(config);
    let merger = override_merger(config.override_fields.as_deref())?;
    let overrides = load_override_table(config.overrides_path.as_deref())?;
    Ok(ReconciliationDriver::new(resolver, merger, Arc::new(overrides)))
}

/// Install the fmt subscriber
///
/// `RUST_LOG` wins; otherwise every workspace target logs at `level`.
pub fn init_tracing(level: &str) {
    let default_filter = format!(
        "ppi_sync={level},ppi_tool={level},ppi_common={level},tower_http={level}",
        level = level
    );
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overrides::ProjectField;

    #[test]
    fn test_override_merger_field_list() {
        let merger = override_merger(Some("description, risks")).unwrap();
        assert!(merger.eligible().contains(ProjectField::Description));
        assert!(merger.eligible().contains(ProjectField::Risks));
        assert!(!merger.eligible().contains(ProjectField::Name));
    }

    #[test]
    fn test_override_merger_defaults_to_all() {
        let merger = override_merger(None).unwrap();
        for field in ProjectField::ALL {
            assert!(merger.eligible().contains(field));
        }
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(override_merger(Some("description,colour")).is_err());
    }

    #[test]
    fn test_resolver_knows_local_prefix() {
        let config = Config::resolve(Default::default(), Default::default()).unwrap();
        let resolver = identity_resolver(&config);
        assert_eq!(resolver.strip_prefix("local-1731326692000"), Some("1731326692000"));
        assert_eq!(resolver.strip_prefix("source-42"), Some("42"));
        assert_eq!(resolver.strip_prefix("other-42"), None);
        assert_eq!(resolver.untagged("source-42"), Some("42"));
        assert_eq!(resolver.untagged("local-1731326692000"), None);
    }

    #[test]
    fn test_missing_override_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_override_table(Some(&dir.path().join("missing.json")));
        assert!(matches!(result, Err(ppi_common::Error::Config(_))));
        assert!(load_override_table(None).unwrap().is_empty());
    }
}
