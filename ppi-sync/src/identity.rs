//! Identity Resolver
//!
//! Derives the stable external identifier of a source record and, when no
//! identifier is shared between two data sets, links entries by name.
//!
//! **Resolution order:**
//! 1. GUID field (`Guid`, `guid`, `GUID`, `ProjectGuid`)
//! 2. Generic id (`Id`, `id`, `ID`, `ProjectId`, `ProjectID`), prefixed with
//!    the source tag
//! 3. A supplied local identifier carrying a known prefix, prefix stripped

use crate::normalize::extract_text;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

const GUID_FIELDS: &[&str] = &["Guid", "guid", "GUID", "ProjectGuid"];
const ID_FIELDS: &[&str] = &["Id", "id", "ID", "ProjectId", "ProjectID"];

static GUID_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("static regex")
});

static NUMERIC_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&#(x[0-9a-fA-F]+|\d+);").expect("static regex"));

static NAMED_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&[a-zA-Z]+;").expect("static regex"));

/// How an identifier was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    Guid,
    SourceId,
    StrippedLocal,
}

/// Resolved external identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub external_id: String,
    pub kind: IdentityKind,
}

/// Derives external ids for one source
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    source_tag: String,
    known_prefixes: Vec<String>,
}

impl IdentityResolver {
    /// Resolver for `source_tag`; its `"<tag>-"` form is a known prefix
    pub fn new(source_tag: impl Into<String>) -> Self {
        let source_tag = source_tag.into();
        let known_prefixes = vec![format!("{}-", source_tag)];
        Self {
            source_tag,
            known_prefixes,
        }
    }

    /// Add another prefix that local identifiers may carry
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.known_prefixes.push(prefix.into());
        self
    }

    /// Resolve the external id of `record`
    ///
    /// Returns `None` only when every candidate is absent; callers skip and
    /// count such records.
    pub fn resolve(&self, record: &Value, local_id: Option<&str>) -> Option<Identity> {
        if let Some(guid) = first_text(record, GUID_FIELDS) {
            return Some(Identity {
                external_id: guid,
                kind: IdentityKind::Guid,
            });
        }

        if let Some(id) = first_text(record, ID_FIELDS) {
            return Some(Identity {
                external_id: self.tagged(&id),
                kind: IdentityKind::SourceId,
            });
        }

        let local = local_id.map(str::trim).filter(|s| !s.is_empty())?;
        let stripped = self.strip_prefix(local)?;
        Some(Identity {
            external_id: stripped.to_string(),
            kind: IdentityKind::StrippedLocal,
        })
    }

    /// `"<tag>-<id>"`, unless `id` already carries the tag
    pub fn tagged(&self, id: &str) -> String {
        let prefix = format!("{}-", self.source_tag);
        if id.starts_with(&prefix) {
            id.to_string()
        } else {
            format!("{}{}", prefix, id)
        }
    }

    /// Source key of a tagged id; `None` for any other id
    pub fn untagged<'a>(&self, id: &'a str) -> Option<&'a str> {
        id.strip_prefix(self.source_tag.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
            .filter(|rest| !rest.is_empty())
    }

    /// Remove the first matching known prefix
    ///
    /// `None` when `id` carries no known prefix or nothing follows it.
    pub fn strip_prefix<'a>(&self, id: &'a str) -> Option<&'a str> {
        self.known_prefixes
            .iter()
            .find_map(|prefix| id.strip_prefix(prefix.as_str()))
            .filter(|rest| !rest.is_empty())
    }

    /// Key used to find a curated override for a persisted project
    ///
    /// The raw payload's GUID wins; otherwise the external id with a known
    /// prefix removed.
    pub fn override_lookup_key(&self, raw_data: &Value, external_id: &str) -> String {
        first_text(raw_data, &["Guid"]).unwrap_or_else(|| {
            self.strip_prefix(external_id)
                .unwrap_or(external_id)
                .to_string()
        })
    }
}

/// Raw source key of a list entry, as used in per-project URLs
///
/// GUID first, then the untagged generic id.
pub fn source_key(record: &Value) -> Option<String> {
    first_text(record, GUID_FIELDS).or_else(|| first_text(record, ID_FIELDS))
}

fn first_text(record: &Value, fields: &[&str]) -> Option<String> {
    let map = record.as_object()?;
    fields
        .iter()
        .filter_map(|f| map.get(*f))
        .find_map(extract_text)
}

/// True for an 8-4-4-4-12 hexadecimal identifier
pub fn looks_like_guid(id: &str) -> bool {
    GUID_SHAPE.is_match(id.trim())
}

/// Decode numeric HTML entities, drop named ones and trim
pub fn clean_name(name: &str) -> String {
    let decoded = NUMERIC_ENTITY.replace_all(name, |caps: &regex::Captures| {
        let code = &caps[1];
        let parsed = match code.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse::<u32>().ok(),
        };
        parsed
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });
    NAMED_ENTITY.replace_all(&decoded, "").trim().to_string()
}

/// Case-insensitive name matcher over an ordered candidate list
///
/// Exact (case-insensitive) matches win over substring matches. Among
/// substring matches the first candidate in list order wins. Empty names
/// never match.
#[derive(Debug, Clone)]
pub struct NameMatcher<K> {
    candidates: Vec<(String, K)>,
}

impl<K: Clone> NameMatcher<K> {
    pub fn new<I>(candidates: I) -> Self
    where
        I: IntoIterator<Item = (String, K)>,
    {
        Self {
            candidates: candidates
                .into_iter()
                .map(|(name, key)| (name.trim().to_lowercase(), key))
                .filter(|(name, _)| !name.is_empty())
                .collect(),
        }
    }

    /// Key of the best match for `name`, if any
    pub fn find(&self, name: &str) -> Option<K> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }

        self.candidates
            .iter()
            .find(|(candidate, _)| *candidate == needle)
            .or_else(|| {
                self.candidates.iter().find(|(candidate, _)| {
                    candidate.contains(&needle) || needle.contains(candidate.as_str())
                })
            })
            .map(|(_, key)| key.clone())
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver() -> IdentityResolver {
        IdentityResolver::new("source")
    }

    #[test]
    fn test_guid_wins() {
        let identity = resolver()
            .resolve(&json!({"Guid": "abc-123", "Id": 42}), None)
            .unwrap();
        assert_eq!(identity.external_id, "abc-123");
        assert_eq!(identity.kind, IdentityKind::Guid);
    }

    #[test]
    fn test_generic_id_is_tagged() {
        let identity = resolver().resolve(&json!({"Id": 42}), None).unwrap();
        assert_eq!(identity.external_id, "source-42");
        assert_eq!(identity.kind, IdentityKind::SourceId);

        // Already tagged ids are not re-prefixed
        let identity = resolver().resolve(&json!({"id": "source-7"}), None).unwrap();
        assert_eq!(identity.external_id, "source-7");
    }

    #[test]
    fn test_local_identifier_with_known_prefix_is_stripped() {
        let identity = resolver()
            .resolve(&json!({"Name": "Porto"}), Some("source-99"))
            .unwrap();
        assert_eq!(identity.external_id, "99");
        assert_eq!(identity.kind, IdentityKind::StrippedLocal);
    }

    #[test]
    fn test_unresolvable_record() {
        assert_eq!(resolver().resolve(&json!({"Name": "Porto"}), None), None);
        assert_eq!(resolver().resolve(&json!({"Guid": "  "}), None), None);
        assert_eq!(resolver().resolve(&json!({}), Some("other-1")), None);
        assert_eq!(resolver().resolve(&json!("not an object"), None), None);
    }

    #[test]
    fn test_override_lookup_key() {
        let r = resolver();
        assert_eq!(
            r.override_lookup_key(&json!({"Guid": "g-1"}), "source-5"),
            "g-1"
        );
        assert_eq!(r.override_lookup_key(&json!({}), "source-5"), "5");
        assert_eq!(r.override_lookup_key(&json!({}), "abc"), "abc");
    }

    #[test]
    fn test_source_key_is_untagged() {
        assert_eq!(source_key(&json!({"Id": 42})), Some("42".to_string()));
        assert_eq!(source_key(&json!({"id": 1, "Guid": "g"})), Some("g".to_string()));
        assert_eq!(source_key(&json!({})), None);
    }

    #[test]
    fn test_looks_like_guid() {
        assert!(looks_like_guid("3f2504e0-4f89-11d3-9a0c-0305e82c3301"));
        assert!(!looks_like_guid("local-1731330292708"));
        assert!(!looks_like_guid(""));
    }

    #[test]
    fn test_clean_name_decodes_entities() {
        assert_eq!(clean_name("Concess&#227;o  "), "Concessão");
        assert_eq!(clean_name("Rodovia&nbsp;BR-101"), "RodoviaBR-101");
    }

    #[test]
    fn test_name_matcher_prefers_exact_over_partial() {
        let matcher = NameMatcher::new(vec![
            ("Rodovia BR-101 Sul".to_string(), 0usize),
            ("Rodovia BR-101".to_string(), 1usize),
        ]);
        assert_eq!(matcher.find("rodovia br-101"), Some(1));
        assert_eq!(matcher.find("BR-101 Sul"), Some(0));
        // Candidate contained in the needle
        assert_eq!(matcher.find("Concessão Rodovia BR-101 Sul - Lote 2"), Some(0));
        assert_eq!(matcher.find("Porto de Santos"), None);
        assert_eq!(matcher.find("   "), None);
    }

    #[test]
    fn test_name_matcher_ignores_empty_candidates() {
        let matcher = NameMatcher::new(vec![("".to_string(), 0usize)]);
        assert!(matcher.is_empty());
        assert_eq!(matcher.find("anything"), None);
    }
}
