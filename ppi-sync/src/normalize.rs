//! Field Normalizer
//!
//! Extracts scalar, numeric and list values from inconsistently shaped
//! external records. Field readers never hard-code a key: they take an
//! ordered list of dotted candidate paths (`"Sector.Value"`, `"sector"`) and
//! return the first present, non-empty value.
//!
//! **Unwrapping rules** (`extract_text`):
//! - arrays: each element normalized, empties dropped, joined with `"; "`
//! - objects with `Value`/`value`: recurse into the wrapper
//! - objects with a string `Title`, `text`, `label` or `name`: that string
//! - primitives: trimmed string form
//! - everything else: `None`

use chrono::{DateTime, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Sentinel for a value the source did not provide
///
/// Distinct from `None`/empty: card renderers show it verbatim.
pub const NOT_PROVIDED: &str = "Não informado";

static DMY_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{2}/\d{2}/\d{4}$").expect("static regex"));

static ISO_DATE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})").expect("static regex"));

static PLAIN_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?\d+(\.\d+)?$").expect("static regex"));

static LIST_SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\r\n;•]+").expect("static regex"));

/// Naive formats tried after RFC 3339/2822
const GENERIC_DATE_FORMATS: &[&str] = &[
    "%Y/%m/%d",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
];

/// Wrapper keys that hold a nested value
const VALUE_KEYS: &[&str] = &["Value", "value"];

/// Keys that hold a display string when no `Value` is usable
const LABEL_KEYS: &[&str] = &["Title", "text", "label", "name"];

/// Look up a dotted path inside a record
///
/// Each segment matches an exact key first, then the first key equal under
/// ASCII case folding.
pub fn lookup_path<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(record, |current, segment| lookup_key(current, segment))
}

fn lookup_key<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let map = value.as_object()?;
    map.get(key).or_else(|| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

/// Normalize any JSON value into display text
pub fn extract_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => non_empty(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(extract_text).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("; "))
            }
        }
        Value::Object(map) => {
            if let Some(text) = VALUE_KEYS
                .iter()
                .filter_map(|k| map.get(*k))
                .find_map(extract_text)
            {
                return Some(text);
            }
            LABEL_KEYS
                .iter()
                .filter_map(|k| map.get(*k))
                .filter_map(Value::as_str)
                .find_map(non_empty)
        }
    }
}

/// First non-empty text among candidate paths
pub fn resolve_text(record: &Value, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .filter_map(|path| lookup_path(record, path))
        .find_map(extract_text)
}

/// Interpret a value as a number
///
/// Accepts JSON numbers, numeric strings (a decimal comma is tolerated) and
/// `{Value: ...}` wrappers.
pub fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<f64>()
                .ok()
                .or_else(|| trimmed.replace(',', ".").parse::<f64>().ok())
                .filter(|n| n.is_finite())
        }
        Value::Object(map) => VALUE_KEYS
            .iter()
            .filter_map(|k| map.get(*k))
            .find_map(number_of),
        _ => None,
    }
}

/// First numeric value among candidate paths
pub fn resolve_number(record: &Value, candidates: &[&str]) -> Option<f64> {
    candidates
        .iter()
        .filter_map(|path| lookup_path(record, path))
        .find_map(number_of)
}

/// First non-empty list among candidate paths
///
/// Arrays yield one item per element; a single text value is split into
/// items on line breaks, `;` and `•`.
pub fn resolve_list(record: &Value, candidates: &[&str]) -> Option<Vec<String>> {
    candidates
        .iter()
        .filter_map(|path| lookup_path(record, path))
        .find_map(list_of)
}

fn list_of(value: &Value) -> Option<Vec<String>> {
    let items: Vec<String> = match value {
        Value::Array(elements) => elements
            .iter()
            .filter_map(extract_text)
            .flat_map(|text| split_items(&text))
            .collect(),
        Value::Object(map) if VALUE_KEYS.iter().any(|k| map.contains_key(*k)) => {
            return VALUE_KEYS
                .iter()
                .filter_map(|k| map.get(*k))
                .find_map(list_of);
        }
        other => extract_text(other)
            .map(|text| split_items(&text))
            .unwrap_or_default(),
    };
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

/// Split free text into list items
///
/// Leading bullet markers (`-`, `*`) are stripped from each item.
pub fn split_items(text: &str) -> Vec<String> {
    LIST_SEPARATORS
        .split(text)
        .map(|item| item.trim().trim_start_matches(['-', '*']).trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Normalize a date-ish value to `DD/MM/YYYY`
pub fn normalize_date(value: &Value) -> String {
    match extract_text(value) {
        Some(text) => format_date_text(&text),
        None => NOT_PROVIDED.to_string(),
    }
}

/// Text form of [`normalize_date`]
pub fn format_date_text(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return NOT_PROVIDED.to_string();
    }
    if DMY_DATE.is_match(text) {
        return text.to_string();
    }
    if let Some(caps) = ISO_DATE_PREFIX.captures(text) {
        return format!("{}/{}/{}", &caps[3], &caps[2], &caps[1]);
    }

    let parsed = DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_rfc2822(text))
        .map(|dt| dt.date_naive())
        .ok()
        .or_else(|| {
            GENERIC_DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        });

    match parsed {
        Some(date) => date.format("%d/%m/%Y").to_string(),
        None => NOT_PROVIDED.to_string(),
    }
}

/// Normalize a percentage-ish value
///
/// Plain numbers gain a `%` suffix; text already ending in `%` and other
/// free text pass through.
pub fn normalize_percent(value: &Value) -> String {
    match extract_text(value) {
        Some(text) => format_percent_text(&text),
        None => NOT_PROVIDED.to_string(),
    }
}

/// Text form of [`normalize_percent`]
pub fn format_percent_text(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        NOT_PROVIDED.to_string()
    } else if PLAIN_NUMBER.is_match(text) {
        format!("{}%", text)
    } else {
        text.to_string()
    }
}

/// True for `DD/MM/YYYY` or `YYYY-MM-DD...` text
pub fn is_likely_date(text: &str) -> bool {
    let text = text.trim();
    DMY_DATE.is_match(text) || ISO_DATE_PREFIX.is_match(text)
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_wrapper_resolves_first_candidate() {
        let record = json!({"Sector": {"Value": "Transport"}});
        assert_eq!(
            resolve_text(&record, &["Sector.Value", "sector"]),
            Some("Transport".to_string())
        );
    }

    #[test]
    fn test_lookup_falls_back_to_case_insensitive_key() {
        let record = json!({"sector": {"value": "Energia"}});
        assert_eq!(
            resolve_text(&record, &["Sector.Value"]),
            Some("Energia".to_string())
        );
    }

    #[test]
    fn test_empty_candidate_is_skipped() {
        let record = json!({"Name": "   ", "Title": "Rodovia BR-101"});
        assert_eq!(
            resolve_text(&record, &["Name", "Title"]),
            Some("Rodovia BR-101".to_string())
        );
        assert_eq!(resolve_text(&record, &["Missing"]), None);
    }

    #[test]
    fn test_extract_text_shapes() {
        assert_eq!(extract_text(&json!(null)), None);
        assert_eq!(extract_text(&json!("  x ")), Some("x".to_string()));
        assert_eq!(extract_text(&json!(42)), Some("42".to_string()));
        assert_eq!(extract_text(&json!(true)), Some("true".to_string()));
        assert_eq!(
            extract_text(&json!(["a", "", {"Value": "b"}])),
            Some("a; b".to_string())
        );
        assert_eq!(extract_text(&json!([])), None);
        assert_eq!(
            extract_text(&json!({"Value": null, "Title": "Porto"})),
            Some("Porto".to_string())
        );
        assert_eq!(
            extract_text(&json!({"label": "Aeroporto"})),
            Some("Aeroporto".to_string())
        );
        assert_eq!(extract_text(&json!({"Other": 1})), None);
    }

    #[test]
    fn test_resolve_number_accepts_strings_and_wrappers() {
        let record = json!({
            "A": "1500000.50",
            "B": {"Value": 0.75},
            "C": "12,5",
            "D": "n/a"
        });
        assert_eq!(resolve_number(&record, &["A"]), Some(1_500_000.5));
        assert_eq!(resolve_number(&record, &["B.Value"]), Some(0.75));
        assert_eq!(resolve_number(&record, &["B"]), Some(0.75));
        assert_eq!(resolve_number(&record, &["C"]), Some(12.5));
        assert_eq!(resolve_number(&record, &["D", "B"]), Some(0.75));
    }

    #[test]
    fn test_resolve_list_splits_bullet_text() {
        let record = json!({"Risks": "- Licenciamento ambiental\n- Desapropriação; • Câmbio"});
        assert_eq!(
            resolve_list(&record, &["Risks"]),
            Some(vec![
                "Licenciamento ambiental".to_string(),
                "Desapropriação".to_string(),
                "Câmbio".to_string(),
            ])
        );

        let record = json!({"risks": ["Obra", {"Value": "Prazo"}, ""]});
        assert_eq!(
            resolve_list(&record, &["Risks"]),
            Some(vec!["Obra".to_string(), "Prazo".to_string()])
        );
        assert_eq!(resolve_list(&json!({"Risks": []}), &["Risks"]), None);
    }

    #[test]
    fn test_split_items_keeps_hyphenated_words() {
        assert_eq!(split_items("Ferrovia Norte-Sul"), vec!["Ferrovia Norte-Sul"]);
    }

    #[test]
    fn test_normalize_date() {
        assert_eq!(normalize_date(&json!("2025-11-11T12:04:52.708Z")), "11/11/2025");
        assert_eq!(normalize_date(&json!("11/11/2025")), "11/11/2025");
        assert_eq!(normalize_date(&json!("")), NOT_PROVIDED);
        assert_eq!(normalize_date(&json!(null)), NOT_PROVIDED);
        assert_eq!(normalize_date(&json!({"Value": "2024-01-05"})), "05/01/2024");
        assert_eq!(normalize_date(&json!("2024/03/09")), "09/03/2024");
        assert_eq!(normalize_date(&json!("March 9, 2024")), "09/03/2024");
        assert_eq!(normalize_date(&json!("someday")), NOT_PROVIDED);
    }

    #[test]
    fn test_normalize_percent() {
        assert_eq!(normalize_percent(&json!(75)), "75%");
        assert_eq!(normalize_percent(&json!("40%")), "40%");
        assert_eq!(normalize_percent(&json!("12.5")), "12.5%");
        assert_eq!(normalize_percent(&json!(null)), NOT_PROVIDED);
        assert_eq!(normalize_percent(&json!("Em análise")), "Em análise");
    }

    #[test]
    fn test_is_likely_date() {
        assert!(is_likely_date("11/11/2025"));
        assert!(is_likely_date("2025-11-11T00:00:00"));
        assert!(!is_likely_date("Concluído"));
    }
}
