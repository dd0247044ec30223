//! Source registry API client
//!
//! Basic-auth REST client for the external project registry. Every request
//! carries the registry's host/language headers and query parameters and
//! goes through a shared minimum-interval rate limiter.

use ppi_common::config::SourceSettings;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

const USER_AGENT: &str = concat!("ppi-sync/", env!("CARGO_PKG_VERSION"));
const SP_CLIENT_TAG: &str = "0";
const SP_PRODUCT_NUMBER: &str = "15.0.5023.1005";

const LIST_WRAPPER_KEYS: &[&str] = &["value", "Items", "projects"];
const SECTOR_KEYS: &[&str] = &["Sectors", "sectors", "value"];
const STATUS_KEYS: &[&str] = &["ProjectStatuses", "projectStatuses", "statuses", "value"];

/// Source client errors
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication rejected ({0})")]
    Unauthorized(u16),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Minimum spacing between consecutive requests
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval,
        }
    }

    async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::trace!("Rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

/// Source registry client
pub struct SourceClient {
    http_client: reqwest::Client,
    rate_limiter: Arc<RateLimiter>,
    settings: SourceSettings,
}

impl SourceClient {
    pub fn new(settings: SourceSettings) -> Result<Self, SourceError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static("x-requested-with"),
            HeaderValue::from_static("XMLHttpRequest"),
        );
        headers.insert(
            HeaderName::from_static("sphosturl"),
            header_value(&settings.host_url)?,
        );
        headers.insert(
            HeaderName::from_static("splanguage"),
            header_value(&settings.language)?,
        );

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|e| SourceError::Network(e.to_string()))?;

        if settings.credentials.is_none() {
            tracing::debug!("Source client created without credentials");
        }

        Ok(Self {
            http_client,
            rate_limiter: Arc::new(RateLimiter::new(settings.request_interval)),
            settings,
        })
    }

    pub fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    /// `GET /projects`
    ///
    /// Accepts a bare array or one wrapped under `value`, `Items` or
    /// `projects`. Anything else yields an empty list.
    pub async fn list_projects(&self) -> Result<Vec<Value>, SourceError> {
        let body = self.get_json("/projects").await?;
        Ok(unwrap_list(body, LIST_WRAPPER_KEYS))
    }

    /// `GET /projects/{id}`
    pub async fn project_detail(&self, id: &str) -> Result<Value, SourceError> {
        self.get_json(&format!("/projects/{}", id)).await
    }

    /// `GET /referenceData`
    pub async fn reference_data(&self) -> Result<Value, SourceError> {
        self.get_json("/referenceData").await
    }

    /// Sector list from reference data
    pub async fn sectors(&self) -> Result<Vec<Value>, SourceError> {
        let body = self.reference_data().await?;
        Ok(pick_list(&body, SECTOR_KEYS))
    }

    /// Project status list from reference data
    pub async fn statuses(&self) -> Result<Vec<Value>, SourceError> {
        let body = self.reference_data().await?;
        Ok(pick_list(&body, STATUS_KEYS))
    }

    /// `GET /projects/{guid}/questions/search/{code}`
    pub async fn question_answer(&self, guid: &str, code: &str) -> Result<Value, SourceError> {
        self.get_json(&format!("/projects/{}/questions/search/{}", guid, code))
            .await
    }

    async fn get_json(&self, path: &str) -> Result<Value, SourceError> {
        self.rate_limiter.wait().await;

        let url = format!("{}{}", self.settings.base_url, path);
        tracing::debug!(url = %url, "Querying source API");

        let mut request = self.http_client.get(&url).query(&[
            ("SPClientTag", SP_CLIENT_TAG),
            ("SPProductNumber", SP_PRODUCT_NUMBER),
            ("SPHostUrl", self.settings.host_url.as_str()),
            ("SPLanguage", self.settings.language.as_str()),
        ]);
        if let Some(creds) = &self.settings.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;

        let status = response.status();

        if status == 404 {
            return Err(SourceError::NotFound(path.to_string()));
        }

        if status == 401 || status == 403 {
            return Err(SourceError::Unauthorized(status.as_u16()));
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(SourceError::Api(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))
    }
}

fn header_value(value: &str) -> Result<HeaderValue, SourceError> {
    HeaderValue::from_str(value)
        .map_err(|e| SourceError::Parse(format!("Invalid header value {:?}: {}", value, e)))
}

fn unwrap_list(body: Value, keys: &[&str]) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut map) => keys
            .iter()
            .find_map(|k| match map.remove(*k) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn pick_list(body: &Value, keys: &[&str]) -> Vec<Value> {
    keys.iter()
        .find_map(|k| body.get(*k).and_then(Value::as_array))
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unwrap_list_shapes() {
        assert_eq!(unwrap_list(json!([1, 2]), LIST_WRAPPER_KEYS).len(), 2);
        assert_eq!(unwrap_list(json!({"Items": [1]}), LIST_WRAPPER_KEYS).len(), 1);
        assert_eq!(
            unwrap_list(json!({"value": "x", "projects": [1, 2, 3]}), LIST_WRAPPER_KEYS).len(),
            3
        );
        assert!(unwrap_list(json!({"other": [1]}), LIST_WRAPPER_KEYS).is_empty());
        assert!(unwrap_list(json!("nope"), LIST_WRAPPER_KEYS).is_empty());
    }

    #[test]
    fn test_pick_list_order() {
        let body = json!({"sectors": [{"Value": "Energia"}], "value": [1, 2]});
        assert_eq!(pick_list(&body, SECTOR_KEYS), vec![json!({"Value": "Energia"})]);
        assert!(pick_list(&json!({}), STATUS_KEYS).is_empty());
    }

    #[tokio::test]
    async fn test_rate_limiter_spaces_requests() {
        let limiter = RateLimiter::new(Duration::from_millis(50));
        let start = Instant::now();
        limiter.wait().await;
        limiter.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
