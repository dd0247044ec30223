//! Configuration loading and resolution
//!
//! Bootstrap settings come from four tiers, highest priority first:
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Compiled defaults
//!
//! A missing TOML file is not an error (defaults apply). A TOML file that
//! exists but cannot be parsed is.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const ENV_CONFIG: &str = "PPI_CONFIG";
pub const ENV_DATABASE: &str = "PPI_DB";
pub const ENV_PORT: &str = "PPI_PORT";
pub const ENV_OVERRIDES: &str = "PPI_OVERRIDES";
pub const ENV_SOURCE_URL: &str = "SOURCE_API_URL";
pub const ENV_SOURCE_USER: &str = "SOURCE_API_USER";
pub const ENV_SOURCE_PASS: &str = "SOURCE_API_PASS";

const DEFAULT_SOURCE_URL: &str = "https://api.sif-source.org";
const DEFAULT_SOURCE_HOST_URL: &str = "https://www.sif-source.org";

/// Bootstrap configuration as written in the TOML file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TomlConfig {
    /// SQLite database file
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub overrides: OverrideConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server section
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_port() }
    }
}

/// External registry section
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Prefix used for records identified only by a numeric id
    #[serde(default = "default_source_tag")]
    pub tag: String,

    /// Value of the `SPHostUrl` header/query parameter
    #[serde(default = "default_host_url")]
    pub host_url: String,

    /// Value of the `SPLanguage` header/query parameter
    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum detail requests in flight during a sync run
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    /// Minimum spacing between two requests to the registry
    #[serde(default = "default_request_interval_ms")]
    pub request_interval_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            username: None,
            password: None,
            tag: default_source_tag(),
            host_url: default_host_url(),
            language: default_language(),
            timeout_secs: default_timeout_secs(),
            fetch_concurrency: default_fetch_concurrency(),
            request_interval_ms: default_request_interval_ms(),
        }
    }
}

/// Curated override section
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OverrideConfig {
    /// JSON array of override records
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Comma-separated list of fields overrides may replace (all when unset)
    #[serde(default)]
    pub fields: Option<String>,
}

/// Logging section
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_port() -> u16 {
    3000
}

fn default_source_tag() -> String {
    "source".to_string()
}

fn default_host_url() -> String {
    DEFAULT_SOURCE_HOST_URL.to_string()
}

fn default_language() -> String {
    "pt-BR".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_fetch_concurrency() -> usize {
    4
}

fn default_request_interval_ms() -> u64 {
    200
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Command-line overrides (highest priority tier)
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub database_path: Option<PathBuf>,
    pub port: Option<u16>,
    pub overrides_path: Option<PathBuf>,
    pub override_fields: Option<String>,
}

/// Basic-auth credentials for the registry
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Resolved registry settings
#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub base_url: String,
    pub credentials: Option<Credentials>,
    pub tag: String,
    pub host_url: String,
    pub language: String,
    pub timeout: Duration,
    pub fetch_concurrency: usize,
    pub request_interval: Duration,
}

impl Default for SourceSettings {
    fn default() -> Self {
        let source = SourceConfig::default();
        Self {
            base_url: DEFAULT_SOURCE_URL.to_string(),
            credentials: None,
            tag: source.tag,
            host_url: source.host_url,
            language: source.language,
            timeout: Duration::from_secs(source.timeout_secs),
            fetch_concurrency: source.fetch_concurrency,
            request_interval: Duration::from_millis(source.request_interval_ms),
        }
    }
}

/// Fully resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub port: u16,
    pub source: SourceSettings,
    pub overrides_path: Option<PathBuf>,
    pub override_fields: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Resolve configuration from CLI overrides, environment and TOML
    pub fn resolve(toml_config: TomlConfig, cli: ConfigOverrides) -> Result<Self> {
        let database_path = cli
            .database_path
            .or_else(|| env_value(ENV_DATABASE).map(PathBuf::from))
            .or(toml_config.database_path)
            .unwrap_or_else(default_database_path);

        let port = match cli.port {
            Some(port) => port,
            None => match env_value(ENV_PORT) {
                Some(raw) => raw
                    .parse()
                    .map_err(|_| Error::Config(format!("{} is not a valid port: {}", ENV_PORT, raw)))?,
                None => toml_config.server.port,
            },
        };

        let overrides_path = cli
            .overrides_path
            .or_else(|| env_value(ENV_OVERRIDES).map(PathBuf::from))
            .or(toml_config.overrides.path);

        let override_fields = cli.override_fields.or(toml_config.overrides.fields);

        let source_cfg = toml_config.source;
        if source_cfg.fetch_concurrency == 0 {
            return Err(Error::Config(
                "source.fetch_concurrency must be at least 1".to_string(),
            ));
        }

        let base_url = env_value(ENV_SOURCE_URL)
            .or(source_cfg.base_url.clone())
            .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string());

        let credentials = resolve_credentials(&source_cfg);

        Ok(Self {
            database_path,
            port,
            source: SourceSettings {
                base_url: base_url.trim_end_matches('/').to_string(),
                credentials,
                tag: source_cfg.tag,
                host_url: source_cfg.host_url,
                language: source_cfg.language,
                timeout: Duration::from_secs(source_cfg.timeout_secs),
                fetch_concurrency: source_cfg.fetch_concurrency,
                request_interval: Duration::from_millis(source_cfg.request_interval_ms),
            },
            overrides_path,
            override_fields,
            log_level: toml_config.logging.level,
        })
    }
}

/// Resolve registry credentials
///
/// **Priority:** ENV → TOML. Username and password are resolved as a pair so
/// a half-configured tier never mixes with another.
fn resolve_credentials(source: &SourceConfig) -> Option<Credentials> {
    let env_pair = env_value(ENV_SOURCE_USER).zip(env_value(ENV_SOURCE_PASS));
    let toml_pair = source
        .username
        .clone()
        .filter(|u| !u.trim().is_empty())
        .zip(source.password.clone().filter(|p| !p.is_empty()));

    if env_pair.is_some() && toml_pair.is_some() {
        warn!("Registry credentials found in environment and TOML. Using environment (higher priority).");
    }

    match (env_pair, toml_pair) {
        (Some((username, password)), _) => {
            info!("Registry credentials loaded from environment");
            Some(Credentials { username, password })
        }
        (None, Some((username, password))) => {
            info!("Registry credentials loaded from TOML config");
            Some(Credentials { username, password })
        }
        (None, None) => {
            warn!(
                "Registry credentials not configured; set {} and {} or [source] username/password",
                ENV_SOURCE_USER, ENV_SOURCE_PASS
            );
            None
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Locate the TOML file to use
///
/// Explicit path (CLI or `PPI_CONFIG`) first, then `~/.config/ppi/config.toml`,
/// then `/etc/ppi/config.toml` on Linux.
pub fn locate_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env_value(ENV_CONFIG) {
        return Some(PathBuf::from(path));
    }

    let user_config = dirs::config_dir().map(|d| d.join("ppi").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/ppi/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Read and parse a TOML configuration file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load the TOML tier, falling back to defaults when no file is present
///
/// An explicitly requested file that does not exist is an error.
pub fn load_toml_or_default(explicit: Option<&Path>) -> Result<TomlConfig> {
    let requested = explicit.is_some() || env_value(ENV_CONFIG).is_some();
    match locate_config_file(explicit) {
        Some(path) if path.exists() => {
            let config = load_toml_config(&path)?;
            info!("Loaded TOML configuration from {}", path.display());
            Ok(config)
        }
        Some(path) if requested => Err(Error::Config(format!(
            "Config file not found: {}",
            path.display()
        ))),
        _ => {
            info!("No TOML configuration found, using defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// OS-dependent default database location
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("ppi").join("ppi.db"))
        .unwrap_or_else(|| PathBuf::from("./ppi_data/ppi.db"))
}
