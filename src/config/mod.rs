//! Configuration management for CLI, environment variables, and config files.

use crate::error::{ValidationIssue, ViewCountError, ViewCountResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const ENV_PREFIX: &str = "VIEWCOUNT_";

/// Main configuration for the view-count engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub flush: FlushConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where pending deltas and dedup markers live.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CacheBackend {
    #[default]
    Redis,
    Memory,
}

/// Configuration for the shared counter cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub url: String,
    pub key_prefix: String,
    /// Upper bound on any single cache round trip
    pub op_timeout_ms: u64,
    pub pool_max_size: u32,
    /// Marker capacity of the in-memory backend
    pub max_markers: u64,
}

/// Configuration for the per-visitor dedup window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub ttl_secs: u64,
}

/// Configuration for the flush scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    pub interval_secs: u64,
    /// Upper bound on one durable write
    pub timeout_secs: u64,
    /// Consecutive failed cycles before logging at error level
    pub alert_after_failures: u64,
}

/// Configuration for the durable store connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub request_timeout_secs: u64,
    /// Retries for reads only
    pub max_retries: u32,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown_secs: u64,
}

/// Configuration for logging output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub metrics_enabled: bool,
    pub metrics_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Redis,
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "viewcount".to_string(),
            op_timeout_ms: 250,
            pool_max_size: 16,
            max_markers: 1_000_000,
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { ttl_secs: 86_400 }
    }
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            timeout_secs: 30,
            alert_after_failures: 5,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080".to_string(),
            username: None,
            password: None,
            request_timeout_secs: 10,
            max_retries: 3,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            metrics_enabled: true,
            metrics_interval_secs: 60,
        }
    }
}

impl CacheConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

impl DedupConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl FlushConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl StoreConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn credentials(&self) -> Option<(String, String)> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some((username.clone(), password.clone())),
            _ => None,
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, name)).ok()
}

fn parse_env<T: FromStr>(name: &str) -> ViewCountResult<Option<T>> {
    match env_var(name) {
        None => Ok(None),
        Some(val) => val.trim().parse().map(Some).map_err(|_| {
            ViewCountError::InvalidArgument(format!("{}{} has invalid format", ENV_PREFIX, name))
        }),
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: &PathBuf) -> ViewCountResult<Self> {
        let content = std::fs::read_to_string(path)?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        match ext.as_deref() {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| ViewCountError::ParseError(e.to_string())),
            _ => toml::from_str(&content).map_err(|e| ViewCountError::ParseError(e.to_string())),
        }
    }

    pub fn from_default_locations() -> ViewCountResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|d| d.join("viewcount/config.toml")),
            Some(PathBuf::from("/etc/viewcount/config.toml")),
            Some(PathBuf::from("./viewcount.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        Ok(Self::default())
    }

    pub fn merge_from_env(mut self) -> ViewCountResult<Self> {
        if let Some(val) = parse_env::<CacheBackend>("CACHE_BACKEND")? {
            self.cache.backend = val;
        }
        if let Some(val) = env_var("CACHE_URL") {
            self.cache.url = val;
        }
        if let Some(val) = env_var("CACHE_KEY_PREFIX") {
            self.cache.key_prefix = val;
        }
        if let Some(val) = parse_env("CACHE_OP_TIMEOUT_MS")? {
            self.cache.op_timeout_ms = val;
        }
        if let Some(val) = parse_env("CACHE_POOL_MAX_SIZE")? {
            self.cache.pool_max_size = val;
        }
        if let Some(val) = parse_env("CACHE_MAX_MARKERS")? {
            self.cache.max_markers = val;
        }
        if let Some(val) = parse_env("DEDUP_TTL_SECS")? {
            self.dedup.ttl_secs = val;
        }
        if let Some(val) = parse_env("FLUSH_INTERVAL_SECS")? {
            self.flush.interval_secs = val;
        }
        if let Some(val) = parse_env("FLUSH_TIMEOUT_SECS")? {
            self.flush.timeout_secs = val;
        }
        if let Some(val) = parse_env("FLUSH_ALERT_AFTER_FAILURES")? {
            self.flush.alert_after_failures = val;
        }
        if let Some(val) = env_var("STORE_URL") {
            self.store.url = val;
        }
        if let Some(val) = parse_env("STORE_REQUEST_TIMEOUT_SECS")? {
            self.store.request_timeout_secs = val;
        }
        if let Some(val) = parse_env("STORE_MAX_RETRIES")? {
            self.store.max_retries = val;
        }
        if let Some(val) = env_var("LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = parse_env("METRICS_ENABLED")? {
            self.logging.metrics_enabled = val;
        }

        // Auth credentials - support both individual fields and combined format
        if let Some(auth_str) = env_var("STORE_AUTH_USERPASS") {
            if let Some((username, password)) = auth_str.split_once(':') {
                self.store.username = Some(username.to_string());
                self.store.password = Some(password.to_string());
            }
        } else {
            if let Some(val) = env_var("STORE_USERNAME") {
                self.store.username = Some(val);
            }
            if let Some(val) = env_var("STORE_PASSWORD") {
                self.store.password = Some(val);
            }
        }

        Ok(self)
    }

    pub fn merge_from_cli(mut self, cli: &CliArgs) -> Self {
        if let Some(backend) = cli.cache_backend {
            self.cache.backend = backend;
        }
        if let Some(ref url) = cli.cache_url {
            self.cache.url = url.clone();
        }
        if let Some(ref url) = cli.store_url {
            self.store.url = url.clone();
        }
        if let Some(secs) = cli.flush_interval_secs {
            self.flush.interval_secs = secs;
        }
        if let Some(ref username) = cli.username {
            self.store.username = Some(username.clone());
        }
        if let Some(ref password) = cli.password {
            self.store.password = Some(password.clone());
        }
        if let Some(ref level) = cli.log_level {
            self.logging.level = level.clone();
        }

        self
    }

    pub fn load() -> ViewCountResult<Self> {
        Self::from_default_locations()?.merge_from_env()
    }

    /// File (explicit or default location), then environment, then CLI.
    pub fn load_with_cli(cli: &CliArgs) -> ViewCountResult<Self> {
        let base = match cli.config_file {
            Some(ref path) => Self::from_file(path)?,
            None => Self::from_default_locations()?,
        };
        Ok(base.merge_from_env()?.merge_from_cli(cli))
    }

    pub fn validate(&self) -> ViewCountResult<()> {
        let mut issues = Vec::new();
        let mut issue = |field: &str, message: String| {
            issues.push(ValidationIssue {
                field: field.to_string(),
                message,
            })
        };

        if self.cache.backend == CacheBackend::Redis {
            if self.cache.url.is_empty() {
                issue("cache.url", "URL cannot be empty".to_string());
            } else if let Err(e) = reqwest::Url::parse(&self.cache.url) {
                issue("cache.url", format!("Invalid URL format: {}", e));
            }
            if self.cache.pool_max_size == 0 {
                issue("cache.pool_max_size", "Pool size must be at least 1".to_string());
            }
        }
        if self.cache.op_timeout_ms == 0 {
            issue("cache.op_timeout_ms", "Timeout must be greater than 0".to_string());
        }
        if self.cache.max_markers == 0 {
            issue("cache.max_markers", "Marker capacity must be at least 1".to_string());
        }
        if self.cache.key_prefix.contains(char::is_whitespace) {
            issue("cache.key_prefix", "Key prefix cannot contain whitespace".to_string());
        }

        if self.dedup.ttl_secs == 0 {
            issue("dedup.ttl_secs", "Dedup window must be greater than 0".to_string());
        }

        if self.flush.interval_secs == 0 {
            issue("flush.interval_secs", "Interval must be greater than 0".to_string());
        }
        if self.flush.timeout_secs == 0 || self.flush.timeout_secs > 3600 {
            issue(
                "flush.timeout_secs",
                "Timeout must be between 1 and 3600 seconds".to_string(),
            );
        }

        if self.store.url.is_empty() {
            issue("store.url", "URL cannot be empty".to_string());
        } else if let Err(e) = reqwest::Url::parse(&self.store.url) {
            issue("store.url", format!("Invalid URL format: {}", e));
        }
        if self.store.request_timeout_secs == 0 || self.store.request_timeout_secs > 3600 {
            issue(
                "store.request_timeout_secs",
                "Timeout must be between 1 and 3600 seconds".to_string(),
            );
        }
        // An in-flight write cut off by the flush timeout may still commit
        if self.flush.timeout_secs < self.store.request_timeout_secs {
            issue(
                "flush.timeout_secs",
                format!(
                    "Flush timeout ({}s) must not be shorter than store.request_timeout_secs ({}s)",
                    self.flush.timeout_secs, self.store.request_timeout_secs
                ),
            );
        }
        if self.store.username.is_some() != self.store.password.is_some() {
            issue(
                "store.username",
                "Username and password must be set together".to_string(),
            );
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            issue(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Valid levels: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            );
        }
        if self.logging.metrics_enabled && self.logging.metrics_interval_secs == 0 {
            issue(
                "logging.metrics_interval_secs",
                "Interval must be greater than 0".to_string(),
            );
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ViewCountError::ValidationError(issues))
        }
    }
}

/// Command-line arguments that override configuration values.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_file: Option<PathBuf>,
    pub cache_backend: Option<CacheBackend>,
    pub cache_url: Option<String>,
    pub store_url: Option<String>,
    pub flush_interval_secs: Option<u64>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub log_level: Option<String>,
}
