//! Configuration loading for tabula.
//!
//! Every section has defaults matching the observed behaviour of the public
//! service; a TOML file only needs to name what it overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV_VAR: &str = "TABULA_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TabulaConfig {
    pub http: HttpConfig,
    pub cache: CacheConfig,
    pub pagination: PaginationConfig,
    pub fanout: FanOutConfig,
    pub index: IndexConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    /// Upper bound on outstanding HTTP requests.
    pub max_concurrent_requests: usize,
    /// Minimum spacing between request starts; 0 disables pacing.
    pub min_request_interval_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "https://data.medicaid.gov/api/1/".to_string(),
            request_timeout_ms: 30_000,
            max_concurrent_requests: 8,
            min_request_interval_ms: 0,
        }
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Directory holding the LMDB environment.
    pub path: PathBuf,
    pub max_size_mb: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".tabula-cache"),
            max_size_mb: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PaginationConfig {
    pub page_size: usize,
    /// Defensive cap on pages per collection.
    pub max_pages: usize,
    /// Defensive cap on rows per collection.
    pub max_rows: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: 10_000,
            max_pages: 1_000,
            max_rows: 10_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FanOutConfig {
    pub concurrency: usize,
    pub deadline_ms: Option<u64>,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            deadline_ms: None,
        }
    }
}

impl FanOutConfig {
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    /// Name of the reserved cache entry holding the built index.
    pub name: String,
    /// Keyword handed to the resolver to find the dataset's distributions.
    pub keyword: String,
    /// Only datasets whose title contains this text are indexed.
    pub title_filter: Option<String>,
    pub ttl_secs: u64,
    /// Index every `stride`-th distribution; 1 indexes all of them.
    pub stride: usize,
    pub name_column: String,
    pub code_column: String,
    /// Columns returned by price lookups.
    pub value_columns: Vec<String>,
    /// Column used to order price rows chronologically.
    pub date_column: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: "nadac".to_string(),
            keyword: "nadac".to_string(),
            title_filter: Some("(National Average Drug Acquisition Cost)".to_string()),
            ttl_secs: 3600,
            stride: 4,
            name_column: "ndc_description".to_string(),
            code_column: "ndc".to_string(),
            value_columns: vec!["as_of_date".to_string(), "nadac_per_unit".to_string()],
            date_column: "as_of_date".to_string(),
        }
    }
}

impl IndexConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub log_filter: String,
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: "tabula_client=info,tabula_storage=info,warn".to_string(),
            json: false,
        }
    }
}

impl TabulaConfig {
    /// Load from `--config <path>` or `TABULA_CONFIG`, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.base_url.trim().is_empty() {
            return Err(invalid("http.base_url", "must not be empty"));
        }
        if self.http.request_timeout_ms == 0 {
            return Err(invalid("http.request_timeout_ms", "must be > 0"));
        }
        if self.http.max_concurrent_requests == 0 {
            return Err(invalid("http.max_concurrent_requests", "must be > 0"));
        }
        if self.cache.path.as_os_str().is_empty() {
            return Err(invalid("cache.path", "must not be empty"));
        }
        if self.cache.max_size_mb == 0 {
            return Err(invalid("cache.max_size_mb", "must be > 0"));
        }
        if self.pagination.page_size == 0 {
            return Err(invalid("pagination.page_size", "must be > 0"));
        }
        if self.pagination.max_pages == 0 {
            return Err(invalid("pagination.max_pages", "must be > 0"));
        }
        if self.pagination.max_rows == 0 {
            return Err(invalid("pagination.max_rows", "must be > 0"));
        }
        if self.fanout.concurrency == 0 {
            return Err(invalid("fanout.concurrency", "must be > 0"));
        }
        if self.fanout.deadline_ms == Some(0) {
            return Err(invalid("fanout.deadline_ms", "must be > 0 when set"));
        }
        if self.index.name.trim().is_empty() {
            return Err(invalid("index.name", "must not be empty"));
        }
        if self.index.keyword.trim().is_empty() {
            return Err(invalid("index.keyword", "must not be empty"));
        }
        if self.index.ttl_secs == 0 {
            return Err(invalid("index.ttl_secs", "must be > 0"));
        }
        if self.index.stride == 0 {
            return Err(invalid("index.stride", "must be > 0"));
        }
        if self.index.name_column.trim().is_empty() {
            return Err(invalid("index.name_column", "must not be empty"));
        }
        if self.index.code_column.trim().is_empty() {
            return Err(invalid("index.code_column", "must not be empty"));
        }
        if self.index.value_columns.is_empty() {
            return Err(invalid("index.value_columns", "must name at least one column"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
