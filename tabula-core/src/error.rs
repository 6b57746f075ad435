//! Error types for tabula operations

use std::time::Duration;
use thiserror::Error;

/// Failures of a single remote request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request to {endpoint} failed with status {status}: {message}")]
    Status {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("Transport error for {endpoint}: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("Failed to decode response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },
}

impl FetchError {
    /// The endpoint the failed request was addressed to.
    pub fn endpoint(&self) -> &str {
        match self {
            Self::Status { endpoint, .. }
            | Self::Transport { endpoint, .. }
            | Self::Decode { endpoint, .. } => endpoint,
        }
    }
}

/// Cache layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend error: {reason}")]
    Backend { reason: String },

    #[error("Failed to encode cache entry {key}: {reason}")]
    Encode { key: String, reason: String },

    #[error("Failed to decode cache entry {key}: {reason}")]
    Decode { key: String, reason: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or TABULA_CONFIG)")]
    MissingConfigPath,

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Master error type for all tabula errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TabulaError {
    #[error("Fetch failed: {0}")]
    FetchFailed(#[from] FetchError),

    #[error("Collection of {resource} truncated after {pages} pages ({rows} rows)")]
    CollectionTruncated {
        resource: String,
        pages: usize,
        rows: usize,
    },

    #[error("Rebuild of index {index} failed: {reason}")]
    IndexRebuildFailed { index: String, reason: String },

    #[error("{kind} not found: {key}")]
    NotFound { kind: String, key: String },

    #[error("{operation} exceeded deadline of {after:?}")]
    DeadlineExceeded { operation: String, after: Duration },

    #[error("{failed} of {total} fan-out queries failed")]
    IncompleteFanOut { failed: usize, total: usize },

    #[error("Resolver error: {reason}")]
    Resolver { reason: String },

    #[error("Invalid value for {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("Telemetry error: {reason}")]
    Telemetry { reason: String },

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl TabulaError {
    /// Shorthand for a `NotFound` error.
    pub fn not_found(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key: key.into(),
        }
    }

    /// Shorthand for a `Validation` error.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error came from the remote service.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, Self::FetchFailed(_))
    }
}

/// Result type alias for tabula operations.
pub type TabulaResult<T> = Result<T, TabulaError>;

// =============================================================================
// TESTS
// =============================================================================
