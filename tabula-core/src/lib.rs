//! TABULA Core - Data model, errors and configuration
//!
//! Shared types for the cache-aside open-data client. Storage lives in
//! `tabula-storage`; the fetch, pagination, fan-out and index layers live in
//! `tabula-client`.

pub mod config;
pub mod error;
pub mod model;

pub use config::{
    CacheConfig, FanOutConfig, HttpConfig, IndexConfig, PaginationConfig, TabulaConfig,
    TelemetryConfig, CONFIG_ENV_VAR,
};
pub use error::{CacheError, ConfigError, FetchError, TabulaError, TabulaResult};
pub use model::{
    cell_as_string, Condition, FetchRequest, Method, Page, Payload, QuerySpec, Record,
    ResourceDescriptor,
};
