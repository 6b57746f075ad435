//! TABULA Storage - Persistent request cache
//!
//! Every remote read and query funnels through [`KeyedCache`], which keeps
//! one entry per canonical request and guarantees a single in-flight fetch
//! per key.

pub mod cache;

pub use cache::{
    CacheBackend, CacheStats, InMemoryCacheBackend, KeyedCache, LmdbCacheBackend,
    LmdbCacheError, RequestKey,
};
