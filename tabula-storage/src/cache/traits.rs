//! Cache backend trait and statistics.
//!
//! This module defines the trait that must be implemented by cache backends.

use async_trait::async_trait;
use tabula_core::{Payload, TabulaResult};

use super::request_key::RequestKey;

/// Cache backend trait for pluggable cache implementations.
///
/// A backend is a flat key→payload table. It never expires entries on its
/// own; freshness is the caller's concern. Implementations must be safe to
/// share across tasks.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a value from the cache, or `None` if absent.
    async fn get(&self, key: &RequestKey) -> TabulaResult<Option<Payload>>;

    /// Store a value, replacing any previous entry for the key.
    async fn put(&self, key: &RequestKey, value: &Payload) -> TabulaResult<()>;

    /// Remove a single entry. Returns whether an entry existed.
    async fn remove(&self, key: &RequestKey) -> TabulaResult<bool>;

    /// Remove every entry whose key starts with `prefix`.
    async fn remove_prefix(&self, prefix: &str) -> TabulaResult<u64>;

    /// Remove every entry.
    async fn clear(&self) -> TabulaResult<u64>;

    /// Get cache statistics.
    async fn stats(&self) -> TabulaResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate stored size in bytes.
    pub size_bytes: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
