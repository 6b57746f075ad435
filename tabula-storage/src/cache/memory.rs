//! In-memory cache backend.
//!
//! Same contract as the LMDB backend without durability. Used by tests and
//! by short-lived processes that do not want a cache directory.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tabula_core::{CacheError, Payload, TabulaResult};

use super::request_key::RequestKey;
use super::traits::{CacheBackend, CacheStats};

#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    entries: RwLock<HashMap<RequestKey, Payload>>,
    stats: RwLock<CacheStats>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, hit: bool) {
        if let Ok(mut stats) = self.stats.write() {
            if hit {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
        }
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &RequestKey) -> TabulaResult<Option<Payload>> {
        let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
        let value = entries.get(key).cloned();
        self.record(value.is_some());
        Ok(value)
    }

    async fn put(&self, key: &RequestKey, value: &Payload) -> TabulaResult<()> {
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        entries.insert(key.clone(), value.clone());
        Ok(())
    }

    async fn remove(&self, key: &RequestKey) -> TabulaResult<bool> {
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        Ok(entries.remove(key).is_some())
    }

    async fn remove_prefix(&self, prefix: &str) -> TabulaResult<u64> {
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        let before = entries.len();
        entries.retain(|key, _| !key.as_str().starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }

    async fn clear(&self) -> TabulaResult<u64> {
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        let removed = entries.len() as u64;
        entries.clear();
        Ok(removed)
    }

    async fn stats(&self) -> TabulaResult<CacheStats> {
        let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
        let mut stats = self
            .stats
            .read()
            .map(|s| s.clone())
            .unwrap_or_default();
        stats.entry_count = entries.len() as u64;
        stats.size_bytes = entries.values().map(|v| v.size_hint() as u64).sum();
        Ok(stats)
    }
}
