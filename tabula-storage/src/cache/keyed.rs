//! Get-or-fetch cache with at most one in-flight fetch per key.
//!
//! `KeyedCache` sits in front of a [`CacheBackend`]. A miss runs the caller's
//! fetch function while holding a per-key gate, so concurrent callers asking
//! for the same key wait for the first fetch and then read its result from
//! the backend instead of fetching again.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::{de::DeserializeOwned, Serialize};
use tabula_core::{CacheError, Payload, TabulaResult};
use tokio::sync::Mutex as AsyncMutex;

use super::request_key::RequestKey;
use super::traits::{CacheBackend, CacheStats};

type GateMap = Mutex<HashMap<RequestKey, Arc<AsyncMutex<()>>>>;

/// Persistent key→payload cache with get-or-fetch semantics.
///
/// The cache never expires entries. Components that care about staleness
/// (see the derived index) keep their own timestamps and invalidate
/// explicitly.
#[derive(Clone)]
pub struct KeyedCache {
    backend: Arc<dyn CacheBackend>,
    gates: Arc<GateMap>,
}

impl KeyedCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            gates: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn get(&self, key: &RequestKey) -> TabulaResult<Option<Payload>> {
        self.backend.get(key).await
    }

    pub async fn put(&self, key: &RequestKey, value: &Payload) -> TabulaResult<()> {
        self.backend.put(key, value).await
    }

    pub async fn remove(&self, key: &RequestKey) -> TabulaResult<bool> {
        self.backend.remove(key).await
    }

    pub async fn remove_prefix(&self, prefix: &str) -> TabulaResult<u64> {
        self.backend.remove_prefix(prefix).await
    }

    pub async fn clear(&self) -> TabulaResult<u64> {
        self.backend.clear().await
    }

    pub async fn stats(&self) -> TabulaResult<CacheStats> {
        self.backend.stats().await
    }

    /// Return the cached value for `key`, or run `fetch` and cache its result.
    ///
    /// A failed fetch stores nothing and its error is returned unchanged.
    /// While a fetch for `key` is running, other callers for the same key
    /// wait and then observe the stored value.
    pub async fn get_or_fetch<F, Fut>(&self, key: &RequestKey, fetch: F) -> TabulaResult<Payload>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TabulaResult<Payload>>,
    {
        if let Some(hit) = self.backend.get(key).await? {
            tracing::trace!(key = %key, "cache hit");
            return Ok(hit);
        }

        let gate = InFlightGate::acquire(&self.gates, key)?;
        let _permit = gate.lock().await;

        // The previous holder may have populated the entry while we waited.
        if let Some(hit) = self.backend.get(key).await? {
            tracing::trace!(key = %key, "cache hit after waiting on in-flight fetch");
            return Ok(hit);
        }

        tracing::debug!(key = %key, "cache miss, fetching");
        let value = fetch().await?;
        self.backend.put(key, &value).await?;
        Ok(value)
    }

    /// Read a serde value stored under `key` as JSON.
    pub async fn get_typed<T: DeserializeOwned>(&self, key: &RequestKey) -> TabulaResult<Option<T>> {
        match self.backend.get(key).await? {
            Some(Payload::Json(value)) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| {
                    CacheError::Decode {
                        key: key.to_string(),
                        reason: e.to_string(),
                    }
                    .into()
                }),
            Some(Payload::Bytes(_)) => Err(CacheError::Decode {
                key: key.to_string(),
                reason: "expected a JSON entry, found bytes".to_string(),
            }
            .into()),
            None => Ok(None),
        }
    }

    /// Store a serde value under `key` as JSON.
    pub async fn put_typed<T: Serialize>(&self, key: &RequestKey, value: &T) -> TabulaResult<()> {
        let json = serde_json::to_value(value).map_err(|e| CacheError::Encode {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.backend.put(key, &Payload::Json(json)).await
    }

    #[cfg(test)]
    fn gate_count(&self) -> usize {
        self.gates.lock().map(|g| g.len()).unwrap_or(0)
    }
}

impl std::fmt::Debug for KeyedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedCache").finish_non_exhaustive()
    }
}

/// Shared handle on a per-key lock. Removes the map entry when the last
/// interested caller goes away, including when its future is dropped.
struct InFlightGate<'a> {
    gates: &'a GateMap,
    key: RequestKey,
    lock: Arc<AsyncMutex<()>>,
}

impl<'a> InFlightGate<'a> {
    fn acquire(gates: &'a GateMap, key: &RequestKey) -> Result<Self, CacheError> {
        let mut map = gates.lock().map_err(|_| CacheError::LockPoisoned)?;
        let lock = Arc::clone(map.entry(key.clone()).or_default());
        Ok(Self {
            gates,
            key: key.clone(),
            lock,
        })
    }

    async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for InFlightGate<'_> {
    fn drop(&mut self) {
        if let Ok(mut map) = self.gates.lock() {
            // One reference in the map, one here: nobody else is waiting.
            if Arc::strong_count(&self.lock) <= 2 {
                map.remove(&self.key);
            }
        }
    }
}
