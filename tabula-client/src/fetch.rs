//! Cached execution of single remote requests.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tabula_core::{FetchRequest, Payload, TabulaResult};
use tabula_storage::{KeyedCache, RequestKey};

use crate::transport::Transport;

/// Options for a GET read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Decode the body as opaque bytes (file downloads).
    pub download: bool,
}

impl ReadOptions {
    pub fn download() -> Self {
        Self { download: true }
    }
}

/// Issues one logical request, consulting the cache before the network.
///
/// Failures are returned as `TabulaError::FetchFailed` and never retried
/// here; retry policy belongs to the caller.
#[derive(Clone)]
pub struct FetchExecutor {
    cache: KeyedCache,
    transport: Arc<dyn Transport>,
}

impl FetchExecutor {
    pub fn new(cache: KeyedCache, transport: Arc<dyn Transport>) -> Self {
        Self { cache, transport }
    }

    pub fn cache(&self) -> &KeyedCache {
        &self.cache
    }

    /// GET `endpoint`.
    pub async fn read(&self, endpoint: &str, options: ReadOptions) -> TabulaResult<Payload> {
        let request = FetchRequest::get(endpoint).with_download(options.download);
        self.execute(&request).await
    }

    /// POST `body` to `endpoint` with the given headers.
    pub async fn query(
        &self,
        endpoint: &str,
        body: Value,
        headers: BTreeMap<String, String>,
    ) -> TabulaResult<Payload> {
        let mut request = FetchRequest::post(endpoint, body);
        request.headers.extend(headers);
        self.execute(&request).await
    }

    /// Execute a prepared request through the cache.
    pub async fn execute(&self, request: &FetchRequest) -> TabulaResult<Payload> {
        let key = RequestKey::for_request(request);
        self.cache
            .get_or_fetch(&key, || async {
                match self.transport.send(request).await {
                    Ok(payload) => Ok(payload),
                    Err(err) => {
                        tracing::warn!(
                            endpoint = %request.endpoint,
                            error = %err,
                            "remote request failed"
                        );
                        Err(err.into())
                    }
                }
            })
            .await
    }

    /// Drop the cached response for `request`, if any.
    pub async fn invalidate(&self, request: &FetchRequest) -> TabulaResult<bool> {
        self.cache.remove(&RequestKey::for_request(request)).await
    }
}

impl std::fmt::Debug for FetchExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchExecutor").finish_non_exhaustive()
    }
}
