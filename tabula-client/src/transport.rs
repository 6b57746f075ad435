//! HTTP transport with concurrency limiting and request pacing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tabula_core::{FetchError, FetchRequest, HttpConfig, Method, Payload};
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

/// Sends a single request to the remote service. No caching, no retries.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &FetchRequest) -> Result<Payload, FetchError>;
}

/// reqwest-backed transport for the open-data API.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    limiter: Arc<Semaphore>,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| FetchError::Transport {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        let base_url = if config.base_url.ends_with('/') {
            config.base_url.clone()
        } else {
            format!("{}/", config.base_url)
        };

        Ok(Self {
            client,
            base_url,
            limiter: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1))),
            min_interval: config.min_request_interval(),
            last_request: Mutex::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("{}{}", self.base_url, endpoint.trim_start_matches('/'))
        }
    }

    /// Space request starts at least `min_interval` apart.
    async fn pace(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let next_allowed = previous + self.min_interval;
            if next_allowed > Instant::now() {
                tokio::time::sleep_until(next_allowed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &FetchRequest) -> Result<Payload, FetchError> {
        let endpoint = request.endpoint.as_str();
        let transport_error = |reason: String| FetchError::Transport {
            endpoint: endpoint.to_string(),
            reason,
        };

        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|e| transport_error(format!("rate limiter closed: {}", e)))?;
        self.pace().await;

        let url = self.url_for(endpoint);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.to_string());
        }

        tracing::debug!(method = request.method.as_str(), %url, "sending request");
        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(FetchError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                message,
            });
        }

        if request.download {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| transport_error(e.to_string()))?;
            Ok(Payload::Bytes(bytes.to_vec()))
        } else {
            let value = response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| FetchError::Decode {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                })?;
            Ok(Payload::Json(value))
        }
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("min_interval", &self.min_interval)
            .finish()
    }
}
