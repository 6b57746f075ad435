//! Caller-supplied deadlines.
//!
//! Dropping a future cancels everything it owns, so wrapping a whole
//! operation in `tokio::time::timeout` cancels every outstanding sub-request
//! as soon as the deadline passes. Partial results go with it.

use std::future::Future;
use std::time::Duration;

use tabula_core::{TabulaError, TabulaResult};

/// Run `operation` to completion, or fail with `DeadlineExceeded`.
pub async fn within<T, F>(name: &str, deadline: Option<Duration>, operation: F) -> TabulaResult<T>
where
    F: Future<Output = TabulaResult<T>>,
{
    match deadline {
        None => operation.await,
        Some(after) => match tokio::time::timeout(after, operation).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(operation = name, ?after, "deadline exceeded, cancelling");
                Err(TabulaError::DeadlineExceeded {
                    operation: name.to_string(),
                    after,
                })
            }
        },
    }
}
