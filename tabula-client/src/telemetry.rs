//! Tracing subscriber setup.

use tabula_core::{TabulaError, TabulaResult, TelemetryConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured filter. Fails if a
/// subscriber is already installed or the filter does not parse.
pub fn init_tracing(config: &TelemetryConfig) -> TabulaResult<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_filter).map_err(|e| TabulaError::Telemetry {
            reason: format!("invalid log filter `{}`: {}", config.log_filter, e),
        })?,
    };

    let json_layer = config.json.then(|| tracing_subscriber::fmt::layer().json());
    let text_layer = (!config.json).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| TabulaError::Telemetry {
            reason: format!("failed to init subscriber: {}", e),
        })?;

    tracing::debug!(json = config.json, "tracing initialized");
    Ok(())
}
