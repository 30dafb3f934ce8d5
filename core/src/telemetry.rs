// Tracing subscriber setup
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;
use crate::{Result, RunnerError};

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set. Fails if a global
/// subscriber is already installed.
pub fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| RunnerError::Config(format!("invalid log level '{}': {}", level, e)))?;

    let json = format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_target(true)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().compact().with_target(true)))
        .try_init()
        .map_err(|e| RunnerError::Config(format!("tracing already initialized: {}", e)))?;

    info!(target: "telemetry", level = %level, format = ?format, "Tracing initialized");
    Ok(())
}
