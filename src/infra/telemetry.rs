//! Tracing bootstrap shared by the API and worker processes.

use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

/// Install the process-wide subscriber. `LOG_LEVEL` supplies the base
/// directive; explicit `RUST_LOG` directives still take precedence.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    let filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(ErrorLayer::default());

    match logging.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_target(true))
            .try_init(),
    }
    .map_err(InfraError::Telemetry)
}
