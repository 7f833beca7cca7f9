//! Logging setup for services built on courier.

use crate::config::LoggingConfig;
use crate::error::{CourierError, CourierResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter for a logging configuration
///
/// `RUST_LOG` wins when set; otherwise `config.level` is used as the
/// directive, falling back to `info` if it does not parse.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global tracing subscriber
///
/// Fails instead of panicking when a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> CourierResult<()> {
    let registry = tracing_subscriber::registry().with(env_filter(config));

    let result = if config.json_format {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| CourierError::configuration(format!("failed to initialize logging: {}", e)))
}

#[cfg(test)]
#[path = "telemetry_tests.rs"]
mod tests;
