//! Structured logging configuration.
//!
//! Initializes the global `tracing` subscriber from a [`LoggingConfig`].
//! The `RUST_LOG` environment variable, when set, overrides the configured
//! level so operators can raise verbosity without touching config files.

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{KnockError, Result};

/// Install the global tracing subscriber.
///
/// Call once at daemon startup, before the first packet is processed.
/// Returns an error if a subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_str(config.log_level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log_targets)
        .try_init()
        .map_err(|e| KnockError::ConfigError(format!("failed to install subscriber: {e}")))
}

fn level_str(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}
