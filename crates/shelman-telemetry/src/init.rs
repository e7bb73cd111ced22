//! Logging initialisation and configuration.
//!
//! # Design
//! - Centralises logging setup (fmt or JSON) with a single entry point.
//! - Derives the filter from `RUST_LOG` with a configurable fallback level.

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default logging target when `RUST_LOG` is not provided.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig<'a> {
    /// Log level string (e.g., `info`, `debug`).
    pub level: &'a str,
    /// Output format selection for the tracing subscriber.
    pub format: LogFormat,
}

impl Default for LoggingConfig<'_> {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL,
            format: LogFormat::infer(),
        }
    }
}

/// Available output formats for the logger.
#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    /// Emit logs as structured JSON objects.
    Json,
    /// Emit human-readable, pretty-printed logs.
    Pretty,
}

impl LogFormat {
    /// Choose a sensible default for the current build.
    #[must_use]
    pub const fn infer() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// Configure and install the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if the tracing subscriber cannot be installed (for
/// example, because another subscriber has already been set globally).
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(build_env_filter(config.level))
            .with(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_thread_ids(false),
            )
            .try_init()
            .map_err(|err| anyhow!("failed to install tracing subscriber: {err}")),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(build_env_filter(config.level))
            .with(fmt::layer().with_target(true))
            .try_init()
            .map_err(|err| anyhow!("failed to install tracing subscriber: {err}")),
    }
}

fn build_env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_info_level() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, DEFAULT_LOG_LEVEL);
    }
}
