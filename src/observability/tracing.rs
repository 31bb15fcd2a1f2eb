use tracing::Span;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Installs the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::ConfigError(format!("Invalid log filter '{}': {}", config.level, e)))?;

    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    installed.map_err(|e| Error::ConfigError(format!("Failed to install tracing subscriber: {}", e)))
}

pub fn source_span(name: &str) -> Span {
    tracing::info_span!(
        "source",
        source = %name,
    )
}

pub fn pool_span(name: &str) -> Span {
    tracing::info_span!(
        "worker_pool",
        pool = %name,
    )
}
