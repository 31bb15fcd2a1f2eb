use std::time::Duration;
use serde::{Deserialize, Serialize};

pub mod exchanges;
pub mod pipeline;
pub mod storage;
pub mod loader;

pub use exchanges::{ExchangesConfig, LiveExchangeConfig};
pub use loader::AppConfig;
pub use pipeline::{AggregatorConfig, PipelineConfig};
pub use storage::{StorageBackend, StorageConfig};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 8080,
            shutdown_timeout_secs: 10,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            json: false,
        }
    }
}
