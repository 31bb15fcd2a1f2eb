use crate::config::*;
use crate::error::{Error, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub exchanges: ExchangesConfig,
    pub pipeline: PipelineConfig,
    pub aggregator: AggregatorConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                Environment::with_prefix("MARKETFLOW")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::ConfigError(e.to_string()))?;

        let loaded: AppConfig = config.try_deserialize()
            .map_err(|e| Error::ConfigError(e.to_string()))?;

        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.worker_count == 0 {
            return Err(Error::ConfigError("pipeline.worker_count must be at least 1".to_string()));
        }
        if self.pipeline.channel_capacity == 0 {
            return Err(Error::ConfigError("pipeline.channel_capacity must be at least 1".to_string()));
        }
        if let Some(bad) = self.exchanges.live.iter().find(|e| !e.exchange.is_source()) {
            return Err(Error::ConfigError(format!(
                "exchanges.live entry '{}' is not a source exchange",
                bad.exchange
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Exchange, Mode};

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.pipeline.worker_count, 5);
        assert_eq!(config.pipeline.channel_capacity, 100);
        assert_eq!(config.pipeline.start_mode, Mode::Live);
        assert_eq!(config.aggregator.interval_secs, 60);
        assert_eq!(config.storage.history_retention_secs, 300);
        assert_eq!(config.exchanges.live.len(), 3);
        assert_eq!(config.exchanges.live[0].exchange, Exchange::Exchange1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_overlay_keeps_defaults() {
        let config: AppConfig = Config::builder()
            .add_source(config::File::from_str(
                r#"
                [pipeline]
                worker_count = 2
                start_mode = "test"

                [storage]
                backend = "external"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.pipeline.worker_count, 2);
        assert_eq!(config.pipeline.start_mode, Mode::Test);
        assert_eq!(config.pipeline.channel_capacity, 100);
        assert_eq!(config.storage.backend, StorageBackend::External);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = AppConfig::default();
        config.pipeline.worker_count = 0;
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_validate_rejects_wildcard_source() {
        let mut config = AppConfig::default();
        config.exchanges.live[0].exchange = Exchange::All;
        assert!(config.validate().is_err());
    }
}
