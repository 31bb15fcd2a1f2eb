pub mod memory;
pub mod redis;
pub mod postgres;

use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use tracing::info;
use crate::config::{StorageBackend, StorageConfig};
use crate::error::Result;
use crate::interfaces::{Cache, Store};

/// Earliest timestamp still inside `period` of now.
pub(crate) fn cutoff(period: Duration) -> DateTime<Utc> {
    let period = chrono::Duration::from_std(period).unwrap_or_else(|_| chrono::Duration::days(36_500));
    Utc::now()
        .checked_sub_signed(period)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Builds the cache and store selected by `storage.backend`.
pub async fn connect(config: &StorageConfig) -> Result<(Arc<dyn Cache>, Arc<dyn Store>)> {
    match config.backend {
        StorageBackend::Memory => {
            info!("Using in-process cache and store");
            Ok((
                Arc::new(memory::MemoryCache::new(config.history_retention())),
                Arc::new(memory::MemoryStore::new()),
            ))
        }
        StorageBackend::External => {
            let cache = self::redis::RedisCache::connect(
                &config.redis_url,
                config.history_retention(),
                config.connect_timeout(),
            )
            .await?;
            let store = self::postgres::PostgresStore::connect(
                &config.postgres_dsn,
                config.postgres_max_connections,
                config.connect_timeout(),
            )
            .await?;
            Ok((Arc::new(cache), Arc::new(store)))
        }
    }
}
