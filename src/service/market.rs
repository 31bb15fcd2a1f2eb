use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use crate::error::{Error, Result};
use crate::interfaces::cache::Cache;
use crate::interfaces::store::Store;
use crate::types::{Exchange, PriceStats, PriceTick, Symbol};

/// Read side of the system. Latest prices come from the cache, period
/// extrema and averages from the persisted rollups.
pub struct MarketService {
    cache: Arc<dyn Cache>,
    store: Arc<dyn Store>,
}

impl MarketService {
    pub fn new(cache: Arc<dyn Cache>, store: Arc<dyn Store>) -> Self {
        MarketService { cache, store }
    }

    pub async fn get_latest(&self, exchange: Exchange, symbol: Symbol) -> Result<PriceTick> {
        self.cache
            .get_latest(exchange, symbol)
            .await?
            .ok_or_else(|| not_found("latest", exchange, symbol))
    }

    pub async fn get_highest(&self, exchange: Exchange, symbol: Symbol, period: Duration) -> Result<PriceStats> {
        self.store
            .get_highest_stat(exchange, symbol, period)
            .await?
            .ok_or_else(|| not_found("highest", exchange, symbol))
    }

    pub async fn get_lowest(&self, exchange: Exchange, symbol: Symbol, period: Duration) -> Result<PriceStats> {
        self.store
            .get_lowest_stat(exchange, symbol, period)
            .await?
            .ok_or_else(|| not_found("lowest", exchange, symbol))
    }

    pub async fn get_average(&self, exchange: Exchange, symbol: Symbol, period: Duration) -> Result<PriceStats> {
        self.store
            .get_average_stat(exchange, symbol, period)
            .await?
            .ok_or_else(|| not_found("average", exchange, symbol))
    }

    pub async fn cache_health(&self) -> (String, bool) {
        (self.cache.name().to_string(), self.cache.health().await.unwrap_or(false))
    }

    pub async fn store_health(&self) -> (String, bool) {
        (self.store.name().to_string(), self.store.health().await.unwrap_or(false))
    }
}

fn not_found(query: &str, exchange: Exchange, symbol: Symbol) -> Error {
    debug!(query, exchange = %exchange, symbol = %symbol, "No data for query");
    Error::NotFound
}
