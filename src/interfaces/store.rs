use async_trait::async_trait;
use std::time::Duration;
use crate::error::Result;
use crate::types::{Exchange, PriceStats, Symbol};

/// Durable home of the aggregator's rollups.
#[async_trait]
pub trait Store: Send + Sync {
    async fn store_stats(&self, stats: &[PriceStats]) -> Result<()>;

    /// Row with the highest `max` within `period`; for `Exchange::All` the
    /// maximum across exchanges, stamped with the newest row's timestamp.
    async fn get_highest_stat(
        &self,
        exchange: Exchange,
        symbol: Symbol,
        period: Duration,
    ) -> Result<Option<PriceStats>>;

    async fn get_lowest_stat(
        &self,
        exchange: Exchange,
        symbol: Symbol,
        period: Duration,
    ) -> Result<Option<PriceStats>>;

    /// Mean of the row averages within `period`.
    async fn get_average_stat(
        &self,
        exchange: Exchange,
        symbol: Symbol,
        period: Duration,
    ) -> Result<Option<PriceStats>>;

    fn name(&self) -> &str;

    async fn health(&self) -> Result<bool>;
}
