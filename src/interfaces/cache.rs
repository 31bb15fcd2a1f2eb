use async_trait::async_trait;
use std::time::Duration;
use crate::error::Result;
use crate::types::{Exchange, PriceTick, Symbol};

/// Key-value plus time-ordered history store fed by the collector.
///
/// Logical key layout (shared by every backend):
/// `latest:{exchange}:{symbol}`, `latest:{symbol}`,
/// `history:{exchange}:{symbol}`, `history:{symbol}`.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Write `tick` as the latest value for its exchange and for its symbol.
    async fn set_latest(&self, tick: &PriceTick, ttl: Duration) -> Result<()>;

    /// `Exchange::All` reads the cross-exchange key.
    async fn get_latest(&self, exchange: Exchange, symbol: Symbol) -> Result<Option<PriceTick>>;

    /// Append to both history sets, trimming entries past the retention window.
    async fn store_history(&self, tick: &PriceTick) -> Result<()>;

    /// Ticks observed within `period` of now, oldest first.
    async fn get_price_in_period(
        &self,
        exchange: Exchange,
        symbol: Symbol,
        period: Duration,
    ) -> Result<Vec<PriceTick>>;

    /// Maintenance sweep removing history older than the retention window.
    async fn delete_expired_history(&self) -> Result<()>;

    fn name(&self) -> &str;

    async fn health(&self) -> Result<bool>;
}

pub fn latest_key(exchange: Exchange, symbol: Symbol) -> String {
    format!("latest:{}:{}", exchange, symbol)
}

pub fn latest_symbol_key(symbol: Symbol) -> String {
    format!("latest:{}", symbol)
}

pub fn history_key(exchange: Exchange, symbol: Symbol) -> String {
    format!("history:{}:{}", exchange, symbol)
}

pub fn history_symbol_key(symbol: Symbol) -> String {
    format!("history:{}", symbol)
}

/// Resolves the latest key for a query, honouring the wildcard.
pub fn latest_lookup_key(exchange: Exchange, symbol: Symbol) -> String {
    if exchange.is_wildcard() {
        latest_symbol_key(symbol)
    } else {
        latest_key(exchange, symbol)
    }
}

/// Resolves the history key for a query, honouring the wildcard.
pub fn history_lookup_key(exchange: Exchange, symbol: Symbol) -> String {
    if exchange.is_wildcard() {
        history_symbol_key(symbol)
    } else {
        history_key(exchange, symbol)
    }
}
