use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;
use crate::error::Result;
use crate::interfaces::cache::{self, Cache};
use crate::interfaces::store::Store;
use crate::storage::cutoff;
use crate::types::{Exchange, PriceStats, PriceTick, Symbol};

// =================================================================
// In-process cache
// =================================================================

#[derive(Debug, Clone)]
struct LatestEntry {
    tick: PriceTick,
    expires_at: Instant,
}

/// In-process `Cache` with the same key layout and retention rules as the
/// Redis backend. Backs `storage.backend = "memory"` and the test suites.
pub struct MemoryCache {
    latest: DashMap<String, LatestEntry>,
    history: DashMap<String, Vec<PriceTick>>,
    retention: Duration,
}

impl MemoryCache {
    pub fn new(retention: Duration) -> Self {
        MemoryCache {
            latest: DashMap::new(),
            history: DashMap::new(),
            retention,
        }
    }

    fn append(&self, key: String, tick: &PriceTick, oldest: DateTime<Utc>) {
        let mut entries = self.history.entry(key).or_default();

        let at = entries.partition_point(|t| t.timestamp <= tick.timestamp);
        entries.insert(at, tick.clone());

        let expired = entries.partition_point(|t| t.timestamp < oldest);
        if expired > 0 {
            entries.drain(..expired);
        }
    }

    pub fn history_len(&self, exchange: Exchange, symbol: Symbol) -> usize {
        self.history
            .get(&cache::history_lookup_key(exchange, symbol))
            .map(|entries| entries.len())
            .unwrap_or(0)
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn set_latest(&self, tick: &PriceTick, ttl: Duration) -> Result<()> {
        let entry = LatestEntry {
            tick: tick.clone(),
            expires_at: Instant::now() + ttl,
        };
        self.latest.insert(cache::latest_key(tick.exchange, tick.symbol), entry.clone());
        self.latest.insert(cache::latest_symbol_key(tick.symbol), entry);
        Ok(())
    }

    async fn get_latest(&self, exchange: Exchange, symbol: Symbol) -> Result<Option<PriceTick>> {
        let key = cache::latest_lookup_key(exchange, symbol);

        let expired = match self.latest.get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => return Ok(Some(entry.tick.clone())),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.latest.remove(&key);
        }
        Ok(None)
    }

    async fn store_history(&self, tick: &PriceTick) -> Result<()> {
        let oldest = cutoff(self.retention);
        self.append(cache::history_key(tick.exchange, tick.symbol), tick, oldest);
        self.append(cache::history_symbol_key(tick.symbol), tick, oldest);
        Ok(())
    }

    async fn get_price_in_period(
        &self,
        exchange: Exchange,
        symbol: Symbol,
        period: Duration,
    ) -> Result<Vec<PriceTick>> {
        let start = cutoff(period);
        let end = Utc::now();

        let ticks = self
            .history
            .get(&cache::history_lookup_key(exchange, symbol))
            .map(|entries| {
                entries
                    .iter()
                    .filter(|t| t.timestamp >= start && t.timestamp <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(ticks)
    }

    async fn delete_expired_history(&self) -> Result<()> {
        let oldest = cutoff(self.retention);
        let mut removed = 0usize;

        for mut entries in self.history.iter_mut() {
            let expired = entries.partition_point(|t| t.timestamp < oldest);
            removed += expired;
            entries.drain(..expired);
        }

        debug!(removed, "Swept expired history from memory cache");
        Ok(())
    }

    fn name(&self) -> &str {
        "memory-cache"
    }

    async fn health(&self) -> Result<bool> {
        Ok(true)
    }
}

// =================================================================
// In-process store
// =================================================================

/// Append-only rollup table held in memory. Query semantics mirror the
/// Postgres store.
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<Vec<PriceStats>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn rows(&self) -> Vec<PriceStats> {
        self.rows.read().await.clone()
    }

    async fn window(&self, exchange: Exchange, symbol: Symbol, period: Duration) -> Vec<PriceStats> {
        let since = cutoff(period);
        self.rows
            .read()
            .await
            .iter()
            .filter(|row| row.symbol == symbol)
            .filter(|row| exchange.is_wildcard() || row.exchange == exchange)
            .filter(|row| row.timestamp >= since)
            .cloned()
            .collect()
    }
}

/// Newest timestamp across `rows`; used for wildcard rollups.
fn newest(rows: &[PriceStats]) -> Option<DateTime<Utc>> {
    rows.iter().map(|row| row.timestamp).max()
}

#[async_trait]
impl Store for MemoryStore {
    async fn store_stats(&self, stats: &[PriceStats]) -> Result<()> {
        self.rows.write().await.extend_from_slice(stats);
        Ok(())
    }

    async fn get_highest_stat(
        &self,
        exchange: Exchange,
        symbol: Symbol,
        period: Duration,
    ) -> Result<Option<PriceStats>> {
        let rows = self.window(exchange, symbol, period).await;

        let mut highest: Option<PriceStats> = None;
        for row in &rows {
            if highest.as_ref().is_none_or(|h| row.max > h.max) {
                highest = Some(row.clone());
            }
        }

        Ok(highest.map(|mut h| {
            if exchange.is_wildcard() {
                h.exchange = Exchange::All;
                h.timestamp = newest(&rows).unwrap_or(h.timestamp);
            }
            h
        }))
    }

    async fn get_lowest_stat(
        &self,
        exchange: Exchange,
        symbol: Symbol,
        period: Duration,
    ) -> Result<Option<PriceStats>> {
        let rows = self.window(exchange, symbol, period).await;

        let mut lowest: Option<PriceStats> = None;
        for row in &rows {
            if lowest.as_ref().is_none_or(|l| row.min < l.min) {
                lowest = Some(row.clone());
            }
        }

        Ok(lowest.map(|mut l| {
            if exchange.is_wildcard() {
                l.exchange = Exchange::All;
                l.timestamp = newest(&rows).unwrap_or(l.timestamp);
            }
            l
        }))
    }

    async fn get_average_stat(
        &self,
        exchange: Exchange,
        symbol: Symbol,
        period: Duration,
    ) -> Result<Option<PriceStats>> {
        let rows = self.window(exchange, symbol, period).await;
        let Some(timestamp) = newest(&rows) else {
            return Ok(None);
        };

        let average = rows.iter().map(|row| row.average).sum::<f64>() / rows.len() as f64;
        let min = rows.iter().map(|row| row.min).fold(f64::INFINITY, f64::min);
        let max = rows.iter().map(|row| row.max).fold(f64::NEG_INFINITY, f64::max);

        Ok(Some(PriceStats {
            exchange,
            symbol,
            timestamp,
            min,
            max,
            average,
        }))
    }

    fn name(&self) -> &str {
        "memory-store"
    }

    async fn health(&self) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(exchange: Exchange, price: f64, age: Duration) -> PriceTick {
        let timestamp = Utc::now() - chrono::Duration::from_std(age).unwrap();
        PriceTick::new(exchange, Symbol::BtcUsdt, price, timestamp)
    }

    fn stat(exchange: Exchange, min: f64, max: f64, average: f64) -> PriceStats {
        PriceStats {
            exchange,
            symbol: Symbol::BtcUsdt,
            timestamp: Utc::now(),
            min,
            max,
            average,
        }
    }

    #[tokio::test]
    async fn test_latest_by_exchange_and_wildcard() {
        let cache = MemoryCache::default();
        let first = tick(Exchange::Exchange1, 10.0, Duration::ZERO);
        let second = tick(Exchange::Exchange2, 11.0, Duration::ZERO);

        cache.set_latest(&first, Duration::from_secs(60)).await.unwrap();
        cache.set_latest(&second, Duration::from_secs(60)).await.unwrap();

        let got = cache.get_latest(Exchange::Exchange1, Symbol::BtcUsdt).await.unwrap();
        assert_eq!(got, Some(first));
        let got = cache.get_latest(Exchange::All, Symbol::BtcUsdt).await.unwrap();
        assert_eq!(got, Some(second));
        assert!(cache.get_latest(Exchange::Exchange3, Symbol::BtcUsdt).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_expires_after_ttl() {
        let cache = MemoryCache::default();
        let t = tick(Exchange::Exchange1, 10.0, Duration::ZERO);

        cache.set_latest(&t, Duration::ZERO).await.unwrap();
        assert!(cache.get_latest(Exchange::Exchange1, Symbol::BtcUsdt).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_history_trimmed_on_write() {
        let cache = MemoryCache::new(Duration::from_secs(60));

        cache.store_history(&tick(Exchange::Exchange1, 1.0, Duration::from_secs(120))).await.unwrap();
        cache.store_history(&tick(Exchange::Exchange1, 2.0, Duration::from_secs(1))).await.unwrap();

        assert_eq!(cache.history_len(Exchange::Exchange1, Symbol::BtcUsdt), 1);
        assert_eq!(cache.history_len(Exchange::All, Symbol::BtcUsdt), 1);
    }

    #[tokio::test]
    async fn test_price_in_period_is_ordered_and_bounded() {
        let cache = MemoryCache::new(Duration::from_secs(600));

        cache.store_history(&tick(Exchange::Exchange1, 3.0, Duration::from_secs(5))).await.unwrap();
        cache.store_history(&tick(Exchange::Exchange1, 1.0, Duration::from_secs(30))).await.unwrap();
        cache.store_history(&tick(Exchange::Exchange2, 2.0, Duration::from_secs(10))).await.unwrap();
        cache.store_history(&tick(Exchange::Exchange1, 9.0, Duration::from_secs(300))).await.unwrap();

        let window = cache
            .get_price_in_period(Exchange::Exchange1, Symbol::BtcUsdt, Duration::from_secs(60))
            .await
            .unwrap();
        let prices: Vec<f64> = window.iter().map(|t| t.price).collect();
        assert_eq!(prices, vec![1.0, 3.0]);

        let all = cache
            .get_price_in_period(Exchange::All, Symbol::BtcUsdt, Duration::from_secs(60))
            .await
            .unwrap();
        let prices: Vec<f64> = all.iter().map(|t| t.price).collect();
        assert_eq!(prices, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_history() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        // Insert directly so the write-side trim does not run first.
        let old = tick(Exchange::Exchange1, 1.0, Duration::from_secs(120));
        cache.history.insert(cache::history_key(old.exchange, old.symbol), vec![old]);

        cache.delete_expired_history().await.unwrap();
        assert_eq!(cache.history_len(Exchange::Exchange1, Symbol::BtcUsdt), 0);
    }

    #[tokio::test]
    async fn test_store_queries_by_exchange() {
        let store = MemoryStore::new();
        store
            .store_stats(&[
                stat(Exchange::Exchange1, 5.0, 10.0, 7.0),
                stat(Exchange::Exchange1, 2.0, 8.0, 5.0),
                stat(Exchange::Exchange2, 1.0, 20.0, 9.0),
            ])
            .await
            .unwrap();

        let period = Duration::from_secs(60);
        let highest = store.get_highest_stat(Exchange::Exchange1, Symbol::BtcUsdt, period).await.unwrap().unwrap();
        assert_eq!(highest.max, 10.0);
        let lowest = store.get_lowest_stat(Exchange::Exchange1, Symbol::BtcUsdt, period).await.unwrap().unwrap();
        assert_eq!(lowest.min, 2.0);
        let average = store.get_average_stat(Exchange::Exchange1, Symbol::BtcUsdt, period).await.unwrap().unwrap();
        assert_eq!(average.average, 6.0);
    }

    #[tokio::test]
    async fn test_lowest_compares_min_against_min() {
        let store = MemoryStore::new();
        // A max/min comparison would wrongly prefer the second row here.
        store
            .store_stats(&[
                stat(Exchange::Exchange1, 1.0, 50.0, 20.0),
                stat(Exchange::Exchange1, 3.0, 4.0, 3.5),
            ])
            .await
            .unwrap();

        let lowest = store
            .get_lowest_stat(Exchange::Exchange1, Symbol::BtcUsdt, Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lowest.min, 1.0);
    }

    #[tokio::test]
    async fn test_wildcard_store_queries() {
        let store = MemoryStore::new();
        store
            .store_stats(&[
                stat(Exchange::Exchange1, 5.0, 10.0, 7.0),
                stat(Exchange::Exchange2, 1.0, 20.0, 9.0),
            ])
            .await
            .unwrap();

        let period = Duration::from_secs(60);
        let highest = store.get_highest_stat(Exchange::All, Symbol::BtcUsdt, period).await.unwrap().unwrap();
        assert_eq!(highest.exchange, Exchange::All);
        assert_eq!(highest.max, 20.0);
        let average = store.get_average_stat(Exchange::All, Symbol::BtcUsdt, period).await.unwrap().unwrap();
        assert_eq!(average.average, 8.0);
        assert!(store.get_average_stat(Exchange::All, Symbol::EthUsdt, period).await.unwrap().is_none());
    }
}
