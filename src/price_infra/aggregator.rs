use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use crate::error::{Error, Result};
use crate::interfaces::cache::Cache;
use crate::interfaces::store::Store;
use crate::observability::metrics::{ROLLUPS_STORED, ROLLUP_FAILURES};
use crate::types::{Exchange, PriceStats, Symbol};

/// Periodically rolls cached history into min/max/average rows.
pub struct Aggregator {
    cache: Arc<dyn Cache>,
    store: Arc<dyn Store>,
    interval: Duration,
    window: Duration,
}

impl Aggregator {
    pub fn new(cache: Arc<dyn Cache>, store: Arc<dyn Store>, interval: Duration, window: Duration) -> Self {
        Aggregator {
            cache,
            store,
            // tokio intervals panic on a zero period
            interval: interval.max(Duration::from_millis(1)),
            window,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawns the rollup loop. It lives exactly as long as `cancel`.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let aggregator = self.clone();

        tokio::spawn(async move {
            let period = aggregator.interval;
            let budget = period / 2;
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(interval = ?period, window = ?aggregator.window, "Aggregator started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let outcome = tokio::select! {
                    _ = cancel.cancelled() => break,
                    outcome = tokio::time::timeout(budget, aggregator.run_once()) => outcome,
                };

                match outcome {
                    Ok(Ok(stored)) => debug!(stored, "Aggregation run complete"),
                    Ok(Err(e)) => {
                        ROLLUP_FAILURES.inc();
                        error!(error = %e, "Failed to store aggregated stats");
                    }
                    Err(_) => {
                        ROLLUP_FAILURES.inc();
                        warn!(budget = ?budget, "Aggregation run timed out");
                    }
                }
            }

            info!("Aggregator stopped");
        })
    }

    /// One rollup over every source exchange and symbol. Returns the number
    /// of rows written.
    pub async fn run_once(&self) -> Result<usize> {
        let now = Utc::now();
        let mut batch = Vec::new();

        for exchange in Exchange::SOURCES {
            for symbol in Symbol::ALL {
                let ticks = match self.cache.get_price_in_period(exchange, symbol, self.window).await {
                    Ok(ticks) => ticks,
                    Err(e) => {
                        warn!(exchange = %exchange, symbol = %symbol, error = %e, "Failed to read price history");
                        continue;
                    }
                };

                match PriceStats::from_ticks(exchange, symbol, now, &ticks) {
                    Some(stats) => batch.push(stats),
                    None => debug!(exchange = %exchange, symbol = %symbol, "No prices in window"),
                }
            }
        }

        if batch.is_empty() {
            return Ok(0);
        }

        self.store
            .store_stats(&batch)
            .await
            .map_err(|e| Error::Store(format!("batch of {} rows: {}", batch.len(), e)))?;

        ROLLUPS_STORED.inc_by(batch.len() as u64);
        info!(rows = batch.len(), store = %self.store.name(), "Stored aggregated stats");
        Ok(batch.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use crate::storage::memory::{MemoryCache, MemoryStore};
    use crate::types::PriceTick;

    fn setup(interval: Duration) -> (Arc<MemoryCache>, Arc<MemoryStore>, Arc<Aggregator>) {
        let cache = Arc::new(MemoryCache::new(Duration::from_secs(300)));
        let store = Arc::new(MemoryStore::new());
        let aggregator = Arc::new(Aggregator::new(
            cache.clone(),
            store.clone(),
            interval,
            Duration::from_secs(60),
        ));
        (cache, store, aggregator)
    }

    #[tokio::test]
    async fn test_run_once_rolls_up_non_empty_pairs() {
        let (cache, store, aggregator) = setup(Duration::from_secs(60));
        let now = Utc::now();

        for (offset, price) in [(3, 10.0), (2, 30.0), (1, 20.0)] {
            let tick = PriceTick::new(
                Exchange::Exchange2,
                Symbol::DogeUsdt,
                price,
                now - ChronoDuration::seconds(offset),
            );
            cache.store_history(&tick).await.unwrap();
        }

        assert_eq!(aggregator.run_once().await.unwrap(), 1);

        let rows = store.rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].exchange, Exchange::Exchange2);
        assert_eq!(rows[0].symbol, Symbol::DogeUsdt);
        assert_eq!(rows[0].min, 10.0);
        assert_eq!(rows[0].max, 30.0);
        assert_eq!(rows[0].average, 20.0);
    }

    #[tokio::test]
    async fn test_zero_interval_is_clamped() {
        let (_, _, aggregator) = setup(Duration::ZERO);
        assert_eq!(aggregator.interval(), Duration::from_millis(1));

        let cancel = CancellationToken::new();
        let handle = aggregator.start(cancel.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_once_skips_old_ticks() {
        let (cache, store, aggregator) = setup(Duration::from_secs(60));
        let stale = PriceTick::new(
            Exchange::Exchange1,
            Symbol::BtcUsdt,
            1.0,
            Utc::now() - ChronoDuration::seconds(120),
        );
        cache.store_history(&stale).await.unwrap();

        assert_eq!(aggregator.run_once().await.unwrap(), 0);
        assert!(store.rows().await.is_empty());
    }

    #[tokio::test]
    async fn test_loop_runs_on_interval_and_stops_on_cancel() {
        let (cache, store, aggregator) = setup(Duration::from_millis(20));
        let tick = PriceTick::new(Exchange::TestExchange1, Symbol::SolUsdt, 200.0, Utc::now());
        cache.store_history(&tick).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = aggregator.start(cancel.clone());

        tokio::time::timeout(Duration::from_secs(2), async {
            while store.rows().await.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
