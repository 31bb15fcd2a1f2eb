use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client as RedisClient};
use std::time::Duration;
use tracing::{debug, info, warn};
use crate::error::{Error, Result};
use crate::interfaces::cache::{self, Cache};
use crate::storage::cutoff;
use crate::types::{Exchange, PriceTick, Symbol};

/// Floor for the TTL applied to history sets so abandoned keys disappear
/// even if the sweep never runs.
const MIN_HISTORY_KEY_TTL_SECS: u64 = 3600;

/// History keys must outlive the retention window, otherwise an idle symbol
/// loses entries the sweep would still keep.
fn history_key_ttl_secs(retention: Duration) -> i64 {
    let secs = retention.as_secs().max(MIN_HISTORY_KEY_TTL_SECS);
    i64::try_from(secs).unwrap_or(i64::MAX)
}

/// Redis-backed cache. Latest values are plain keys with a TTL; history is a
/// pair of sorted sets scored by epoch millis.
pub struct RedisCache {
    #[allow(dead_code)] // Keep client alive to maintain connection
    client: RedisClient,
    connection: MultiplexedConnection,
    retention: Duration,
}

impl RedisCache {
    pub async fn connect(redis_url: &str, retention: Duration, timeout: Duration) -> Result<Self> {
        let client = RedisClient::open(redis_url)
            .map_err(|e| Error::Cache(format!("Failed to create Redis client: {}", e)))?;

        let connection = tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| Error::Cache(format!("Timed out connecting to Redis at {}", redis_url)))?
            .map_err(|e| Error::Cache(format!("Failed to connect to Redis: {}", e)))?;

        let cache = RedisCache {
            client,
            connection,
            retention,
        };

        if !cache.health().await? {
            return Err(Error::Cache(format!("Redis at {} did not answer PING", redis_url)));
        }

        info!("Connected to Redis at {}", redis_url);
        Ok(cache)
    }

    fn encode(tick: &PriceTick) -> Result<String> {
        serde_json::to_string(tick)
            .map_err(|e| Error::Cache(format!("Failed to serialize tick: {}", e)))
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn set_latest(&self, tick: &PriceTick, ttl: Duration) -> Result<()> {
        let value = Self::encode(tick)?;
        let ttl_secs = ttl.as_secs().max(1);
        let mut conn = self.connection.clone();

        let _: () = redis::pipe()
            .set_ex(cache::latest_key(tick.exchange, tick.symbol), &value, ttl_secs)
            .ignore()
            .set_ex(cache::latest_symbol_key(tick.symbol), &value, ttl_secs)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Cache(format!("Redis SET failed: {}", e)))?;

        Ok(())
    }

    async fn get_latest(&self, exchange: Exchange, symbol: Symbol) -> Result<Option<PriceTick>> {
        let key = cache::latest_lookup_key(exchange, symbol);
        let mut conn = self.connection.clone();

        let raw: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| Error::Cache(format!("Redis GET {} failed: {}", key, e)))?;

        raw.map(|json| {
            serde_json::from_str(&json)
                .map_err(|e| Error::Cache(format!("Failed to deserialize tick at {}: {}", key, e)))
        })
        .transpose()
    }

    async fn store_history(&self, tick: &PriceTick) -> Result<()> {
        let value = Self::encode(tick)?;
        let score = tick.timestamp_ms();
        let oldest = cutoff(self.retention).timestamp_millis();
        let exchange_key = cache::history_key(tick.exchange, tick.symbol);
        let symbol_key = cache::history_symbol_key(tick.symbol);
        let ttl = history_key_ttl_secs(self.retention);
        let mut conn = self.connection.clone();

        let _: () = redis::pipe()
            .atomic()
            .zadd(&exchange_key, &value, score)
            .ignore()
            .zadd(&symbol_key, &value, score)
            .ignore()
            .zrembyscore(&exchange_key, "-inf", format!("({}", oldest))
            .ignore()
            .zrembyscore(&symbol_key, "-inf", format!("({}", oldest))
            .ignore()
            .expire(&exchange_key, ttl)
            .ignore()
            .expire(&symbol_key, ttl)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Cache(format!("Redis history pipeline failed: {}", e)))?;

        Ok(())
    }

    async fn get_price_in_period(
        &self,
        exchange: Exchange,
        symbol: Symbol,
        period: Duration,
    ) -> Result<Vec<PriceTick>> {
        let key = cache::history_lookup_key(exchange, symbol);
        let start = cutoff(period).timestamp_millis();
        let end = Utc::now().timestamp_millis();
        let mut conn = self.connection.clone();

        let members: Vec<String> = conn
            .zrangebyscore(&key, start, end)
            .await
            .map_err(|e| Error::Cache(format!("Redis ZRANGEBYSCORE {} failed: {}", key, e)))?;

        let mut ticks = Vec::with_capacity(members.len());
        for member in members {
            match serde_json::from_str::<PriceTick>(&member) {
                Ok(tick) => ticks.push(tick),
                Err(e) => {
                    // Skip corrupted entries, keep the rest of the window
                    warn!(key = %key, error = %e, "Failed to deserialize tick from Redis");
                }
            }
        }

        ticks.sort_by_key(|t| t.timestamp);
        Ok(ticks)
    }

    async fn delete_expired_history(&self) -> Result<()> {
        let oldest = cutoff(self.retention).timestamp_millis();
        let mut conn = self.connection.clone();

        let keys: Vec<String> = conn
            .keys("history:*")
            .await
            .map_err(|e| Error::Cache(format!("Redis KEYS failed: {}", e)))?;

        let mut removed = 0usize;
        for key in &keys {
            let trimmed: redis::RedisResult<usize> =
                conn.zrembyscore(key, "-inf", format!("({}", oldest)).await;
            match trimmed {
                Ok(count) => removed += count,
                Err(e) => warn!(key = %key, error = %e, "Failed to trim history key"),
            }
        }

        debug!(keys = keys.len(), removed, "Swept expired history from Redis");
        Ok(())
    }

    fn name(&self) -> &str {
        "redis"
    }

    async fn health(&self) -> Result<bool> {
        let mut conn = self.connection.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Cache(format!("Redis PING failed: {}", e)))?;
        Ok(pong == "PONG")
    }
}
