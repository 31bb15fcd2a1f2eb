use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::time::Duration;
use tracing::info;
use crate::error::{Error, Result};
use crate::interfaces::store::Store;
use crate::storage::cutoff;
use crate::types::{Exchange, PriceStats, Symbol};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS aggregated_prices (
        id BIGSERIAL PRIMARY KEY,
        pair_name TEXT NOT NULL,
        exchange TEXT NOT NULL,
        timestamp TIMESTAMPTZ NOT NULL,
        min_price DOUBLE PRECISION NOT NULL,
        max_price DOUBLE PRECISION NOT NULL,
        average_price DOUBLE PRECISION NOT NULL
    )
"#;

const CREATE_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS aggregated_prices_pair_exchange_ts
        ON aggregated_prices (pair_name, exchange, timestamp)
"#;

/// `min_price, max_price, average_price, timestamp` of one rollup row.
type StatsRow = (f64, f64, f64, Option<DateTime<Utc>>);

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(dsn: &str, max_connections: u32, timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(timeout)
            .connect(dsn)
            .await
            .map_err(|e| Error::Store(format!("Failed to connect to Postgres: {}", e)))?;

        let store = PostgresStore { pool };
        store.ensure_schema().await?;

        info!("Connected to Postgres");
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        for statement in [CREATE_TABLE, CREATE_INDEX] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::Store(format!("Schema migration failed: {}", e)))?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Picks the row with the extreme `column` in the window. For the
    /// wildcard the row is reported under `all` with the newest timestamp.
    async fn extremum(
        &self,
        exchange: Exchange,
        symbol: Symbol,
        period: Duration,
        column: &str,
        highest: bool,
    ) -> Result<Option<PriceStats>> {
        let since = cutoff(period);
        let order = if highest { "DESC" } else { "ASC" };

        let row: Option<StatsRow> = if exchange.is_wildcard() {
            let query = format!(
                "SELECT min_price, max_price, average_price, \
                 (SELECT MAX(timestamp) FROM aggregated_prices WHERE pair_name = $1 AND timestamp >= $2) \
                 FROM aggregated_prices WHERE pair_name = $1 AND timestamp >= $2 \
                 ORDER BY {column} {order} LIMIT 1"
            );
            sqlx::query_as(&query)
                .bind(symbol.as_str())
                .bind(since)
                .fetch_optional(&self.pool)
                .await
        } else {
            let query = format!(
                "SELECT min_price, max_price, average_price, timestamp FROM aggregated_prices \
                 WHERE pair_name = $1 AND exchange = $2 AND timestamp >= $3 \
                 ORDER BY {column} {order} LIMIT 1"
            );
            sqlx::query_as(&query)
                .bind(symbol.as_str())
                .bind(exchange.as_str())
                .bind(since)
                .fetch_optional(&self.pool)
                .await
        }
        .map_err(|e| Error::Store(format!("Failed to query {}: {}", column, e)))?;

        Ok(row.and_then(|(min, max, average, timestamp)| {
            Some(PriceStats {
                exchange,
                symbol,
                timestamp: timestamp?,
                min,
                max,
                average,
            })
        }))
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn store_stats(&self, stats: &[PriceStats]) -> Result<()> {
        if stats.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO aggregated_prices \
             (pair_name, exchange, timestamp, min_price, max_price, average_price) ",
        );
        builder.push_values(stats, |mut row, stat| {
            row.push_bind(stat.symbol.as_str())
                .push_bind(stat.exchange.as_str())
                .push_bind(stat.timestamp)
                .push_bind(stat.min)
                .push_bind(stat.max)
                .push_bind(stat.average);
        });

        builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Store(format!("Failed to insert {} stats: {}", stats.len(), e)))?;

        Ok(())
    }

    async fn get_highest_stat(
        &self,
        exchange: Exchange,
        symbol: Symbol,
        period: Duration,
    ) -> Result<Option<PriceStats>> {
        self.extremum(exchange, symbol, period, "max_price", true).await
    }

    async fn get_lowest_stat(
        &self,
        exchange: Exchange,
        symbol: Symbol,
        period: Duration,
    ) -> Result<Option<PriceStats>> {
        self.extremum(exchange, symbol, period, "min_price", false).await
    }

    async fn get_average_stat(
        &self,
        exchange: Exchange,
        symbol: Symbol,
        period: Duration,
    ) -> Result<Option<PriceStats>> {
        let since = cutoff(period);

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT MIN(min_price), MAX(max_price), AVG(average_price), MAX(timestamp) \
             FROM aggregated_prices WHERE pair_name = ",
        );
        builder.push_bind(symbol.as_str());
        if !exchange.is_wildcard() {
            builder.push(" AND exchange = ").push_bind(exchange.as_str());
        }
        builder.push(" AND timestamp >= ").push_bind(since);

        let row: (Option<f64>, Option<f64>, Option<f64>, Option<DateTime<Utc>>) = builder
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Store(format!("Failed to get average stat: {}", e)))?;

        Ok(match row {
            (Some(min), Some(max), Some(average), Some(timestamp)) => Some(PriceStats {
                exchange,
                symbol,
                timestamp,
                min,
                max,
                average,
            }),
            _ => None,
        })
    }

    fn name(&self) -> &str {
        "postgres"
    }

    async fn health(&self) -> Result<bool> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| true)
            .map_err(|e| Error::Store(format!("Postgres health check failed: {}", e)))
    }
}
