pub mod connectors;
pub mod worker_pool;
pub mod distributor;
pub mod fan_in;
pub mod collector;
pub mod aggregator;
pub mod manager;

use std::sync::Arc;
use crate::config::{ExchangesConfig, PipelineConfig};
use crate::price_infra::connectors::{ExchangeSource, SyntheticSource, TcpSource};
use crate::price_infra::manager::SourceBuilder;
use crate::types::Mode;

pub use aggregator::Aggregator;
pub use collector::Collector;
pub use manager::{ExchangeManager, PipelineSettings, SourceHealth};
pub use worker_pool::WorkerPool;

impl PipelineSettings {
    pub fn from_config(pipeline: &PipelineConfig, exchanges: &ExchangesConfig) -> Self {
        PipelineSettings {
            worker_count: pipeline.worker_count,
            channel_capacity: pipeline.channel_capacity,
            health_timeout: exchanges.health_timeout(),
        }
    }
}

/// Live mode reads the configured TCP feeds; test mode runs one synthetic
/// generator per test exchange.
pub fn source_builder(exchanges: ExchangesConfig, capacity: usize) -> SourceBuilder {
    Arc::new(move |mode: Mode| match mode {
        Mode::Live => exchanges
            .live
            .iter()
            .map(|feed| {
                Arc::new(TcpSource::new(
                    feed.exchange,
                    feed.address.clone(),
                    exchanges.connect_timeout(),
                    exchanges.health_timeout(),
                    capacity,
                )) as Arc<dyn ExchangeSource>
            })
            .collect(),
        Mode::Test => Mode::Test
            .exchanges()
            .into_iter()
            .map(|exchange| {
                Arc::new(SyntheticSource::new(
                    exchange,
                    exchanges.synthetic_interval(),
                    capacity,
                )) as Arc<dyn ExchangeSource>
            })
            .collect(),
    })
}
