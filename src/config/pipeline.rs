use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::types::Mode;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub worker_count: usize,
    pub channel_capacity: usize,
    pub start_mode: Mode,
    pub latest_ttl_secs: u64,
    pub collector_shutdown_timeout_ms: u64,
}

impl PipelineConfig {
    pub fn latest_ttl(&self) -> Duration {
        Duration::from_secs(self.latest_ttl_secs)
    }

    pub fn collector_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.collector_shutdown_timeout_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            worker_count: 5,
            channel_capacity: 100,
            start_mode: Mode::Live,
            latest_ttl_secs: 60,
            collector_shutdown_timeout_ms: 5000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub interval_secs: u64,
    pub window_secs: u64,
}

impl AggregatorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        AggregatorConfig {
            interval_secs: 60,
            window_secs: 60,
        }
    }
}
