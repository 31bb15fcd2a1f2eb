use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::types::Exchange;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct LiveExchangeConfig {
    pub exchange: Exchange,
    pub address: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ExchangesConfig {
    pub live: Vec<LiveExchangeConfig>,
    pub connect_timeout_ms: u64,
    pub health_timeout_ms: u64,
    pub synthetic_interval_ms: u64,
}

impl ExchangesConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn synthetic_interval(&self) -> Duration {
        Duration::from_millis(self.synthetic_interval_ms.max(1))
    }
}

impl Default for ExchangesConfig {
    fn default() -> Self {
        ExchangesConfig {
            live: vec![
                LiveExchangeConfig {
                    exchange: Exchange::Exchange1,
                    address: "127.0.0.1:40101".to_string(),
                },
                LiveExchangeConfig {
                    exchange: Exchange::Exchange2,
                    address: "127.0.0.1:40102".to_string(),
                },
                LiveExchangeConfig {
                    exchange: Exchange::Exchange3,
                    address: "127.0.0.1:40103".to_string(),
                },
            ],
            connect_timeout_ms: 5000,
            health_timeout_ms: 2000,
            synthetic_interval_ms: 100,
        }
    }
}
