#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use marketflow::config::{ExchangesConfig, LiveExchangeConfig};
use marketflow::price_infra::{source_builder, Aggregator, Collector, ExchangeManager, PipelineSettings};
use marketflow::service::MarketService;
use marketflow::storage::memory::{MemoryCache, MemoryStore};
use marketflow::types::{Exchange, Mode};

/// Local stand-in for an exchange feed. Lines go to the most recently
/// accepted connection and are held until the first one arrives.
pub struct FeedServer {
    pub address: String,
    lines: Option<mpsc::UnboundedSender<String>>,
}

impl FeedServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let mut current: Option<TcpStream> = None;
            let mut pending: Vec<String> = Vec::new();
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        if let Ok((mut socket, _)) = accepted {
                            for line in pending.drain(..) {
                                let _ = socket.write_all(format!("{}\n", line).as_bytes()).await;
                            }
                            current = Some(socket);
                        }
                    }
                    line = rx.recv() => match (line, current.as_mut()) {
                        (Some(line), Some(socket)) => {
                            let _ = socket.write_all(format!("{}\n", line).as_bytes()).await;
                        }
                        (Some(line), None) => pending.push(line),
                        (None, _) => break,
                    },
                }
            }
        });

        FeedServer { address, lines: Some(tx) }
    }

    /// An address nothing listens on.
    pub async fn closed() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);
        FeedServer { address, lines: None }
    }

    pub fn send(&self, line: impl Into<String>) {
        if let Some(lines) = &self.lines {
            lines.send(line.into()).unwrap();
        }
    }

    /// Hangs up the current connection and stops accepting new ones.
    pub fn disconnect(&mut self) {
        self.lines = None;
    }
}

pub fn tick_line(symbol: &str, price: f64, timestamp_ms: i64) -> String {
    format!(
        r#"{{"symbol":"{}","price":{},"timestamp":{},"exchange":"spoofed"}}"#,
        symbol, price, timestamp_ms
    )
}

pub struct Harness {
    pub cache: Arc<MemoryCache>,
    pub store: Arc<MemoryStore>,
    pub manager: Arc<ExchangeManager>,
    pub market: Arc<MarketService>,
}

/// Full pipeline over memory storage, live sources pointed at `feeds`.
pub fn harness(mode: Mode, feeds: &[&FeedServer], aggregate_every: Duration) -> Harness {
    let exchanges = ExchangesConfig {
        live: feeds
            .iter()
            .zip(Exchange::LIVE)
            .map(|(feed, exchange)| LiveExchangeConfig {
                exchange,
                address: feed.address.clone(),
            })
            .collect(),
        connect_timeout_ms: 1000,
        health_timeout_ms: 500,
        synthetic_interval_ms: 10,
    };

    let cache = Arc::new(MemoryCache::new(Duration::from_secs(300)));
    let store = Arc::new(MemoryStore::new());
    let collector = Arc::new(Collector::new(cache.clone(), Duration::from_secs(60), Duration::from_secs(2)));
    let aggregator = Arc::new(Aggregator::new(
        cache.clone(),
        store.clone(),
        aggregate_every,
        Duration::from_secs(60),
    ));

    let settings = PipelineSettings {
        worker_count: 1,
        channel_capacity: 16,
        health_timeout: Duration::from_millis(500),
    };
    let manager = Arc::new(ExchangeManager::new(
        mode,
        source_builder(exchanges, settings.channel_capacity),
        collector,
        aggregator,
        settings,
    ));
    let market = Arc::new(MarketService::new(cache.clone(), store.clone()));

    Harness { cache, store, manager, market }
}

/// Polls `check` until it returns true or the deadline passes.
pub async fn eventually<F, Fut>(deadline: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(deadline, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met before deadline");
}
