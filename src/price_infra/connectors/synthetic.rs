use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Instrument};
use crate::error::{Error, Result};
use crate::observability::metrics::TICKS_RECEIVED;
use crate::observability::tracing::source_span;
use crate::price_infra::connectors::{ExchangeSource, StreamTask, TaskSlot};
use crate::types::{Exchange, PriceTick, Symbol};

/// Maximum relative deviation from the baseline price.
pub const JITTER: f64 = 0.15;

/// Generates one tick per symbol on every interval, jittered around each
/// symbol's baseline price. Restartable.
pub struct SyntheticSource {
    exchange: Exchange,
    interval: Duration,
    capacity: usize,
    task: TaskSlot,
}

impl SyntheticSource {
    pub fn new(exchange: Exchange, interval: Duration, capacity: usize) -> Self {
        SyntheticSource {
            exchange,
            interval: interval.max(Duration::from_millis(1)),
            capacity: capacity.max(1),
            task: TaskSlot::default(),
        }
    }
}

/// Baseline perturbed uniformly within `±JITTER`.
pub fn synthetic_price(symbol: Symbol) -> f64 {
    let offset = (rand::random::<f64>() * 2.0 - 1.0) * JITTER;
    symbol.baseline_price() * (1.0 + offset)
}

#[async_trait]
impl ExchangeSource for SyntheticSource {
    fn name(&self) -> &str {
        self.exchange.as_str()
    }

    fn exchange(&self) -> Exchange {
        self.exchange
    }

    async fn start(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<PriceTick>> {
        if self.task.is_active() {
            return Err(Error::AlreadyRunning);
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        let token = cancel.child_token();
        let generator = generate(self.exchange, self.interval, tx, token.clone())
            .instrument(source_span(self.exchange.as_str()));
        self.task.set(StreamTask::new(token, tokio::spawn(generator)));

        info!(exchange = %self.exchange, interval = ?self.interval, "Started synthetic feed");
        Ok(rx)
    }

    async fn close(&self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.stop(self.exchange.as_str()).await;
            info!(exchange = %self.exchange, "Stopped synthetic feed");
        }
        Ok(())
    }

    async fn health(&self) -> Result<bool> {
        Ok(true)
    }
}

async fn generate(
    exchange: Exchange,
    period: Duration,
    tx: mpsc::Sender<PriceTick>,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let now = Utc::now();
        for symbol in Symbol::ALL {
            let tick = PriceTick::new(exchange, symbol, synthetic_price(symbol), now);
            TICKS_RECEIVED.with_label_values(&[exchange.as_str()]).inc();

            tokio::select! {
                _ = cancel.cancelled() => return,
                sent = tx.send(tick) => {
                    if sent.is_err() {
                        debug!("Tick receiver dropped");
                        return;
                    }
                }
            }
        }
    }
}
