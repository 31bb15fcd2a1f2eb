use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use crate::error::{Error, Result};
use crate::interfaces::cache::Cache;
use crate::observability::metrics::CACHE_WRITE_FAILURES;
use crate::types::PriceTick;

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Persists every merged tick as "latest" and into history.
pub struct Collector {
    cache: Arc<dyn Cache>,
    latest_ttl: Duration,
    shutdown_timeout: Duration,
    running: Mutex<Option<Running>>,
}

impl Collector {
    pub fn new(cache: Arc<dyn Cache>, latest_ttl: Duration, shutdown_timeout: Duration) -> Self {
        Collector {
            cache,
            latest_ttl,
            shutdown_timeout,
            running: Mutex::new(None),
        }
    }

    pub async fn start(&self, cancel: &CancellationToken, merged: mpsc::Receiver<PriceTick>) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return Err(Error::AlreadyRunning);
        }

        let token = cancel.child_token();
        let handle = tokio::spawn(collect(
            self.cache.clone(),
            self.latest_ttl,
            merged,
            token.clone(),
        ));
        *running = Some(Running { cancel: token, handle });

        info!(cache = %self.cache.name(), "Collector started");
        Ok(())
    }

    /// Stops the run loop and waits for it, bounded by the shutdown timeout.
    pub async fn cancel(&self) -> Result<()> {
        let Some(Running { cancel, mut handle }) = self.running.lock().await.take() else {
            return Ok(());
        };

        cancel.cancel();
        match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
            Ok(Ok(())) => {
                info!("Collector stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Collector task ended abnormally");
                Ok(())
            }
            Err(_) => {
                handle.abort();
                warn!(timeout = ?self.shutdown_timeout, "Collector did not stop in time");
                Err(Error::ShutdownTimeout { component: "collector" })
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }
}

async fn collect(
    cache: Arc<dyn Cache>,
    latest_ttl: Duration,
    mut merged: mpsc::Receiver<PriceTick>,
    cancel: CancellationToken,
) {
    loop {
        let tick = tokio::select! {
            _ = cancel.cancelled() => break,
            tick = merged.recv() => match tick {
                Some(tick) => tick,
                None => {
                    info!("Merged stream closed");
                    break;
                }
            },
        };

        persist(cache.as_ref(), &tick, latest_ttl).await;
    }

    debug!("Collector loop exited");
}

/// Best-effort: a failed write is logged and the next tick proceeds.
async fn persist(cache: &dyn Cache, tick: &PriceTick, latest_ttl: Duration) {
    if let Err(e) = cache.set_latest(tick, latest_ttl).await {
        CACHE_WRITE_FAILURES.inc();
        warn!(exchange = %tick.exchange, symbol = %tick.symbol, error = %e, "Failed to set latest price");
    }

    if let Err(e) = cache.store_history(tick).await {
        CACHE_WRITE_FAILURES.inc();
        warn!(exchange = %tick.exchange, symbol = %tick.symbol, error = %e, "Failed to store price history");
    }
}
