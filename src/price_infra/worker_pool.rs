use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use crate::error::{Error, Result};
use crate::observability::metrics::TICKS_DROPPED;
use crate::observability::tracing::pool_span;
use crate::types::PriceTick;

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<PriceTick>>>;

/// Validates ticks for one source with a fixed number of workers.
///
/// Shutdown runs in one direction only: `close` drops the input sender,
/// workers drain what is buffered and exit, and the output channel closes
/// once the last worker has released its sender.
pub struct WorkerPool {
    name: String,
    worker_count: usize,
    input: Mutex<Option<mpsc::Sender<PriceTick>>>,
    input_weak: mpsc::WeakSender<PriceTick>,
    input_rx: Mutex<Option<mpsc::Receiver<PriceTick>>>,
    output_tx: Mutex<Option<mpsc::Sender<PriceTick>>>,
    output_rx: Mutex<Option<mpsc::Receiver<PriceTick>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, worker_count: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (input_tx, input_rx) = mpsc::channel(capacity);
        let (output_tx, output_rx) = mpsc::channel(capacity);

        WorkerPool {
            name: name.into(),
            worker_count: worker_count.max(1),
            input_weak: input_tx.downgrade(),
            input: Mutex::new(Some(input_tx)),
            input_rx: Mutex::new(Some(input_rx)),
            output_tx: Mutex::new(Some(output_tx)),
            output_rx: Mutex::new(Some(output_rx)),
            supervisor: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Launches the workers. A pool can only be started once.
    pub fn start(&self, cancel: &CancellationToken) -> Result<()> {
        let input_rx = take(&self.input_rx).ok_or(Error::AlreadyRunning)?;
        let output_tx = take(&self.output_tx).ok_or(Error::AlreadyRunning)?;
        let shared: SharedReceiver = Arc::new(tokio::sync::Mutex::new(input_rx));

        let workers: Vec<JoinHandle<()>> = (0..self.worker_count)
            .map(|id| {
                let worker = run_worker(id, shared.clone(), output_tx.clone(), cancel.clone())
                    .instrument(pool_span(&self.name));
                tokio::spawn(worker)
            })
            .collect();
        // Workers now hold the only output senders.
        drop(output_tx);

        let name = self.name.clone();
        let supervisor = tokio::spawn(async move {
            for handle in futures_util::future::join_all(workers).await {
                if let Err(e) = handle {
                    error!(pool = %name, error = %e, "Worker terminated abnormally");
                }
            }
            debug!(pool = %name, "All workers exited, output closed");
        });

        if let Ok(mut slot) = self.supervisor.lock() {
            *slot = Some(supervisor);
        }

        info!(pool = %self.name, workers = self.worker_count, "Worker pool started");
        Ok(())
    }

    /// Handle for feeding the pool. Sending fails once the pool is closed.
    pub fn input(&self) -> mpsc::WeakSender<PriceTick> {
        self.input_weak.clone()
    }

    /// The validated stream. Can be taken once.
    pub fn output(&self) -> Option<mpsc::Receiver<PriceTick>> {
        take(&self.output_rx)
    }

    /// Closes the input. Safe to call any number of times.
    pub fn close(&self) {
        if take(&self.input).is_some() {
            debug!(pool = %self.name, "Worker pool input closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.input_weak.upgrade().is_none()
    }

    /// Waits for every worker to exit.
    pub async fn wait(&self) {
        let supervisor = take(&self.supervisor);
        if let Some(handle) = supervisor {
            if let Err(e) = handle.await {
                warn!(pool = %self.name, error = %e, "Worker pool supervisor failed");
            }
        }
    }
}

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock().ok().and_then(|mut guard| guard.take())
}

async fn run_worker(
    id: usize,
    input: SharedReceiver,
    output: mpsc::Sender<PriceTick>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => None,
            tick = async { input.lock().await.recv().await } => tick,
        };

        let Some(tick) = next else {
            break;
        };

        if let Err(reason) = tick.validate() {
            TICKS_DROPPED.with_label_values(&[reason.reason()]).inc();
            warn!(worker = id, tick = %tick, reason = %reason, "Dropping invalid tick");
            continue;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = output.send(tick) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    debug!(worker = id, "Worker exited");
}
