use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use crate::price_infra::worker_pool::WorkerPool;
use crate::types::PriceTick;

/// Moves ticks from one source into its worker pool.
pub struct Distributor {
    source: mpsc::Receiver<PriceTick>,
    pool: Arc<WorkerPool>,
}

impl Distributor {
    pub fn new(source: mpsc::Receiver<PriceTick>, pool: Arc<WorkerPool>) -> Self {
        Distributor { source, pool }
    }

    /// Runs until the source ends, the pool closes, or `cancel` fires.
    /// The pool is closed on the way out in every case.
    pub fn fan_out(self, cancel: CancellationToken) -> JoinHandle<()> {
        let Distributor { mut source, pool } = self;

        tokio::spawn(async move {
            let input = pool.input();

            loop {
                let tick = tokio::select! {
                    _ = cancel.cancelled() => break,
                    tick = source.recv() => match tick {
                        Some(tick) => tick,
                        None => break,
                    },
                };

                let Some(sender) = input.upgrade() else {
                    break;
                };

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = sender.send(tick) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }

            debug!(pool = %pool.name(), "Distributor stopped");
            pool.close();
        })
    }
}
