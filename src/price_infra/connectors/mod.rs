pub mod synthetic;
pub mod tcp;

use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use crate::error::Result;
use crate::types::{Exchange, PriceTick};

pub use synthetic::SyntheticSource;
pub use tcp::TcpSource;

/// A producer of price ticks for one exchange identity.
///
/// `start` hands back the receiving end of a bounded channel. The channel
/// closes when the transport ends, when `close` is called, or when the
/// token passed to `start` is cancelled. Sources are shared behind `Arc`,
/// so lifecycle calls take `&self`.
#[async_trait]
pub trait ExchangeSource: Send + Sync {
    fn name(&self) -> &str;

    fn exchange(&self) -> Exchange;

    async fn start(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<PriceTick>>;

    async fn close(&self) -> Result<()>;

    /// Side probe of the transport, independent of any running stream.
    async fn health(&self) -> Result<bool>;
}

/// Slot holding the reader of a started source, if any.
#[derive(Default)]
pub(crate) struct TaskSlot(Mutex<Option<StreamTask>>);

impl TaskSlot {
    pub(crate) fn is_active(&self) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub(crate) fn set(&self, task: StreamTask) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    pub(crate) fn take(&self) -> Option<StreamTask> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Background reader owned by a started source.
pub(crate) struct StreamTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl StreamTask {
    pub(crate) fn new(cancel: CancellationToken, handle: JoinHandle<()>) -> Self {
        StreamTask { cancel, handle }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels the reader and waits for it to release the transport.
    pub(crate) async fn stop(self, source: &str) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(source = %source, error = %e, "Source task ended abnormally");
        }
    }
}
