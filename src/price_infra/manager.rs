use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use crate::error::{Error, Result};
use crate::observability::metrics;
use crate::price_infra::aggregator::Aggregator;
use crate::price_infra::collector::Collector;
use crate::price_infra::connectors::ExchangeSource;
use crate::price_infra::distributor::Distributor;
use crate::price_infra::fan_in::fan_in;
use crate::price_infra::worker_pool::WorkerPool;
use crate::types::Mode;

/// Builds the source set for a mode. Called at construction and on every
/// mode switch, so each pipeline gets fresh sources.
pub type SourceBuilder = Arc<dyn Fn(Mode) -> Vec<Arc<dyn ExchangeSource>> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub worker_count: usize,
    pub channel_capacity: usize,
    pub health_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            worker_count: 5,
            channel_capacity: 100,
            health_timeout: Duration::from_secs(2),
        }
    }
}

/// Health of one source as reported by its probe.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceHealth {
    pub name: String,
    pub healthy: bool,
}

struct Pipeline {
    token: CancellationToken,
    pools: Vec<Arc<WorkerPool>>,
    aggregator: JoinHandle<()>,
}

struct ManagerState {
    pipeline: Option<Pipeline>,
    /// Token handed to the last `start`, kept until `close`. Switches restart
    /// under it even when the previous attempt failed.
    parent: Option<CancellationToken>,
}

/// Owns the running pipeline and the live/test mode.
///
/// Every lifecycle call takes the state lock, so starts, closes and mode
/// switches never interleave and at most one pipeline exists. The current
/// source set is only replaced under that lock, but readers such as health
/// probes take a snapshot of it without waiting on lifecycle work.
pub struct ExchangeManager {
    builder: SourceBuilder,
    collector: Arc<Collector>,
    aggregator: Arc<Aggregator>,
    settings: PipelineSettings,
    is_live: AtomicBool,
    sources: RwLock<Vec<Arc<dyn ExchangeSource>>>,
    state: Mutex<ManagerState>,
}

impl ExchangeManager {
    pub fn new(
        mode: Mode,
        builder: SourceBuilder,
        collector: Arc<Collector>,
        aggregator: Arc<Aggregator>,
        settings: PipelineSettings,
    ) -> Self {
        let sources = builder(mode);
        metrics::set_mode(mode);

        ExchangeManager {
            builder,
            collector,
            aggregator,
            settings,
            is_live: AtomicBool::new(mode == Mode::Live),
            sources: RwLock::new(sources),
            state: Mutex::new(ManagerState {
                pipeline: None,
                parent: None,
            }),
        }
    }

    pub fn mode(&self) -> Mode {
        if self.is_live.load(Ordering::SeqCst) {
            Mode::Live
        } else {
            Mode::Test
        }
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.pipeline.is_some()
    }

    pub async fn source_names(&self) -> Vec<String> {
        self.current_sources()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    fn current_sources(&self) -> Vec<Arc<dyn ExchangeSource>> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_sources(&self, sources: Vec<Arc<dyn ExchangeSource>>) {
        *self.sources.write().unwrap_or_else(PoisonError::into_inner) = sources;
    }

    /// Starts every source and wires source → distributor → pool → fan-in →
    /// collector, then the aggregator. Any source failure aborts the whole
    /// start and leaves nothing running.
    pub async fn start(&self, parent: CancellationToken) -> Result<()> {
        let mut state = self.state.lock().await;
        self.start_locked(&mut state, parent).await
    }

    /// Stops the pipeline. The collector timeout, if any, is reported after
    /// the remaining cleanup has run.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.parent = None;
        self.close_locked(&mut state).await
    }

    pub async fn switch_to_test(&self) -> Result<()> {
        self.switch(Mode::Test).await
    }

    pub async fn switch_to_live(&self) -> Result<()> {
        self.switch(Mode::Live).await
    }

    /// Probes every current source, each bounded by the health timeout.
    /// Does not wait for an in-flight start, close or switch.
    pub async fn source_health(&self) -> Vec<SourceHealth> {
        let sources = self.current_sources();
        let limit = self.settings.health_timeout;

        let probes = sources.iter().map(move |source| async move {
            let healthy = match tokio::time::timeout(limit, source.health()).await {
                Ok(Ok(healthy)) => healthy,
                Ok(Err(e)) => {
                    warn!(source = %source.name(), error = %e, "Source health check failed");
                    false
                }
                Err(_) => {
                    warn!(source = %source.name(), "Source health check timed out");
                    false
                }
            };
            SourceHealth {
                name: source.name().to_string(),
                healthy,
            }
        });

        futures_util::future::join_all(probes).await
    }

    async fn switch(&self, target: Mode) -> Result<()> {
        let mut state = self.state.lock().await;

        if self.mode() == target {
            return Err(match target {
                Mode::Test => Error::AlreadyOnTestMode,
                Mode::Live => Error::AlreadyOnLiveMode,
            });
        }

        if let Err(e) = self.close_locked(&mut state).await {
            warn!(error = %e, "Previous pipeline did not close cleanly");
        }

        self.replace_sources((self.builder)(target));
        self.is_live.store(target == Mode::Live, Ordering::SeqCst);
        metrics::set_mode(target);
        info!(mode = %target, "Switched mode");

        // A failed start keeps the parent, so switching away from a broken
        // mode brings the pipeline back.
        match state.parent.clone() {
            Some(parent) if !parent.is_cancelled() => self.start_locked(&mut state, parent).await,
            _ => Ok(()),
        }
    }

    async fn start_locked(&self, state: &mut ManagerState, parent: CancellationToken) -> Result<()> {
        if state.pipeline.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let token = parent.child_token();
        state.parent = Some(parent);

        let sources = self.current_sources();
        let mut streams = Vec::with_capacity(sources.len());

        for (index, source) in sources.iter().enumerate() {
            match source.start(token.clone()).await {
                Ok(stream) => streams.push((source.name().to_string(), stream)),
                Err(e) => {
                    warn!(source = %source.name(), error = %e, "Source failed to start, aborting");
                    token.cancel();
                    for source in &sources[..index] {
                        if let Err(close_err) = source.close().await {
                            warn!(source = %source.name(), error = %close_err, "Failed to close source");
                        }
                    }
                    return Err(e);
                }
            }
        }

        let mut pools = Vec::with_capacity(streams.len());
        let mut outputs = Vec::with_capacity(streams.len());

        for (name, stream) in streams {
            let pool = Arc::new(WorkerPool::new(
                name,
                self.settings.worker_count,
                self.settings.channel_capacity,
            ));
            if let Some(output) = pool.output() {
                outputs.push(output);
            }
            pool.start(&token)?;
            Distributor::new(stream, pool.clone()).fan_out(token.clone());
            pools.push(pool);
        }

        let merged = fan_in(&token, outputs, self.settings.channel_capacity);
        if let Err(e) = self.collector.start(&token, merged).await {
            token.cancel();
            return Err(e);
        }

        let aggregator = self.aggregator.start(token.clone());

        info!(
            mode = %self.mode(),
            sources = pools.len(),
            workers = self.settings.worker_count,
            "Pipeline started"
        );

        state.pipeline = Some(Pipeline { token, pools, aggregator });
        Ok(())
    }

    async fn close_locked(&self, state: &mut ManagerState) -> Result<()> {
        let Some(pipeline) = state.pipeline.take() else {
            return Ok(());
        };

        for source in self.current_sources() {
            if let Err(e) = source.close().await {
                warn!(source = %source.name(), error = %e, "Failed to close source");
            }
        }

        let collector_result = self.collector.cancel().await;

        for pool in &pipeline.pools {
            pool.close();
        }

        pipeline.token.cancel();
        for pool in &pipeline.pools {
            pool.wait().await;
        }
        if let Err(e) = pipeline.aggregator.await {
            warn!(error = %e, "Aggregator task ended abnormally");
        }

        info!(mode = %self.mode(), "Pipeline closed");
        collector_result
    }
}
