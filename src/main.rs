use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use marketflow::api::{create_router, ApiState};
use marketflow::config::AppConfig;
use marketflow::observability;
use marketflow::price_infra::{source_builder, Aggregator, Collector, ExchangeManager, PipelineSettings};
use marketflow::service::MarketService;
use marketflow::storage;
use marketflow::utils::Scheduler;

const SCHEDULER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "marketflow", version, about = "Real-time market price ingestion and query service")]
struct Cli {
    /// HTTP port, overrides `server.port`
    #[arg(long)]
    port: Option<u16>,

    /// Configuration overlay loaded from `config/{env}.toml`
    #[arg(long, default_value = "development")]
    env: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(&cli.env).context("failed to load configuration")?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    observability::tracing::init(&config.logging)?;
    observability::metrics::register_metrics();
    info!(env = %cli.env, mode = %config.pipeline.start_mode, "Starting marketflow");

    let pipeline_token = CancellationToken::new();
    let server_token = CancellationToken::new();

    let (cache, store) = storage::connect(&config.storage)
        .await
        .context("failed to connect storage backends")?;

    let collector = Arc::new(Collector::new(
        cache.clone(),
        config.pipeline.latest_ttl(),
        config.pipeline.collector_shutdown_timeout(),
    ));
    let aggregator = Arc::new(Aggregator::new(
        cache.clone(),
        store.clone(),
        config.aggregator.interval(),
        config.aggregator.window(),
    ));
    let manager = Arc::new(ExchangeManager::new(
        config.pipeline.start_mode,
        source_builder(config.exchanges.clone(), config.pipeline.channel_capacity),
        collector,
        aggregator,
        PipelineSettings::from_config(&config.pipeline, &config.exchanges),
    ));

    manager
        .start(pipeline_token.clone())
        .await
        .context("failed to start exchange pipeline")?;

    let mut scheduler = Scheduler::new(&pipeline_token, SCHEDULER_SHUTDOWN_TIMEOUT);
    let sweep_cache = cache.clone();
    scheduler.add_task("delete_expired_history", config.storage.history_sweep_interval(), move || {
        let cache = sweep_cache.clone();
        async move { cache.delete_expired_history().await }
    });
    scheduler.start();

    let address = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let state = Arc::new(ApiState {
        market: Arc::new(MarketService::new(cache, store)),
        manager: manager.clone(),
        address: address.to_string(),
        health_timeout: config.exchanges.health_timeout(),
    });

    let listener = tokio::net::TcpListener::bind(address)
        .await
        .with_context(|| format!("failed to bind {}", address))?;
    info!(%address, "HTTP server listening");

    let stop_server = server_token.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, create_router(state))
            .with_graceful_shutdown(async move { stop_server.cancelled().await })
            .await
    });

    tokio::select! {
        _ = shutdown_signal() => info!("Shutdown signal received"),
        result = &mut server => {
            error!(?result, "HTTP server exited unexpectedly");
        }
    }

    server_token.cancel();
    if !server.is_finished() {
        match tokio::time::timeout(config.server.shutdown_timeout(), &mut server).await {
            Ok(Ok(Ok(()))) => info!("HTTP server stopped"),
            Ok(Ok(Err(e))) => warn!(error = %e, "HTTP server stopped with error"),
            Ok(Err(e)) => warn!(error = %e, "HTTP server task failed"),
            Err(_) => {
                warn!("HTTP server did not stop in time");
                server.abort();
            }
        }
    }

    if let Err(e) = manager.close().await {
        warn!(error = %e, "Exchange manager closed with error");
    }
    if let Err(e) = scheduler.close().await {
        warn!(error = %e, "Scheduler closed with error");
    }
    pipeline_token.cancel();

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
