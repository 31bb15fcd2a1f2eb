use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Once;
use crate::types::Mode;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Ingestion metrics
    pub static ref TICKS_RECEIVED: IntCounterVec = IntCounterVec::new(
        Opts::new("ticks_received_total", "Ticks decoded from exchange sources"),
        &["exchange"]
    ).unwrap();

    pub static ref TICKS_DROPPED: IntCounterVec = IntCounterVec::new(
        Opts::new("ticks_dropped_total", "Ticks rejected by worker pool validation"),
        &["reason"]
    ).unwrap();

    pub static ref TICK_DECODE_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("ticks_decode_errors_total", "Malformed lines skipped by exchange sources"),
        &["exchange"]
    ).unwrap();

    // Persistence metrics
    pub static ref CACHE_WRITE_FAILURES: IntCounter = IntCounter::new(
        "cache_write_failures_total",
        "Failed latest/history writes from the collector"
    ).unwrap();

    pub static ref ROLLUPS_STORED: IntCounter = IntCounter::new(
        "rollups_stored_total",
        "Price stats rows persisted by the aggregator"
    ).unwrap();

    pub static ref ROLLUP_FAILURES: IntCounter = IntCounter::new(
        "rollup_failures_total",
        "Aggregation runs whose batch write failed or timed out"
    ).unwrap();

    // Pipeline state
    pub static ref PIPELINE_MODE: IntGauge = IntGauge::new(
        "pipeline_mode",
        "Current ingestion mode (1 = live, 0 = test)"
    ).unwrap();
}

static REGISTER: Once = Once::new();

pub fn register_metrics() {
    REGISTER.call_once(|| {
        REGISTRY.register(Box::new(TICKS_RECEIVED.clone())).unwrap();
        REGISTRY.register(Box::new(TICKS_DROPPED.clone())).unwrap();
        REGISTRY.register(Box::new(TICK_DECODE_ERRORS.clone())).unwrap();
        REGISTRY.register(Box::new(CACHE_WRITE_FAILURES.clone())).unwrap();
        REGISTRY.register(Box::new(ROLLUPS_STORED.clone())).unwrap();
        REGISTRY.register(Box::new(ROLLUP_FAILURES.clone())).unwrap();
        REGISTRY.register(Box::new(PIPELINE_MODE.clone())).unwrap();
    });
}

pub fn set_mode(mode: Mode) {
    PIPELINE_MODE.set(match mode {
        Mode::Live => 1,
        Mode::Test => 0,
    });
}

/// Renders the registry in the prometheus text exposition format.
pub fn render() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
