//! Prometheus Metrics for otl-edge
//!
//! - Strategy outcomes (where each answer came from)
//! - Pass-through requests
//! - Partition writes
//! - Worker lifecycle (installs, activations, purged partitions)

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, TextEncoder, register_histogram_vec,
    register_int_counter, register_int_counter_vec,
};

lazy_static! {
    /// Answers by strategy and source (cache, network, fallback_cache, offline)
    pub static ref STRATEGY_OUTCOMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "otl_edge_strategy_outcomes_total",
        "Strategy answers by strategy and source",
        &["strategy", "outcome"]
    ).unwrap();

    /// Strategy latency in seconds
    pub static ref STRATEGY_DURATION: HistogramVec = register_histogram_vec!(
        "otl_edge_strategy_duration_seconds",
        "Strategy latency in seconds",
        &["strategy"],
        vec![0.0001, 0.001, 0.01, 0.1, 1.0, 10.0]
    ).unwrap();

    /// Requests the router did not intercept
    pub static ref PASSTHROUGH_TOTAL: IntCounter = register_int_counter!(
        "otl_edge_passthrough_total",
        "Requests forwarded without caching"
    ).unwrap();

    /// Partition writes by status
    pub static ref CACHE_WRITES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "otl_edge_cache_writes_total",
        "Partition writes by status",
        &["status"]
    ).unwrap();

    /// Worker lifecycle transitions
    pub static ref WORKER_LIFECYCLE_TOTAL: IntCounterVec = register_int_counter_vec!(
        "otl_edge_worker_lifecycle_total",
        "Worker install/activate attempts by result",
        &["phase", "status"]
    ).unwrap();

    /// Stale partitions purged on activation
    pub static ref PARTITIONS_PURGED_TOTAL: IntCounter = register_int_counter!(
        "otl_edge_partitions_purged_total",
        "Stale partitions deleted during activation"
    ).unwrap();
}

/// Force registration so every metric shows up before first use
pub fn init_metrics() {
    let _ = &*STRATEGY_OUTCOMES_TOTAL;
    let _ = &*STRATEGY_DURATION;
    let _ = &*PASSTHROUGH_TOTAL;
    let _ = &*CACHE_WRITES_TOTAL;
    let _ = &*WORKER_LIFECYCLE_TOTAL;
    let _ = &*PARTITIONS_PURGED_TOTAL;

    tracing::info!("Prometheus metrics initialized");
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record where a strategy's answer came from
pub fn record_strategy_outcome(strategy: &str, outcome: &str, duration_secs: f64) {
    STRATEGY_OUTCOMES_TOTAL
        .with_label_values(&[strategy, outcome])
        .inc();
    STRATEGY_DURATION
        .with_label_values(&[strategy])
        .observe(duration_secs);
}

/// Record a partition write
pub fn record_cache_write(ok: bool) {
    let status = if ok { "ok" } else { "error" };
    CACHE_WRITES_TOTAL.with_label_values(&[status]).inc();
}

/// Record a lifecycle phase result
pub fn record_lifecycle(phase: &str, ok: bool) {
    let status = if ok { "ok" } else { "error" };
    WORKER_LIFECYCLE_TOTAL
        .with_label_values(&[phase, status])
        .inc();
}
