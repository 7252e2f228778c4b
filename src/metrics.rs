//! Prometheus instrumentation: metrics are process-global statics
//! registered once, read by the `/metrics` HTTP handler in [`crate::health`].

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Opts, Registry, TextEncoder,
};

const LATENCY_BUCKETS_MS: &[f64] = &[
    5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0,
];

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref BLOCKS_INDEXED_TOTAL: IntCounter = register_counter(
        "evm_sync_blocks_indexed_total",
        "Total blocks committed to the database",
    );

    pub static ref TRANSFERS_INDEXED_TOTAL: IntCounter = register_counter(
        "evm_sync_transfers_indexed_total",
        "Total ERC-20 Transfer events committed to the database",
    );

    pub static ref SYNC_LAG_BLOCKS: IntGaugeVec = register_gauge_vec(
        "evm_sync_lag_blocks",
        "head - (nextBlock - 1), observed sync lag in blocks",
        &["chain_id"],
    );

    pub static ref RPC_CALLS_TOTAL: IntCounterVec = register_counter_vec(
        "evm_sync_rpc_calls_total",
        "RPC calls by endpoint and outcome",
        &["endpoint", "outcome"],
    );

    pub static ref RPC_LATENCY_MS: HistogramVec = register_histogram_vec(
        "evm_sync_rpc_latency_ms",
        "RPC call latency in milliseconds by endpoint",
        &["endpoint"],
    );

    pub static ref RPC_ALL_ENDPOINTS_FAILED: IntCounter = register_counter(
        "evm_sync_rpc_all_endpoints_failed_total",
        "Count of requests that exhausted every configured RPC endpoint",
    );

    pub static ref REORGS_TOTAL: IntCounterVec = register_counter_vec(
        "evm_sync_reorgs_total",
        "Total detected chain reorganizations",
        &["chain_id"],
    );

    pub static ref REORG_DEPTH: Histogram = register_histogram(
        "evm_sync_reorg_depth",
        "Depth (in blocks) of handled reorganizations",
        &[1.0, 2.0, 3.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0],
    );

    pub static ref BATCH_DURATION_MS: Histogram = register_histogram(
        "evm_sync_batch_duration_ms",
        "Wall-clock duration of a single syncBatch invocation",
        LATENCY_BUCKETS_MS,
    );

    pub static ref DB_WRITE_LATENCY_MS: Histogram = register_histogram(
        "evm_sync_db_write_latency_ms",
        "Latency of the atomic block+transfer write transaction",
        LATENCY_BUCKETS_MS,
    );

    pub static ref SYNC_GAPS_OPEN: IntGaugeVec = register_gauge_vec(
        "evm_sync_gaps_open",
        "Number of non-filled sync gaps by chain",
        &["chain_id"],
    );
}

fn register_counter(name: &str, help: &str) -> IntCounter {
    let c = IntCounter::new(name, help).unwrap();
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
}

fn register_counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let c = IntCounterVec::new(Opts::new(name, help), labels).unwrap();
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
}

fn register_gauge_vec(name: &str, help: &str, labels: &[&str]) -> IntGaugeVec {
    let g = IntGaugeVec::new(Opts::new(name, help), labels).unwrap();
    REGISTRY.register(Box::new(g.clone())).unwrap();
    g
}

#[allow(dead_code)]
fn register_gauge(name: &str, help: &str) -> IntGauge {
    let g = IntGauge::new(name, help).unwrap();
    REGISTRY.register(Box::new(g.clone())).unwrap();
    g
}

fn register_histogram(name: &str, help: &str, buckets: &[f64]) -> Histogram {
    let h = Histogram::with_opts(HistogramOpts::new(name, help).buckets(buckets.to_vec())).unwrap();
    REGISTRY.register(Box::new(h.clone())).unwrap();
    h
}

fn register_histogram_vec(name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    let h = HistogramVec::new(
        HistogramOpts::new(name, help).buckets(LATENCY_BUCKETS_MS.to_vec()),
        labels,
    )
    .unwrap();
    REGISTRY.register(Box::new(h.clone())).unwrap();
    h
}

/// Renders the registry in Prometheus text exposition format.
pub fn encode() -> String {
    let metric_families = REGISTRY.gather();
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder.encode(&metric_families, &mut buf).expect("prometheus encoding never fails on valid metrics");
    String::from_utf8(buf).expect("prometheus text encoder emits valid utf8")
}
