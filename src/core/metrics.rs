// src/core/metrics.rs

//! Defines and registers Prometheus metrics for the agent.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only
//! once globally for the entire process lifecycle. Gauges are refreshed from
//! the shared state at scrape time; counters are incremented at event sites.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_gauge_vec,
};

lazy_static! {
    // --- Resource gauges ---
    /// Host-wide CPU utilization as sampled by the resource monitor.
    pub static ref CPU_USAGE_PERCENT: Gauge =
        register_gauge!("ids2_cpu_usage_percent", "Host CPU utilization percentage.").unwrap();
    /// Host-wide RAM utilization as sampled by the resource monitor.
    pub static ref RAM_USAGE_PERCENT: Gauge =
        register_gauge!("ids2_ram_usage_percent", "Host RAM utilization percentage.").unwrap();
    /// The advisory throttle level derived from max(cpu, ram).
    pub static ref THROTTLE_LEVEL: Gauge =
        register_gauge!("ids2_throttle_level", "Advisory throttle level (0 to 3).").unwrap();

    // --- Reachability gauges ---
    pub static ref DNS_STATUS: Gauge =
        register_gauge!("ids2_dns_status", "Result of the last DNS probe (1 ok, 0 failing).").unwrap();
    pub static ref TLS_STATUS: Gauge =
        register_gauge!("ids2_tls_status", "Result of the last TLS handshake probe (1 ok, 0 failing).").unwrap();
    pub static ref OPENSEARCH_STATUS: Gauge =
        register_gauge!("ids2_opensearch_status", "Result of the last cluster bulk ping (1 ok, 0 failing).").unwrap();
    pub static ref CLUSTER_LATENCY_MS: Gauge =
        register_gauge!("ids2_cluster_last_latency_ms", "Latency of the last successful cluster bulk ping in milliseconds.").unwrap();

    // --- Pipeline gauges ---
    pub static ref PIPELINE_OK: Gauge =
        register_gauge!("ids2_pipeline_ok", "Whether the pipeline is verified end to end (1 ok, 0 not).").unwrap();
    pub static ref PHASE: Gauge =
        register_gauge!("ids2_phase", "Current lifecycle phase as an ordinal (0=A .. 7=STEADY, 8=DRAINING, 9=STOPPED).").unwrap();
    pub static ref UPTIME_SECONDS: Gauge =
        register_gauge!("ids2_uptime_seconds", "Seconds since the agent process started.").unwrap();

    // --- Worker gauges and counters ---
    pub static ref WORKER_ALIVE: GaugeVec =
        register_gauge_vec!("ids2_worker_alive", "Whether the named worker is alive (1) or down (0).", &["name"]).unwrap();
    pub static ref WORKER_RESTARTS_TOTAL: CounterVec =
        register_counter_vec!("ids2_worker_restarts_total", "Total restarts of the named worker.", &["name"]).unwrap();

    // --- Event counters ---
    pub static ref COALESCED_CYCLES_TOTAL: Counter =
        register_counter!("ids2_coalesced_cycles_total", "Probe cycles skipped because the previous cycle was still running.").unwrap();
    pub static ref SAMPLE_ERRORS_TOTAL: Counter =
        register_counter!("ids2_sample_errors_total", "Resource sampling failures (previous values retained).").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
