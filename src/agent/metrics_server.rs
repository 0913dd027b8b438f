// src/agent/metrics_server.rs

//! Serves the text-format metrics surface: `GET /metrics` and `GET /health`.
//! Responses are always a live snapshot of shared state at request time.

use crate::config::Config;
use crate::core::metrics;
use crate::core::state::{AgentState, Phase, WorkerKind};
use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

pub struct MetricsServer {
    config: Arc<Config>,
    state: Arc<AgentState>,
}

/// Handles HTTP requests to the /metrics endpoint.
///
/// Gauges are refreshed from the shared state before gathering; snapshot
/// construction reads each key individually and takes no lock.
async fn metrics_handler(state: Arc<AgentState>) -> impl IntoResponse {
    refresh_gauges(&state);
    let body = metrics::gather_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

fn refresh_gauges(state: &AgentState) {
    metrics::CPU_USAGE_PERCENT.set(state.cpu_percent());
    metrics::RAM_USAGE_PERCENT.set(state.ram_percent());
    metrics::THROTTLE_LEVEL.set(state.throttle_level() as f64);
    metrics::DNS_STATUS.set(bool_gauge(state.dns_ok()));
    metrics::TLS_STATUS.set(bool_gauge(state.tls_ok()));
    metrics::OPENSEARCH_STATUS.set(bool_gauge(state.cluster_ok()));
    metrics::CLUSTER_LATENCY_MS.set(state.cluster_last_latency_ms());
    metrics::PIPELINE_OK.set(bool_gauge(state.pipeline_ok()));
    metrics::PHASE.set(state.phase() as u8 as f64);
    metrics::UPTIME_SECONDS.set(state.uptime().as_secs_f64());
    for kind in WorkerKind::ALL {
        metrics::WORKER_ALIVE
            .with_label_values(&[kind.name()])
            .set(bool_gauge(state.worker_alive(kind)));
    }
}

fn bool_gauge(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

/// Handles HTTP requests to the /health endpoint: `200 ok` iff the pipeline
/// is verified, otherwise 503 with a one-line reason.
async fn health_handler(state: Arc<AgentState>) -> impl IntoResponse {
    let (ok, reason) = health_snapshot(&state);
    if ok {
        (StatusCode::OK, reason)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, reason)
    }
}

/// Computes the health verdict and its reason from shared state.
pub fn health_snapshot(state: &AgentState) -> (bool, String) {
    if state.pipeline_ok() {
        return (true, "ok".to_string());
    }
    let phase = state.phase();
    if phase != Phase::Steady {
        return (false, format!("phase={}", phase.as_str()));
    }
    for (name, ok) in [
        ("dns", state.dns_ok()),
        ("tls", state.tls_ok()),
        ("cluster", state.cluster_ok()),
    ] {
        if !ok {
            return (false, format!("{name} probe failing"));
        }
    }
    (false, "pipeline not verified".to_string())
}

impl MetricsServer {
    pub fn new(config: Arc<Config>, state: Arc<AgentState>) -> Self {
        Self { config, state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let addr: SocketAddr = match format!(
            "{}:{}",
            self.config.workers.metrics_host, self.config.workers.metrics_port
        )
        .parse()
        {
            Ok(addr) => addr,
            Err(e) => {
                error!("Invalid metrics bind address: {e}");
                return;
            }
        };

        let metrics_state = self.state.clone();
        let health_state = self.state.clone();
        let app = Router::new()
            .route("/metrics", get(move || metrics_handler(metrics_state.clone())))
            .route("/health", get(move || health_handler(health_state.clone())));

        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind metrics endpoint on {addr}: {e}");
                return;
            }
        };
        info!("Metrics endpoint listening on http://{addr}/metrics");

        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_rx.recv().await.ok();
                info!("Metrics endpoint shutting down.");
            })
            .into_future();
        tokio::pin!(serve);

        // Serving is driven alongside a liveness heartbeat so the supervisor
        // can tell a healthy idle server from a wedged one.
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            tokio::select! {
                res = &mut serve => {
                    if let Err(e) = res {
                        error!("Metrics endpoint terminated: {e}");
                    }
                    return;
                }
                _ = heartbeat.tick() => {
                    self.state.touch_heartbeat(WorkerKind::Metrics);
                }
            }
        }
    }
}
