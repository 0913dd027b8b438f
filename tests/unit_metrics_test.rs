use ids2_agent::agent::metrics_server::{MetricsServer, health_snapshot};
use ids2_agent::config::Config;
use ids2_agent::core::metrics;
use ids2_agent::core::state::{AgentState, Phase, WorkerKind};
use std::sync::Arc;
use std::time::Duration;

fn config_with_metrics_port(port: u16) -> Config {
    let toml_str = format!(
        r#"
[host]
interface = "eth0"
host_ip = "10.0.0.2"

[cluster]
credential_profile = "ids2"
region = "eu-west-3"
domain = "search.example.com"

[workers]
metrics_host = "127.0.0.1"
metrics_port = {port}

[paths]
compose_file = "/opt/ids2/docker-compose.yml"
sniffer_template = "/opt/ids2/templates/sniffer.yaml.tmpl"
shipper_template = "/opt/ids2/templates/shipper.conf.tmpl"
sniffer_config = "/opt/ids2/rendered/sniffer.yaml"
shipper_config = "/opt/ids2/rendered/shipper.conf"
ram_log = "/mnt/ramlog/events.ndjson"
buffer_path = "/var/lib/ids2/buffer"
"#
    );
    toml::from_str(&toml_str).unwrap()
}

#[test]
fn test_health_reason_names_phase_before_steady() {
    let state = AgentState::new();
    let (ok, reason) = health_snapshot(&state);
    assert!(!ok);
    assert_eq!(reason, "phase=A");

    state.set_phase(Phase::Draining);
    let (ok, reason) = health_snapshot(&state);
    assert!(!ok);
    assert_eq!(reason, "phase=DRAINING");
}

#[test]
fn test_health_reason_names_first_failing_probe() {
    let state = AgentState::new();
    state.set_phase(Phase::Steady);

    let (ok, reason) = health_snapshot(&state);
    assert!(!ok);
    assert_eq!(reason, "dns probe failing");

    state.set_dns_ok(true);
    let (_, reason) = health_snapshot(&state);
    assert_eq!(reason, "tls probe failing");

    state.set_tls_ok(true);
    let (_, reason) = health_snapshot(&state);
    assert_eq!(reason, "cluster probe failing");
}

#[test]
fn test_health_ok_iff_pipeline_ok() {
    let state = AgentState::new();
    state.set_phase(Phase::Steady);
    state.set_dns_ok(true);
    state.set_tls_ok(true);
    state.set_cluster_ok(true);
    // The conjunction alone is not enough; the supervisor derives the key.
    let (ok, _) = health_snapshot(&state);
    assert!(!ok);

    state.set_pipeline_ok(true);
    let (ok, reason) = health_snapshot(&state);
    assert!(ok);
    assert_eq!(reason, "ok");
}

#[test]
fn test_gather_metrics_exposes_gauges() {
    metrics::CPU_USAGE_PERCENT.set(12.5);
    metrics::PIPELINE_OK.set(0.0);
    metrics::WORKER_ALIVE
        .with_label_values(&["monitor"])
        .set(1.0);
    metrics::WORKER_RESTARTS_TOTAL
        .with_label_values(&["prober"])
        .inc();
    // The registry is process-global and other tests scrape it concurrently,
    // so only metric presence is asserted here, not exact values.
    let body = metrics::gather_metrics();
    assert!(body.contains("ids2_cpu_usage_percent"));
    assert!(body.contains("ids2_pipeline_ok"));
    assert!(body.contains("ids2_worker_alive{name=\"monitor\"}"));
    assert!(body.contains("ids2_worker_restarts_total{name=\"prober\"}"));
    assert!(body.contains("# HELP"));
    assert!(body.contains("# TYPE"));
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

async fn get_with_retries(url: &str) -> reqwest::Response {
    let client = reqwest::Client::new();
    for _ in 0..50 {
        if let Ok(resp) = client.get(url).send().await {
            return resp;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("metrics endpoint never became reachable at {url}");
}

#[tokio::test]
async fn test_metrics_endpoint_serves_live_snapshot() {
    let port = free_port();
    let config = Arc::new(config_with_metrics_port(port));
    let state = Arc::new(AgentState::new());
    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let server = MetricsServer::new(config, state.clone());
    let handle = tokio::spawn(server.run(shutdown_tx.subscribe()));

    // Before any worker has run once, gauges carry their initial values and
    // the endpoint still answers 200.
    let resp = get_with_retries(&format!("http://127.0.0.1:{port}/metrics")).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/plain; version=0.0.4"
    );
    let body = resp.text().await.unwrap();
    assert!(body.contains("ids2_throttle_level 0"));
    assert!(body.contains("ids2_uptime_seconds"));

    // Health reflects the phase until the pipeline is verified.
    let resp = get_with_retries(&format!("http://127.0.0.1:{port}/health")).await;
    assert_eq!(resp.status(), 503);
    assert_eq!(resp.text().await.unwrap(), "phase=A");

    state.set_phase(Phase::Steady);
    state.set_pipeline_ok(true);
    state.set_cpu_percent(33.0);
    let resp = get_with_retries(&format!("http://127.0.0.1:{port}/health")).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");

    // Other tests poke the process-global registry concurrently, so poll
    // until a scrape reflects this state.
    let mut reflected = false;
    for _ in 0..50 {
        let resp = get_with_retries(&format!("http://127.0.0.1:{port}/metrics")).await;
        let body = resp.text().await.unwrap();
        if body.contains("ids2_cpu_usage_percent 33") && body.contains("ids2_pipeline_ok 1") {
            reflected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(reflected, "metrics scrape never reflected shared state");

    // The worker heartbeat is touched while serving.
    assert!(state.heartbeat_age(WorkerKind::Metrics) < Duration::from_secs(60));

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("metrics server did not shut down in time")
        .unwrap();
}
