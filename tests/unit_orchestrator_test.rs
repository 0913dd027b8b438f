use ids2_agent::config::Config;
use ids2_agent::core::orchestrator::{ContainerStatus, Orchestrator, summarize_statuses};
use std::time::Duration;

fn config_in(dir: &std::path::Path) -> Config {
    let d = dir.display();
    let toml_str = format!(
        r#"
[host]
interface = "eth0"
host_ip = "10.0.0.2"

[cluster]
credential_profile = "ids2"
region = "eu-west-3"
domain = "search.example.com"

[paths]
compose_file = "{d}/docker-compose.yml"
sniffer_template = "{d}/sniffer.yaml.tmpl"
shipper_template = "{d}/shipper.conf.tmpl"
sniffer_config = "{d}/sniffer.yaml"
shipper_config = "{d}/shipper.conf"
ram_log = "{d}/events.ndjson"
buffer_path = "{d}/buffer"
"#
    );
    toml::from_str(&toml_str).unwrap()
}

fn status(name: &str, state: &str, health: &str) -> ContainerStatus {
    serde_json::from_str(&format!(
        r#"{{"Name":"{name}","State":"{state}","Health":"{health}"}}"#
    ))
    .unwrap()
}

#[test]
fn test_container_health_requires_healthy_when_checked() {
    assert!(status("shipper", "running", "healthy").is_healthy());
    assert!(!status("shipper", "running", "starting").is_healthy());
    assert!(!status("shipper", "exited", "unhealthy").is_healthy());
}

#[test]
fn test_container_without_health_check_is_healthy_while_running() {
    assert!(status("buffer", "running", "").is_healthy());
    assert!(!status("buffer", "exited", "").is_healthy());
}

#[test]
fn test_summarize_statuses() {
    let statuses = vec![
        status("shipper", "running", "healthy"),
        status("buffer", "running", ""),
    ];
    assert_eq!(summarize_statuses(&statuses), "shipper=healthy, buffer=running");
    assert_eq!(summarize_statuses(&[]), "no containers reported");
}

#[tokio::test]
async fn test_run_command_captures_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(&config_in(dir.path()));
    let out = orchestrator
        .run_command("sh", &["-c", "echo hello"], Duration::from_secs(5))
        .await
        .unwrap();
    assert!(out.success());
    assert_eq!(out.stdout.trim(), "hello");
    assert!(out.stderr.is_empty());
}

#[tokio::test]
async fn test_run_command_surfaces_exit_code_and_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(&config_in(dir.path()));
    let out = orchestrator
        .run_command("sh", &["-c", "echo broken >&2; exit 3"], Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(out.exit_code, 3);
    assert_eq!(out.stderr.trim(), "broken");
}

#[tokio::test]
async fn test_run_command_times_out_and_kills() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(&config_in(dir.path()));
    let err = orchestrator
        .run_command("sh", &["-c", "sleep 10"], Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("timed out"));
}

#[tokio::test]
async fn test_run_command_passes_credential_profile() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(&config_in(dir.path()));
    let out = orchestrator
        .run_command("sh", &["-c", "echo $AWS_PROFILE"], Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(out.stdout.trim(), "ids2");
}

#[tokio::test]
async fn test_run_command_missing_program_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(&config_in(dir.path()));
    let err = orchestrator
        .run_command("ids2-no-such-binary", &[], Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("failed to spawn"));
}
