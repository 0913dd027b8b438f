use ids2_agent::config::Config;
use ids2_agent::core::orchestrator::{Orchestrator, TemplateVars};

fn test_vars() -> TemplateVars {
    TemplateVars {
        interface: "eth0".to_string(),
        host_ip: "10.0.0.2".to_string(),
        ram_log: "/mnt/ramlog/events.ndjson".to_string(),
        cluster_endpoint: "https://search.example.com/".to_string(),
        credential_profile: "ids2".to_string(),
        region: "eu-west-3".to_string(),
        batch_size: 100,
        batch_timeout_secs: 30,
        buffer_path: "/var/lib/ids2/buffer".to_string(),
        buffer_size_bytes: 256 * 1024 * 1024,
    }
}

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

#[test]
fn test_render_template_substitutes_markers() {
    let input = "af-packet:\n  interface: {{interface}}\n  host: {{host_ip}}\n";
    let out = Orchestrator::render_template(input, &test_vars());
    assert_eq!(out, "af-packet:\n  interface: eth0\n  host: 10.0.0.2\n");
}

#[test]
fn test_render_template_substitutes_numeric_values() {
    let input = "batch_size: {{batch_size}}\nbuffer_size: {{buffer_size_bytes}}\n";
    let out = Orchestrator::render_template(input, &test_vars());
    assert_eq!(out, "batch_size: 100\nbuffer_size: 268435456\n");
}

#[test]
fn test_render_template_is_idempotent() {
    let input = "endpoint: {{cluster_endpoint}}\nregion: {{region}}\n";
    let vars = test_vars();
    let first = Orchestrator::render_template(input, &vars);
    let second = Orchestrator::render_template(input, &vars);
    assert_eq!(first.as_bytes(), second.as_bytes());
}

#[test]
fn test_render_template_leaves_unknown_markers() {
    let input = "value: {{no_such_var}}\n";
    let out = Orchestrator::render_template(input, &test_vars());
    assert!(out.contains("{{no_such_var}}"));
}

#[tokio::test]
async fn test_render_writes_destination_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let orchestrator = Orchestrator::new(&config);

    let template = dir.path().join("sniffer.yaml.tmpl");
    let dest = dir.path().join("sniffer.yaml");
    std::fs::write(&template, "interface: {{interface}}\nlog: {{ram_log}}\n").unwrap();

    orchestrator
        .render(&template, &dest, &test_vars())
        .await
        .unwrap();
    let rendered = std::fs::read_to_string(&dest).unwrap();
    assert_eq!(
        rendered,
        "interface: eth0\nlog: /mnt/ramlog/events.ndjson\n"
    );
}

#[tokio::test]
async fn test_render_twice_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let orchestrator = Orchestrator::new(&config);

    let template = dir.path().join("shipper.conf.tmpl");
    let dest = dir.path().join("shipper.conf");
    std::fs::write(&template, "endpoint {{cluster_endpoint}}\nbatch {{batch_size}}\n").unwrap();

    let vars = test_vars();
    orchestrator.render(&template, &dest, &vars).await.unwrap();
    let first = std::fs::read(&dest).unwrap();
    orchestrator.render(&template, &dest, &vars).await.unwrap();
    let second = std::fs::read(&dest).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_render_rejects_unresolved_marker() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let orchestrator = Orchestrator::new(&config);

    let template = dir.path().join("sniffer.yaml.tmpl");
    let dest = dir.path().join("sniffer.yaml");
    std::fs::write(&template, "value: {{typo_marker}}\n").unwrap();

    let err = orchestrator
        .render(&template, &dest, &test_vars())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unresolved marker"));
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_render_rejects_empty_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let orchestrator = Orchestrator::new(&config);

    let template = dir.path().join("sniffer.yaml.tmpl");
    let dest = dir.path().join("sniffer.yaml");
    std::fs::write(&template, "   \n").unwrap();

    let err = orchestrator
        .render(&template, &dest, &test_vars())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("empty"));
}

#[tokio::test]
async fn test_render_missing_template_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let orchestrator = Orchestrator::new(&config);

    let template = dir.path().join("no-such.tmpl");
    let dest = dir.path().join("out.yaml");
    let err = orchestrator
        .render(&template, &dest, &test_vars())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("failed to read template"));
}
