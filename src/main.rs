// src/main.rs

//! The main entry point for the IDS2 supervisor agent.

use ids2_agent::agent;
use ids2_agent::config::Config;
use std::env;
use tracing::{error, info};
use tracing_subscriber::filter::EnvFilter;

#[tokio::main]
async fn main() {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("ids2-agent version {VERSION}");
        return;
    }

    // The configuration path can be provided via a --config flag; otherwise
    // it defaults to "config.toml".
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("config.toml");

    // A configuration error is surfaced before logging is set up; exit code 2
    // is reserved for it.
    let mut config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e:#}");
            std::process::exit(2);
        }
    };

    if args.iter().any(|arg| arg == "--dry-run") {
        config.policy.dry_run = true;
    }

    // Pin the process-wide TLS crypto provider; more than one can be
    // compiled in through the HTTP client.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .compact()
        .with_ansi(true)
        .init();

    info!(
        "Starting ids2-agent {VERSION} (dry_run={}).",
        config.policy.dry_run
    );

    if let Err(e) = agent::run(config).await {
        error!("Agent runtime error: {e}");
        std::process::exit(e.exit_code());
    }
}
