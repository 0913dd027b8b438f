// src/agent/initialization.rs

//! Builds the agent's runtime context and verifies the preconditions that
//! are fatal when unmet, before any phase runs.

use crate::config::Config;
use crate::core::errors::AgentError;
use crate::core::orchestrator::Orchestrator;
use crate::core::state::AgentState;
use anyhow::anyhow;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Everything the bring-up state machine and the supervisor share.
pub struct AgentContext {
    pub config: Arc<Config>,
    pub state: Arc<AgentState>,
    pub orchestrator: Arc<Orchestrator>,
    pub shutdown_tx: broadcast::Sender<()>,
}

/// Initializes the shared state, the subprocess orchestrator, and the
/// process-wide shutdown channel.
pub fn setup(config: Config) -> Result<AgentContext, AgentError> {
    log_startup_info(&config);

    let (shutdown_tx, _) = broadcast::channel(1);
    let state = Arc::new(AgentState::new());

    // The metrics port must be free before bring-up starts; failing to bind
    // here is fatal rather than a restartable worker fault.
    let addr = format!(
        "{}:{}",
        config.workers.metrics_host, config.workers.metrics_port
    );
    let probe = std::net::TcpListener::bind(&addr)
        .map_err(|e| AgentError::Fatal(anyhow!("cannot bind metrics endpoint on {addr}: {e}")))?;
    drop(probe);

    // The RAM-log directory is provisioned by host bring-up; the agent never
    // creates it.
    if let Some(parent) = Path::new(&config.paths.ram_log).parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        warn!(
            "RAM-log directory '{}' does not exist; the sniffer will not be able to write",
            parent.display()
        );
    }

    let orchestrator = Arc::new(Orchestrator::new(&config));

    Ok(AgentContext {
        config: Arc::new(config),
        state,
        orchestrator,
        shutdown_tx,
    })
}

/// Logs key configuration parameters at startup.
fn log_startup_info(config: &Config) {
    info!(
        "Resource budget: cpu <= {:.0}%, ram <= {:.0}%, throttle thresholds {:.0}/{:.0}/{:.0}.",
        config.resources.max_cpu_percent,
        config.resources.max_ram_percent,
        config.resources.throttle_t1,
        config.resources.throttle_t2,
        config.resources.throttle_t3
    );
    info!(
        "Worker cadence: monitor {:?}, prober {:?}, metrics on {}:{}.",
        config.workers.sample_interval,
        config.workers.check_interval,
        config.workers.metrics_host,
        config.workers.metrics_port
    );
    if config.policy.dry_run {
        info!("Dry-run mode: container stack and change capture are stubbed.");
    }
}
