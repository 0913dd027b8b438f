// src/core/phases.rs

//! The ordered bring-up state machine. Phases A through G run exactly once
//! per process; each has an explicit success criterion and, for A through E,
//! a dedicated exit code on failure. Phase F is best-effort.

use crate::config::Config;
use crate::core::cluster::ClusterClient;
use crate::core::errors::PhaseError;
use crate::core::orchestrator::{Orchestrator, TemplateVars, summarize_statuses};
use crate::core::probes::{CycleOutcome, run_probe_cycle};
use crate::core::state::{AgentState, Phase};
use crate::core::tasks::resource_monitor::{sample_now, throttle_level_for};
use anyhow::{Result, anyhow};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const COMPOSE_HEALTH_TIMEOUT: Duration = Duration::from_secs(180);
const COMPOSE_HEALTH_POLL: Duration = Duration::from_secs(5);
const PHASE_D_CYCLE_PAUSE: Duration = Duration::from_secs(2);

/// What bring-up hands to the supervisor: the resolved cluster client and
/// whether this run started the container stack.
#[derive(Debug)]
pub struct BringUpOutcome {
    pub cluster: Arc<ClusterClient>,
    pub compose_started: bool,
}

pub struct BringUp {
    config: Arc<Config>,
    state: Arc<AgentState>,
    orchestrator: Arc<Orchestrator>,
}

impl BringUp {
    pub fn new(
        config: Arc<Config>,
        state: Arc<AgentState>,
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        Self {
            config,
            state,
            orchestrator,
        }
    }

    /// Traverses A through G in order. The current phase is published to
    /// shared state before each step runs.
    pub async fn run(&self) -> Result<BringUpOutcome, PhaseError> {
        self.state.set_phase(Phase::A);
        let cluster = self.phase_a().await?;

        self.state.set_phase(Phase::B);
        self.phase_b(&cluster).await?;

        self.state.set_phase(Phase::C);
        let compose_started = self.phase_c().await?;

        self.state.set_phase(Phase::D);
        self.phase_d(&cluster).await?;

        self.state.set_phase(Phase::E);
        self.phase_e().await?;

        self.state.set_phase(Phase::F);
        self.phase_f().await?;

        self.state.set_phase(Phase::G);
        info!(phase = "G", "bring-up complete");
        Ok(BringUpOutcome {
            cluster,
            compose_started,
        })
    }

    /// Phase A: credential and cluster metadata resolution. Fatal without an
    /// operator; no point retrying a missing profile or domain.
    async fn phase_a(&self) -> Result<Arc<ClusterClient>, PhaseError> {
        info!(phase = "A", "resolving credentials and cluster metadata");

        // The profile name itself is the credential handle; the secret stays
        // with the downstream mechanism.
        let profile = self.config.cluster.credential_profile.trim();
        if profile.is_empty() {
            return Err(PhaseError::new(Phase::A, "credential profile is empty"));
        }

        let endpoint = ClusterClient::resolve_endpoint(&self.config.cluster)
            .map_err(|e| PhaseError::new(Phase::A, format!("{e:#}")))?;
        let client = ClusterClient::new(endpoint)
            .map_err(|e| PhaseError::new(Phase::A, format!("{e:#}")))?;
        info!(
            phase = "A",
            endpoint = %client.endpoint(),
            profile,
            "cluster endpoint resolved"
        );
        Ok(Arc::new(client))
    }

    /// Phase B: render the sniffer and shipper configurations from their
    /// templates. Re-running overwrites the rendered files in place.
    async fn phase_b(&self, cluster: &ClusterClient) -> Result<(), PhaseError> {
        info!(phase = "B", "rendering external configurations");
        let vars = TemplateVars::from_config(&self.config, cluster.endpoint().as_str());
        let paths = &self.config.paths;
        for (template, dest) in [
            (&paths.sniffer_template, &paths.sniffer_config),
            (&paths.shipper_template, &paths.shipper_config),
        ] {
            self.orchestrator
                .render(Path::new(template), Path::new(dest), &vars)
                .await
                .map_err(|e| PhaseError::new(Phase::B, format!("{e:#}")))?;
        }
        Ok(())
    }

    /// Phase C: start the container stack and wait for every container to
    /// report healthy. Returns whether this run actually started the stack.
    async fn phase_c(&self) -> Result<bool, PhaseError> {
        if self.config.policy.dry_run {
            info!(phase = "C", "dry-run: would start container stack");
            return Ok(false);
        }

        info!(phase = "C", "starting container stack");
        self.orchestrator
            .compose_up()
            .await
            .map_err(|e| PhaseError::new(Phase::C, format!("{e:#}")))?;

        let deadline = Instant::now() + COMPOSE_HEALTH_TIMEOUT;
        let mut last_summary = "no status obtained yet".to_string();
        loop {
            match self.orchestrator.compose_status().await {
                Ok(statuses) if !statuses.is_empty() && statuses.iter().all(|s| s.is_healthy()) => {
                    info!(phase = "C", "all containers healthy");
                    return Ok(true);
                }
                Ok(statuses) => {
                    last_summary = summarize_statuses(&statuses);
                    debug!(phase = "C", statuses = %last_summary, "waiting for container health");
                }
                Err(e) => {
                    // A single failed status poll is transient; the deadline
                    // bounds how long we keep shrugging them off.
                    warn!(phase = "C", "status poll failed: {e:#}");
                }
            }
            if Instant::now() >= deadline {
                return Err(PhaseError::new(
                    Phase::C,
                    format!("containers not healthy within {COMPOSE_HEALTH_TIMEOUT:?}: {last_summary}"),
                ));
            }
            tokio::time::sleep(COMPOSE_HEALTH_POLL).await;
        }
    }

    /// Phase D: one full reachability cycle with all three probes succeeding,
    /// within the configured timeout.
    async fn phase_d(&self, cluster: &ClusterClient) -> Result<(), PhaseError> {
        let timeout = self.config.policy.phase_d_timeout;
        if self.config.policy.dry_run {
            info!(phase = "D", "dry-run: reporting synthetic reachability");
            self.state.set_dns_ok(true);
            self.state.set_tls_ok(true);
            self.state.set_cluster_ok(true);
            return Ok(());
        }

        info!(phase = "D", "verifying downstream reachability");
        let deadline = Instant::now() + timeout;
        let mut last = CycleOutcome::default();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(
                remaining,
                run_probe_cycle(&self.config, cluster, &self.state),
            )
            .await
            {
                Ok(outcome) => {
                    last = outcome;
                    if outcome.all_ok() {
                        info!(phase = "D", "downstream reachable");
                        return Ok(());
                    }
                    tokio::time::sleep(PHASE_D_CYCLE_PAUSE).await;
                }
                Err(_) => break,
            }
        }
        let failing = last.first_failure().unwrap_or("dns");
        Err(PhaseError::new(
            Phase::D,
            format!(
                "downstream reachability not established within {timeout:?}; first failing probe: {failing}"
            ),
        ))
    }

    /// Phase E: the pipeline holds together end to end. Containers are still
    /// healthy, all probes pass, and the host is not already saturated.
    async fn phase_e(&self) -> Result<(), PhaseError> {
        info!(phase = "E", "verifying pipeline");

        if !self.config.policy.dry_run {
            let statuses = self
                .orchestrator
                .compose_status()
                .await
                .map_err(|e| PhaseError::new(Phase::E, format!("{e:#}")))?;
            if statuses.is_empty() || !statuses.iter().all(|s| s.is_healthy()) {
                return Err(PhaseError::new(
                    Phase::E,
                    format!("containers unhealthy: {}", summarize_statuses(&statuses)),
                ));
            }
        }

        for (name, ok) in [
            ("dns", self.state.dns_ok()),
            ("tls", self.state.tls_ok()),
            ("cluster", self.state.cluster_ok()),
        ] {
            if !ok {
                return Err(PhaseError::new(Phase::E, format!("{name} probe not ok")));
            }
        }

        // Inline sample so the throttle check is based on a valid CPU delta;
        // the monitor worker has not started yet.
        if let Some((cpu, ram)) = sample_now().await {
            self.state.set_cpu_percent(cpu);
            self.state.set_ram_percent(ram);
            let level = throttle_level_for(cpu.max(ram), &self.config.resources);
            self.state.set_throttle_level(level);
            if level > 2 {
                return Err(PhaseError::new(
                    Phase::E,
                    format!(
                        "throttle level {level} exceeds 2 (cpu {cpu:.1}%, ram {ram:.1}%)"
                    ),
                ));
            }
        } else {
            warn!(phase = "E", "resource sample unavailable; skipping throttle check");
        }
        Ok(())
    }

    /// Phase F: record a commit of rendered config changes when the capture
    /// directory is a working tree on the expected branch. Never aborts
    /// unless strict capture is configured.
    async fn phase_f(&self) -> Result<(), PhaseError> {
        if self.config.policy.dry_run {
            info!(phase = "F", "dry-run: would capture rendered config changes");
            return Ok(());
        }
        if self.config.paths.capture_dir.trim().is_empty() {
            warn!(phase = "F", "change capture disabled (no capture_dir configured)");
            return Ok(());
        }

        match self.capture_changes().await {
            Ok(true) => info!(phase = "F", "rendered config changes committed"),
            Ok(false) => info!(phase = "F", "no rendered config changes to capture"),
            Err(e) => {
                if self.config.policy.strict_change_capture {
                    return Err(PhaseError::new(Phase::F, format!("{e:#}")));
                }
                warn!(phase = "F", "change capture skipped: {e:#}");
            }
        }
        Ok(())
    }

    async fn capture_changes(&self) -> Result<bool> {
        let dir = Path::new(&self.config.paths.capture_dir);
        if !dir.join(".git").exists() {
            return Err(anyhow!("'{}' is not a git working tree", dir.display()));
        }

        let head = self
            .orchestrator
            .git(dir, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await?;
        if !head.success() {
            return Err(anyhow!("git rev-parse failed: {}", head.stderr.trim()));
        }
        let branch = head.stdout.trim().to_string();
        let expected = &self.config.policy.capture_branch;
        if &branch != expected {
            return Err(anyhow!(
                "working tree is on branch '{branch}', expected '{expected}'"
            ));
        }

        let status = self.orchestrator.git(dir, &["status", "--porcelain"]).await?;
        if !status.success() {
            return Err(anyhow!("git status failed: {}", status.stderr.trim()));
        }
        if status.stdout.trim().is_empty() {
            return Ok(false);
        }

        let add = self.orchestrator.git(dir, &["add", "-A"]).await?;
        if !add.success() {
            return Err(anyhow!("git add failed: {}", add.stderr.trim()));
        }
        let message = format!(
            "ids2-agent: capture rendered configs at {}",
            chrono::Utc::now().to_rfc3339()
        );
        let commit = self
            .orchestrator
            .git(dir, &["commit", "-m", message.as_str()])
            .await?;
        if !commit.success() {
            return Err(anyhow!("git commit failed: {}", commit.stderr.trim()));
        }
        Ok(true)
    }
}
