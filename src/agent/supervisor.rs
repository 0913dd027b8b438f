// src/agent/supervisor.rs

//! Post-bring-up supervision: spawn the workers, watch their liveness,
//! restart crashed ones with backoff, and run the signal-driven shutdown
//! sequence.

use super::initialization::AgentContext;
use super::metrics_server::MetricsServer;
use crate::config::Config;
use crate::core::cluster::ClusterClient;
use crate::core::errors::AgentError;
use crate::core::metrics;
use crate::core::orchestrator::Orchestrator;
use crate::core::phases::BringUpOutcome;
use crate::core::state::{AgentState, Phase, WorkerKind};
use crate::core::tasks::prober::ReachabilityProber;
use crate::core::tasks::resource_monitor::ResourceMonitor;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const STATUS_INTERVAL: Duration = Duration::from_secs(30);
const RESTART_BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const RESTART_BACKOFF_CAP: Duration = Duration::from_secs(30);
/// A worker that stayed alive this long earns a fresh backoff schedule.
const BACKOFF_RESET_AFTER: Duration = Duration::from_secs(300);
const METRICS_LIVENESS_WINDOW: Duration = Duration::from_secs(60);

/// Resolves once the OS delivers a termination signal: interrupt or
/// terminate on Unix, Ctrl+C elsewhere. Quit and kill are left to the OS.
async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut interrupt =
            signal(SignalKind::interrupt()).expect("interrupt handler registration failed");
        let mut terminate =
            signal(SignalKind::terminate()).expect("terminate handler registration failed");
        let received = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        };
        info!(signal = received, "termination signal received");
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("ctrl-c handler registration failed");
        info!(signal = "ctrl-c", "termination signal received");
    }
}

/// Bookkeeping for one supervised worker.
struct WorkerSlot {
    kind: WorkerKind,
    handle: Option<JoinHandle<()>>,
    backoff: Duration,
    next_restart_at: Option<Instant>,
    spawned_at: Instant,
}

pub async fn run(ctx: AgentContext, outcome: BringUpOutcome) -> Result<(), AgentError> {
    Supervisor::new(ctx, outcome).run().await
}

struct Supervisor {
    config: Arc<Config>,
    state: Arc<AgentState>,
    orchestrator: Arc<Orchestrator>,
    shutdown_tx: broadcast::Sender<()>,
    cluster: Arc<ClusterClient>,
    compose_started: bool,
    slots: Vec<WorkerSlot>,
}

impl Supervisor {
    fn new(ctx: AgentContext, outcome: BringUpOutcome) -> Self {
        Self {
            config: ctx.config,
            state: ctx.state,
            orchestrator: ctx.orchestrator,
            shutdown_tx: ctx.shutdown_tx,
            cluster: outcome.cluster,
            compose_started: outcome.compose_started,
            slots: Vec::new(),
        }
    }

    async fn run(&mut self) -> Result<(), AgentError> {
        // Phase G completes here: all workers running, then steady state.
        for kind in WorkerKind::ALL {
            let handle = spawn_worker(
                kind,
                &self.config,
                &self.state,
                &self.cluster,
                &self.shutdown_tx,
            );
            self.state.set_worker_alive(kind, true);
            self.slots.push(WorkerSlot {
                kind,
                handle: Some(handle),
                backoff: RESTART_BACKOFF_INITIAL,
                next_restart_at: None,
                spawned_at: Instant::now(),
            });
        }
        self.state.set_phase(Phase::Steady);
        info!(
            started_at = self.state.started_at_unix(),
            "All workers spawned; agent is in steady state."
        );

        let mut poll = tokio::time::interval(POLL_INTERVAL);
        let mut status = tokio::time::interval(STATUS_INTERVAL);
        loop {
            tokio::select! {
                biased; // Prioritize termination signals over housekeeping.

                _ = await_shutdown_signal() => break,

                _ = poll.tick() => self.poll_workers().await,

                _ = status.tick() => self.log_status(),
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// One liveness pass: reap finished tasks, detect stale heartbeats,
    /// schedule and execute restarts, refresh the derived keys.
    async fn poll_workers(&mut self) {
        let windows: Vec<Duration> = self
            .slots
            .iter()
            .map(|slot| liveness_window(&self.config, slot.kind))
            .collect();

        for (slot, window) in self.slots.iter_mut().zip(windows) {
            let kind = slot.kind;
            let finished = slot.handle.as_ref().is_some_and(|h| h.is_finished());
            let stale = !finished
                && slot.handle.is_some()
                && self.state.heartbeat_age(kind) > window;
            let mut crashed = false;

            if finished {
                if let Some(handle) = slot.handle.take() {
                    match handle.await {
                        Err(e) if e.is_panic() => {
                            error!(worker = kind.name(), "worker panicked: {e:?}");
                        }
                        Err(e) => error!(worker = kind.name(), "worker task failed: {e}"),
                        Ok(()) => error!(worker = kind.name(), "worker exited unexpectedly"),
                    }
                }
                crashed = true;
            } else if stale {
                error!(
                    worker = kind.name(),
                    age_ms = self.state.heartbeat_age(kind).as_millis() as u64,
                    "worker heartbeat stale; treating as crashed"
                );
                if let Some(handle) = slot.handle.take() {
                    handle.abort();
                }
                crashed = true;
            }

            if crashed {
                self.state.set_worker_alive(kind, false);
                if slot.spawned_at.elapsed() >= BACKOFF_RESET_AFTER {
                    slot.backoff = RESTART_BACKOFF_INITIAL;
                }
                slot.next_restart_at = Some(Instant::now() + slot.backoff);
                warn!(
                    worker = kind.name(),
                    backoff_ms = slot.backoff.as_millis() as u64,
                    "scheduling worker restart"
                );
                slot.backoff = (slot.backoff * 2).min(RESTART_BACKOFF_CAP);
            } else if slot.handle.is_none()
                && slot.next_restart_at.is_some_and(|at| Instant::now() >= at)
            {
                let restarts = self.state.increment_worker_restarts(kind);
                metrics::WORKER_RESTARTS_TOTAL
                    .with_label_values(&[kind.name()])
                    .inc();
                info!(worker = kind.name(), restarts, "restarting worker");
                self.state.touch_heartbeat(kind);
                slot.handle = Some(spawn_worker(
                    kind,
                    &self.config,
                    &self.state,
                    &self.cluster,
                    &self.shutdown_tx,
                ));
                slot.spawned_at = Instant::now();
                slot.next_restart_at = None;
                self.state.set_worker_alive(kind, true);
            }
        }

        let pipeline_ok = self.state.phase() == Phase::Steady
            && self.state.dns_ok()
            && self.state.tls_ok()
            && self.state.cluster_ok();
        self.state.set_pipeline_ok(pipeline_ok);
    }

    fn log_status(&self) {
        info!(
            phase = self.state.phase().as_str(),
            pipeline_ok = self.state.pipeline_ok(),
            throttle = self.state.throttle_level(),
            monitor_alive = self.state.worker_alive(WorkerKind::Monitor),
            monitor_restarts = self.state.worker_restarts(WorkerKind::Monitor),
            prober_alive = self.state.worker_alive(WorkerKind::Prober),
            prober_restarts = self.state.worker_restarts(WorkerKind::Prober),
            metrics_alive = self.state.worker_alive(WorkerKind::Metrics),
            metrics_restarts = self.state.worker_restarts(WorkerKind::Metrics),
            "agent status"
        );
    }

    /// The ordered shutdown sequence. A second signal during the drain skips
    /// the container-stack stop and exits 130 immediately.
    async fn shutdown(&mut self) {
        info!("Termination signal received; draining workers.");
        self.state.set_phase(Phase::Draining);
        self.state.set_pipeline_ok(false);
        if self.shutdown_tx.send(()).is_err() {
            error!("Failed to broadcast shutdown; workers may not drain cleanly.");
        }

        let handles: Vec<(WorkerKind, JoinHandle<()>)> = self
            .slots
            .iter_mut()
            .filter_map(|slot| slot.handle.take().map(|h| (slot.kind, h)))
            .collect();
        let drain = async {
            for (kind, handle) in handles {
                match handle.await {
                    Err(e) if e.is_panic() => {
                        error!(worker = kind.name(), "worker panicked during drain: {e:?}");
                    }
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => error!(worker = kind.name(), "worker task failed during drain: {e}"),
                    Ok(()) => {}
                }
                self.state.set_worker_alive(kind, false);
            }
        };

        tokio::select! {
            biased;

            _ = await_shutdown_signal() => {
                warn!("Second termination signal during drain; exiting immediately.");
                std::process::exit(130);
            }

            res = tokio::time::timeout(self.config.policy.shutdown_grace_period, drain) => {
                match res {
                    Ok(()) => info!("All workers drained."),
                    Err(_) => warn!("Timed out waiting for workers to drain; abandoning remaining tasks."),
                }
            }
        }

        for kind in WorkerKind::ALL {
            self.state.set_worker_alive(kind, false);
        }

        if self.compose_started && self.config.policy.stop_on_exit {
            info!("Stopping container stack.");
            if let Err(e) = self.orchestrator.compose_down().await {
                warn!("compose down failed: {e:#}");
            }
        }

        self.state.set_phase(Phase::Stopped);
        info!(phase = "STOPPED", "Agent shutdown complete.");
    }
}

fn liveness_window(config: &Config, kind: WorkerKind) -> Duration {
    match kind {
        WorkerKind::Monitor => config.workers.sample_interval * 2,
        WorkerKind::Prober => config.workers.check_interval * 2,
        WorkerKind::Metrics => METRICS_LIVENESS_WINDOW,
    }
}

fn spawn_worker(
    kind: WorkerKind,
    config: &Arc<Config>,
    state: &Arc<AgentState>,
    cluster: &Arc<ClusterClient>,
    shutdown_tx: &broadcast::Sender<()>,
) -> JoinHandle<()> {
    let shutdown_rx = shutdown_tx.subscribe();
    match kind {
        WorkerKind::Monitor => {
            let worker = ResourceMonitor::new(config.clone(), state.clone());
            tokio::spawn(worker.run(shutdown_rx))
        }
        WorkerKind::Prober => {
            let worker = ReachabilityProber::new(config.clone(), state.clone(), cluster.clone());
            tokio::spawn(worker.run(shutdown_rx))
        }
        WorkerKind::Metrics => {
            let worker = MetricsServer::new(config.clone(), state.clone());
            tokio::spawn(worker.run(shutdown_rx))
        }
    }
}
