// src/core/tasks/prober.rs

//! The reachability prober worker: one probe cycle per tick, coalescing
//! ticks that fire while the previous cycle is still running.

use crate::config::Config;
use crate::core::cluster::ClusterClient;
use crate::core::metrics;
use crate::core::probes::run_probe_cycle;
use crate::core::state::AgentState;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub struct ReachabilityProber {
    config: Arc<Config>,
    state: Arc<AgentState>,
    cluster: Arc<ClusterClient>,
}

impl ReachabilityProber {
    pub fn new(config: Arc<Config>, state: Arc<AgentState>, cluster: Arc<ClusterClient>) -> Self {
        Self {
            config,
            state,
            cluster,
        }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let check_interval = self.config.workers.check_interval;
        info!(
            "Reachability prober started (check interval {:?}).",
            check_interval
        );

        let mut interval = tokio::time::interval(check_interval);
        // A cycle never runs concurrently with itself: ticks that fire while
        // a cycle is in flight are skipped, not queued.
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let started = Instant::now();
                    let outcome = tokio::select! {
                        outcome = run_probe_cycle(&self.config, &self.cluster, &self.state) => outcome,
                        _ = shutdown_rx.recv() => {
                            info!("Reachability prober shutting down mid-cycle.");
                            return;
                        }
                    };
                    if !outcome.all_ok() {
                        warn!(
                            failing = outcome.first_failure().unwrap_or("none"),
                            "reachability cycle completed with failures"
                        );
                    }
                    if started.elapsed() > check_interval {
                        let coalesced = self.state.increment_coalesced_cycles();
                        metrics::COALESCED_CYCLES_TOTAL.inc();
                        debug!(coalesced, "probe cycle overran its interval; tick coalesced");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Reachability prober shutting down.");
                    return;
                }
            }
        }
    }
}
