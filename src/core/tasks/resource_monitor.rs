// src/core/tasks/resource_monitor.rs

//! Samples host-wide CPU and RAM utilization and derives the advisory
//! throttle level collaborators observe through shared state.

use crate::config::{Config, ResourceConfig};
use crate::core::metrics;
use crate::core::state::{AgentState, WorkerKind};
use std::sync::Arc;
use sysinfo::System;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// RAM percentage at which the monitor requests memory compaction.
pub const COMPACTION_RAM_THRESHOLD: f64 = 65.0;

pub struct ResourceMonitor {
    config: Arc<Config>,
    state: Arc<AgentState>,
}

impl ResourceMonitor {
    pub fn new(config: Arc<Config>, state: Arc<AgentState>) -> Self {
        Self { config, state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let sample_interval = self.config.workers.sample_interval;
        info!(
            "Resource monitor started (sample interval {:?}).",
            sample_interval
        );

        let mut sys = System::new();
        // The first CPU reading has no previous counter snapshot to diff
        // against; it is published as 0 and excluded from throttling.
        let mut first_sample = true;
        let mut interval = tokio::time::interval(sample_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sample(&mut sys, &mut first_sample);
                }
                _ = shutdown_rx.recv() => {
                    info!("Resource monitor shutting down.");
                    return;
                }
            }
        }
    }

    fn sample(&self, sys: &mut System, first_sample: &mut bool) {
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        self.state.touch_heartbeat(WorkerKind::Monitor);

        let total = sys.total_memory();
        let cpu = sys.global_cpu_usage() as f64;
        if total == 0 || !cpu.is_finite() {
            let errors = self.state.increment_sample_errors();
            metrics::SAMPLE_ERRORS_TOTAL.inc();
            warn!(errors, "resource sampling failed; retaining previous values");
            return;
        }
        let ram = sys.used_memory() as f64 / total as f64 * 100.0;

        if *first_sample {
            *first_sample = false;
            self.state.set_cpu_percent(0.0);
            self.state.set_ram_percent(ram);
            if ram >= COMPACTION_RAM_THRESHOLD {
                request_memory_compaction(ram);
            }
            return;
        }

        self.state.set_cpu_percent(cpu);
        self.state.set_ram_percent(ram);

        let target = throttle_level_for(cpu.max(ram), &self.config.resources);
        let current = self.state.throttle_level();
        let next = next_throttle_level(current, target);
        self.state.set_throttle_level(next);
        if next != current {
            info!(from = current, to = next, cpu, ram, "throttle level changed");
        }

        if ram >= COMPACTION_RAM_THRESHOLD {
            request_memory_compaction(ram);
        }
    }
}

/// Maps `m = max(cpu%, ram%)` onto a throttle level against the configured
/// thresholds: 0 below t1, 1 in [t1, t2), 2 in [t2, t3), 3 at or above t3.
pub fn throttle_level_for(m: f64, resources: &ResourceConfig) -> u8 {
    if m >= resources.throttle_t3 {
        3
    } else if m >= resources.throttle_t2 {
        2
    } else if m >= resources.throttle_t1 {
        1
    } else {
        0
    }
}

/// The published level climbs one step per tick toward `target` and releases
/// immediately when the target falls.
pub fn next_throttle_level(current: u8, target: u8) -> u8 {
    if target > current { current + 1 } else { target }
}

/// Takes an immediate two-refresh sample for one-shot callers; returns
/// (cpu%, ram%) or `None` when the reading is unusable.
pub async fn sample_now() -> Option<(f64, f64)> {
    let mut sys = System::new();
    sys.refresh_cpu_usage();
    tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
    sys.refresh_cpu_usage();
    sys.refresh_memory();
    let total = sys.total_memory();
    if total == 0 {
        return None;
    }
    let cpu = sys.global_cpu_usage() as f64;
    let ram = sys.used_memory() as f64 / total as f64 * 100.0;
    if !cpu.is_finite() || !ram.is_finite() {
        return None;
    }
    Some((cpu, ram))
}

/// Best-effort request to return freed allocator memory to the OS.
fn request_memory_compaction(ram: f64) {
    debug!(ram, "requesting memory compaction");
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    // malloc_trim walks the arenas and releases free pages back to the kernel.
    unsafe {
        libc::malloc_trim(0);
    }
}
