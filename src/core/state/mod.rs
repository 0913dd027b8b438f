// src/core/state/mod.rs

//! Defines the central `AgentState` store: a fixed set of typed slots with
//! per-key atomic access. It is the only channel between the supervisor, the
//! bring-up state machine, and the workers; readers never block writers.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A discrete step of the bring-up state machine, plus the three post-bring-up
/// lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    A = 0,
    B,
    C,
    D,
    E,
    F,
    G,
    Steady,
    Draining,
    Stopped,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::A => "A",
            Phase::B => "B",
            Phase::C => "C",
            Phase::D => "D",
            Phase::E => "E",
            Phase::F => "F",
            Phase::G => "G",
            Phase::Steady => "STEADY",
            Phase::Draining => "DRAINING",
            Phase::Stopped => "STOPPED",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Phase::A,
            1 => Phase::B,
            2 => Phase::C,
            3 => Phase::D,
            4 => Phase::E,
            5 => Phase::F,
            6 => Phase::G,
            7 => Phase::Steady,
            8 => Phase::Draining,
            _ => Phase::Stopped,
        }
    }
}

/// The fixed set of supervised workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Monitor = 0,
    Prober = 1,
    Metrics = 2,
}

impl WorkerKind {
    pub const ALL: [WorkerKind; 3] = [WorkerKind::Monitor, WorkerKind::Prober, WorkerKind::Metrics];

    pub fn name(&self) -> &'static str {
        match self {
            WorkerKind::Monitor => "monitor",
            WorkerKind::Prober => "prober",
            WorkerKind::Metrics => "metrics",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Per-worker observability slots, written only by the supervisor (alive,
/// restarts) and by the worker itself (heartbeat).
#[derive(Debug)]
pub struct WorkerStatus {
    alive: AtomicBool,
    restarts: AtomicU64,
    /// Milliseconds since agent start at the last heartbeat touch.
    heartbeat_ms: AtomicU64,
}

impl WorkerStatus {
    fn new() -> Self {
        Self {
            alive: AtomicBool::new(false),
            restarts: AtomicU64::new(0),
            heartbeat_ms: AtomicU64::new(0),
        }
    }
}

/// The shared-state store. Every key has a defined initial value before any
/// worker starts; each key is updated atomically and has a single designated
/// writer. Values are advisory; no component blocks on observing one.
#[derive(Debug)]
pub struct AgentState {
    started_at: Instant,
    started_at_unix: i64,
    /// f64 bit patterns, written by the resource monitor.
    cpu_percent: AtomicU64,
    ram_percent: AtomicU64,
    throttle_level: AtomicU8,
    /// Probe outcomes, written by the reachability prober.
    dns_ok: AtomicBool,
    tls_ok: AtomicBool,
    cluster_ok: AtomicBool,
    cluster_last_latency_ms: AtomicU64,
    /// Written by the state machine and the supervisor.
    phase: AtomicU8,
    pipeline_ok: AtomicBool,
    sample_errors: AtomicU64,
    coalesced_cycles: AtomicU64,
    workers: [WorkerStatus; 3],
}

impl Default for AgentState {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            started_at_unix: chrono::Utc::now().timestamp(),
            cpu_percent: AtomicU64::new(0f64.to_bits()),
            ram_percent: AtomicU64::new(0f64.to_bits()),
            throttle_level: AtomicU8::new(0),
            dns_ok: AtomicBool::new(false),
            tls_ok: AtomicBool::new(false),
            cluster_ok: AtomicBool::new(false),
            cluster_last_latency_ms: AtomicU64::new(0f64.to_bits()),
            phase: AtomicU8::new(Phase::A as u8),
            pipeline_ok: AtomicBool::new(false),
            sample_errors: AtomicU64::new(0),
            coalesced_cycles: AtomicU64::new(0),
            workers: [WorkerStatus::new(), WorkerStatus::new(), WorkerStatus::new()],
        }
    }

    // --- Resource monitor keys ---

    pub fn set_cpu_percent(&self, value: f64) {
        self.cpu_percent.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn cpu_percent(&self) -> f64 {
        f64::from_bits(self.cpu_percent.load(Ordering::Relaxed))
    }

    pub fn set_ram_percent(&self, value: f64) {
        self.ram_percent.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn ram_percent(&self) -> f64 {
        f64::from_bits(self.ram_percent.load(Ordering::Relaxed))
    }

    pub fn set_throttle_level(&self, level: u8) {
        self.throttle_level.store(level.min(3), Ordering::Relaxed);
    }

    pub fn throttle_level(&self) -> u8 {
        self.throttle_level.load(Ordering::Relaxed)
    }

    pub fn increment_sample_errors(&self) -> u64 {
        self.sample_errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn sample_errors(&self) -> u64 {
        self.sample_errors.load(Ordering::Relaxed)
    }

    // --- Reachability prober keys ---

    pub fn set_dns_ok(&self, ok: bool) {
        self.dns_ok.store(ok, Ordering::Relaxed);
    }

    pub fn dns_ok(&self) -> bool {
        self.dns_ok.load(Ordering::Relaxed)
    }

    pub fn set_tls_ok(&self, ok: bool) {
        self.tls_ok.store(ok, Ordering::Relaxed);
    }

    pub fn tls_ok(&self) -> bool {
        self.tls_ok.load(Ordering::Relaxed)
    }

    pub fn set_cluster_ok(&self, ok: bool) {
        self.cluster_ok.store(ok, Ordering::Relaxed);
    }

    pub fn cluster_ok(&self) -> bool {
        self.cluster_ok.load(Ordering::Relaxed)
    }

    pub fn set_cluster_last_latency_ms(&self, value: f64) {
        self.cluster_last_latency_ms
            .store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn cluster_last_latency_ms(&self) -> f64 {
        f64::from_bits(self.cluster_last_latency_ms.load(Ordering::Relaxed))
    }

    pub fn increment_coalesced_cycles(&self) -> u64 {
        self.coalesced_cycles.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn coalesced_cycles(&self) -> u64 {
        self.coalesced_cycles.load(Ordering::Relaxed)
    }

    // --- State machine / supervisor keys ---

    pub fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Relaxed);
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Relaxed))
    }

    pub fn set_pipeline_ok(&self, ok: bool) {
        self.pipeline_ok.store(ok, Ordering::Relaxed);
    }

    pub fn pipeline_ok(&self) -> bool {
        self.pipeline_ok.load(Ordering::Relaxed)
    }

    // --- Per-worker slots ---

    pub fn set_worker_alive(&self, kind: WorkerKind, alive: bool) {
        self.workers[kind.index()].alive.store(alive, Ordering::Relaxed);
    }

    pub fn worker_alive(&self, kind: WorkerKind) -> bool {
        self.workers[kind.index()].alive.load(Ordering::Relaxed)
    }

    pub fn increment_worker_restarts(&self, kind: WorkerKind) -> u64 {
        self.workers[kind.index()]
            .restarts
            .fetch_add(1, Ordering::Relaxed)
            + 1
    }

    pub fn worker_restarts(&self, kind: WorkerKind) -> u64 {
        self.workers[kind.index()].restarts.load(Ordering::Relaxed)
    }

    /// Records a liveness heartbeat for `kind`. Workers touch this once per
    /// tick (and between long probe attempts); the supervisor treats a stale
    /// heartbeat as a crash.
    pub fn touch_heartbeat(&self, kind: WorkerKind) {
        let elapsed = self.started_at.elapsed().as_millis() as u64;
        self.workers[kind.index()]
            .heartbeat_ms
            .store(elapsed, Ordering::Relaxed);
    }

    pub fn heartbeat_age(&self, kind: WorkerKind) -> Duration {
        let now = self.started_at.elapsed().as_millis() as u64;
        let at = self.workers[kind.index()].heartbeat_ms.load(Ordering::Relaxed);
        Duration::from_millis(now.saturating_sub(at))
    }

    // --- Process-level facts ---

    pub fn started_at_unix(&self) -> i64 {
        self.started_at_unix
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
