use ids2_agent::core::state::{AgentState, Phase, WorkerKind};
use std::time::Duration;

#[test]
fn test_initial_values_defined_before_workers_start() {
    let state = AgentState::new();
    assert_eq!(state.cpu_percent(), 0.0);
    assert_eq!(state.ram_percent(), 0.0);
    assert_eq!(state.throttle_level(), 0);
    assert!(!state.dns_ok());
    assert!(!state.tls_ok());
    assert!(!state.cluster_ok());
    assert!(!state.pipeline_ok());
    assert_eq!(state.cluster_last_latency_ms(), 0.0);
    assert_eq!(state.phase(), Phase::A);
    assert_eq!(state.sample_errors(), 0);
    assert_eq!(state.coalesced_cycles(), 0);
    for kind in WorkerKind::ALL {
        assert!(!state.worker_alive(kind));
        assert_eq!(state.worker_restarts(kind), 0);
    }
    assert!(state.started_at_unix() > 0);
    assert!(state.uptime() < Duration::from_secs(5));
}

#[test]
fn test_float_keys_round_trip() {
    let state = AgentState::new();
    state.set_cpu_percent(73.25);
    state.set_ram_percent(41.5);
    state.set_cluster_last_latency_ms(187.375);
    assert_eq!(state.cpu_percent(), 73.25);
    assert_eq!(state.ram_percent(), 41.5);
    assert_eq!(state.cluster_last_latency_ms(), 187.375);
}

#[test]
fn test_throttle_level_clamped_to_three() {
    let state = AgentState::new();
    state.set_throttle_level(7);
    assert_eq!(state.throttle_level(), 3);
}

#[test]
fn test_phase_round_trip() {
    let state = AgentState::new();
    for phase in [
        Phase::A,
        Phase::B,
        Phase::C,
        Phase::D,
        Phase::E,
        Phase::F,
        Phase::G,
        Phase::Steady,
        Phase::Draining,
        Phase::Stopped,
    ] {
        state.set_phase(phase);
        assert_eq!(state.phase(), phase);
    }
}

#[test]
fn test_phase_as_str() {
    assert_eq!(Phase::A.as_str(), "A");
    assert_eq!(Phase::G.as_str(), "G");
    assert_eq!(Phase::Steady.as_str(), "STEADY");
    assert_eq!(Phase::Draining.as_str(), "DRAINING");
    assert_eq!(Phase::Stopped.as_str(), "STOPPED");
}

#[test]
fn test_worker_restarts_monotonic() {
    let state = AgentState::new();
    let mut last = 0;
    for _ in 0..5 {
        let next = state.increment_worker_restarts(WorkerKind::Prober);
        assert!(next > last);
        last = next;
    }
    assert_eq!(state.worker_restarts(WorkerKind::Prober), 5);
    // Other workers are unaffected.
    assert_eq!(state.worker_restarts(WorkerKind::Monitor), 0);
}

#[test]
fn test_heartbeat_age_shrinks_on_touch() {
    let state = AgentState::new();
    std::thread::sleep(Duration::from_millis(30));
    let before = state.heartbeat_age(WorkerKind::Monitor);
    assert!(before >= Duration::from_millis(20));
    state.touch_heartbeat(WorkerKind::Monitor);
    let after = state.heartbeat_age(WorkerKind::Monitor);
    assert!(after < before);
}

#[test]
fn test_worker_names() {
    assert_eq!(WorkerKind::Monitor.name(), "monitor");
    assert_eq!(WorkerKind::Prober.name(), "prober");
    assert_eq!(WorkerKind::Metrics.name(), "metrics");
}

#[test]
fn test_concurrent_reads_see_writer_values() {
    let state = std::sync::Arc::new(AgentState::new());
    let writer = {
        let state = state.clone();
        std::thread::spawn(move || {
            for i in 0..1000u32 {
                state.set_cpu_percent(f64::from(i % 101));
            }
        })
    };
    // Readers only ever observe a value the writer stored, never a torn one.
    for _ in 0..1000 {
        let v = state.cpu_percent();
        assert!((0.0..=100.0).contains(&v));
        assert_eq!(v.fract(), 0.0);
    }
    writer.join().unwrap();
}
