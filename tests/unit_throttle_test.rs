use ids2_agent::config::ResourceConfig;
use ids2_agent::core::tasks::resource_monitor::{next_throttle_level, throttle_level_for};

fn default_resources() -> ResourceConfig {
    ResourceConfig::default()
}

#[test]
fn test_level_zero_below_t1() {
    let r = default_resources();
    assert_eq!(throttle_level_for(0.0, &r), 0);
    assert_eq!(throttle_level_for(49.9, &r), 0);
}

#[test]
fn test_boundaries_are_inclusive() {
    let r = default_resources();
    // Exactly at a threshold the level steps up.
    assert_eq!(throttle_level_for(50.0, &r), 1);
    assert_eq!(throttle_level_for(60.0, &r), 2);
    assert_eq!(throttle_level_for(70.0, &r), 3);
}

#[test]
fn test_intermediate_bands() {
    let r = default_resources();
    assert_eq!(throttle_level_for(55.0, &r), 1);
    assert_eq!(throttle_level_for(65.0, &r), 2);
    assert_eq!(throttle_level_for(99.0, &r), 3);
    assert_eq!(throttle_level_for(100.0, &r), 3);
}

#[test]
fn test_custom_thresholds() {
    let r = ResourceConfig {
        max_cpu_percent: 90.0,
        max_ram_percent: 90.0,
        throttle_t1: 30.0,
        throttle_t2: 50.0,
        throttle_t3: 80.0,
    };
    assert_eq!(throttle_level_for(29.9, &r), 0);
    assert_eq!(throttle_level_for(30.0, &r), 1);
    assert_eq!(throttle_level_for(79.9, &r), 2);
    assert_eq!(throttle_level_for(80.0, &r), 3);
}

#[test]
fn test_escalation_is_one_step_per_tick() {
    // Sustained pressure at level 3 climbs through the intermediates.
    let mut level = 0;
    let mut observed = vec![level];
    for _ in 0..4 {
        level = next_throttle_level(level, 3);
        observed.push(level);
    }
    assert_eq!(observed, vec![0, 1, 2, 3, 3]);
}

#[test]
fn test_release_is_immediate() {
    assert_eq!(next_throttle_level(3, 0), 0);
    assert_eq!(next_throttle_level(2, 1), 1);
}

#[test]
fn test_steady_target_holds() {
    assert_eq!(next_throttle_level(2, 2), 2);
    assert_eq!(next_throttle_level(0, 0), 0);
}
