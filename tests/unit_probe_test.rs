use ids2_agent::core::probes::{CycleOutcome, dns_probe};

#[test]
fn test_cycle_outcome_all_ok() {
    let outcome = CycleOutcome {
        dns_ok: true,
        tls_ok: true,
        cluster_ok: true,
        cluster_latency_ms: 12.0,
    };
    assert!(outcome.all_ok());
    assert_eq!(outcome.first_failure(), None);
}

#[test]
fn test_first_failure_order_is_dns_tls_cluster() {
    let outcome = CycleOutcome::default();
    assert_eq!(outcome.first_failure(), Some("dns"));

    let outcome = CycleOutcome {
        dns_ok: true,
        ..Default::default()
    };
    assert_eq!(outcome.first_failure(), Some("tls"));

    let outcome = CycleOutcome {
        dns_ok: true,
        tls_ok: true,
        ..Default::default()
    };
    assert_eq!(outcome.first_failure(), Some("cluster"));
}

#[tokio::test]
async fn test_dns_probe_resolves_localhost() {
    dns_probe("localhost").await.unwrap();
}

#[tokio::test]
async fn test_dns_probe_fails_for_invalid_name() {
    // RFC 2606 reserves .invalid; resolution must not succeed.
    assert!(dns_probe("ids2-nonexistent.invalid").await.is_err());
}
