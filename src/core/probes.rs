// src/core/probes.rs

//! The DNS, TLS, and cluster reachability probes, plus the retrying probe
//! cycle shared by phase D and the prober worker.

use crate::config::{Config, PolicyConfig};
use crate::core::cluster::ClusterClient;
use crate::core::state::{AgentState, WorkerKind};
use anyhow::{Context, Result, anyhow};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpStream, lookup_host};
use tokio_rustls::TlsConnector;
use tracing::warn;

pub const DNS_TIMEOUT: Duration = Duration::from_secs(10);
pub const TLS_TIMEOUT: Duration = Duration::from_secs(10);

/// The outcome of one completed probe cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleOutcome {
    pub dns_ok: bool,
    pub tls_ok: bool,
    pub cluster_ok: bool,
    pub cluster_latency_ms: f64,
}

impl CycleOutcome {
    pub fn all_ok(&self) -> bool {
        self.dns_ok && self.tls_ok && self.cluster_ok
    }

    /// The first failing probe in DNS, TLS, cluster order.
    pub fn first_failure(&self) -> Option<&'static str> {
        if !self.dns_ok {
            Some("dns")
        } else if !self.tls_ok {
            Some("tls")
        } else if !self.cluster_ok {
            Some("cluster")
        } else {
            None
        }
    }
}

/// Resolves the cluster domain; success is at least one address record.
pub async fn dns_probe(domain: &str) -> Result<()> {
    let addrs = tokio::time::timeout(DNS_TIMEOUT, lookup_host((domain, 443u16)))
        .await
        .map_err(|_| anyhow!("DNS lookup for '{domain}' timed out"))?
        .with_context(|| format!("DNS lookup for '{domain}' failed"))?;
    if addrs.count() == 0 {
        return Err(anyhow!("DNS lookup for '{domain}' returned no addresses"));
    }
    Ok(())
}

/// Establishes a TLS session to port 443 of `domain` and performs a full
/// handshake; the session is closed immediately afterwards.
pub async fn tls_probe(domain: &str) -> Result<()> {
    tokio::time::timeout(TLS_TIMEOUT, async {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));
        let server_name = rustls::pki_types::ServerName::try_from(domain.to_string())
            .map_err(|_| anyhow!("invalid TLS server name '{domain}'"))?;
        let tcp = TcpStream::connect((domain, 443u16))
            .await
            .with_context(|| format!("TCP connect to '{domain}:443' failed"))?;
        let stream = connector
            .connect(server_name, tcp)
            .await
            .with_context(|| format!("TLS handshake with '{domain}' failed"))?;
        drop(stream);
        Ok(())
    })
    .await
    .map_err(|_| anyhow!("TLS handshake with '{domain}' timed out"))?
}

/// Runs one full cycle: the three probes concurrently, each retried per the
/// configured schedule. The per-check keys are written in DNS, TLS, cluster
/// order once the cycle completes; readers may observe partial updates.
pub async fn run_probe_cycle(
    config: &Config,
    cluster: &ClusterClient,
    state: &AgentState,
) -> CycleOutcome {
    let domain = if config.cluster.domain.trim().is_empty() {
        cluster.host()
    } else {
        config.cluster.domain.trim().to_string()
    };
    let policy = &config.policy;

    let (dns, tls, cluster_latency) = tokio::join!(
        with_retries("dns", policy, state, || dns_probe(&domain)),
        with_retries("tls", policy, state, || tls_probe(&domain)),
        with_retries("cluster", policy, state, || cluster.bulk_ping()),
    );

    let outcome = CycleOutcome {
        dns_ok: dns.is_ok(),
        tls_ok: tls.is_ok(),
        cluster_ok: cluster_latency.is_ok(),
        cluster_latency_ms: cluster_latency.unwrap_or(0.0),
    };

    state.set_dns_ok(outcome.dns_ok);
    state.set_tls_ok(outcome.tls_ok);
    state.set_cluster_ok(outcome.cluster_ok);
    if outcome.cluster_ok {
        state.set_cluster_last_latency_ms(outcome.cluster_latency_ms);
    }
    state.touch_heartbeat(WorkerKind::Prober);
    outcome
}

/// Retries `op` per the policy schedule; a "fail" is reported only after all
/// attempts exhaust. The prober heartbeat is touched before each attempt so a
/// long cycle is not mistaken for a stalled worker.
async fn with_retries<T, F, Fut>(
    name: &'static str,
    policy: &PolicyConfig,
    state: &AgentState,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 1..=policy.retry_attempts {
        state.touch_heartbeat(WorkerKind::Prober);
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(probe = name, attempt, "probe attempt failed: {e:#}");
                last_err = Some(e);
                if attempt < policy.retry_attempts {
                    tokio::time::sleep(policy.retry_backoff(attempt)).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow!("{name} probe failed")))
}
