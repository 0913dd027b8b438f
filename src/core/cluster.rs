// src/core/cluster.rs

//! Minimal HTTP client for the remote search cluster: endpoint resolution and
//! the near-no-op bulk ping used to verify end-to-end reachability. Transport
//! details stay behind this abstraction; the prober only sees ok/latency.

use crate::config::ClusterConfig;
use anyhow::{Context, Result, anyhow};
use std::time::{Duration, Instant};
use url::Url;

/// Sentinel index targeted by the bulk ping. Must match an index pattern the
/// deployed cluster accepts without side effects.
pub const SENTINEL_INDEX: &str = "ids2-probe";

/// Optional `user:password` basic credentials for the bulk ping. The heavier
/// request signing is owned by the downstream shipper, not the agent.
pub const BASIC_AUTH_ENV: &str = "IDS2_CLUSTER_BASIC_AUTH";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const BULK_PING_BODY: &str = "{\"index\":{}}\n{\"ids2_probe\":true}\n";

#[derive(Debug)]
pub struct ClusterClient {
    http: reqwest::Client,
    endpoint: Url,
    basic_auth: Option<(String, String)>,
}

impl ClusterClient {
    /// Resolves the cluster endpoint: a configured endpoint wins; otherwise it
    /// is derived from the cluster domain over HTTPS.
    pub fn resolve_endpoint(cluster: &ClusterConfig) -> Result<Url> {
        let raw = if !cluster.endpoint.trim().is_empty() {
            cluster.endpoint.trim().to_string()
        } else if !cluster.domain.trim().is_empty() {
            format!("https://{}", cluster.domain.trim())
        } else {
            return Err(anyhow!(
                "cluster endpoint cannot be resolved: neither endpoint nor domain is configured"
            ));
        };
        let url =
            Url::parse(&raw).with_context(|| format!("invalid cluster endpoint '{raw}'"))?;
        if url.host_str().is_none() {
            return Err(anyhow!("cluster endpoint '{raw}' has no host"));
        }
        Ok(url)
    }

    pub fn new(endpoint: Url) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build cluster HTTP client")?;
        let basic_auth = std::env::var(BASIC_AUTH_ENV).ok().and_then(|value| {
            value
                .split_once(':')
                .map(|(user, pass)| (user.to_string(), pass.to_string()))
        });
        Ok(Self {
            http,
            endpoint,
            basic_auth,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// The host the DNS and TLS probes target when no separate domain is
    /// configured.
    pub fn host(&self) -> String {
        self.endpoint.host_str().unwrap_or_default().to_string()
    }

    /// The full bulk-ingest URL the ping is sent to.
    pub fn bulk_url(&self) -> String {
        format!(
            "{}/{SENTINEL_INDEX}/_bulk",
            self.endpoint.as_str().trim_end_matches('/')
        )
    }

    /// Sends a single no-op document to the sentinel index on the bulk path.
    /// Success is any 2xx response; returns the request latency in ms.
    pub async fn bulk_ping(&self) -> Result<f64> {
        let url = self.bulk_url();
        let started = Instant::now();
        let mut request = self
            .http
            .post(&url)
            .header("content-type", "application/x-ndjson")
            .body(BULK_PING_BODY);
        if let Some((user, pass)) = &self.basic_auth {
            request = request.basic_auth(user, Some(pass));
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("bulk ping to '{url}' failed"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("bulk ping to '{url}' returned {status}"));
        }
        Ok(started.elapsed().as_secs_f64() * 1000.0)
    }
}
