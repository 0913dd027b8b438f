// src/config.rs

//! Manages agent configuration: loading, environment placeholder resolution,
//! and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::time::Duration;

/// Host facets: the managed capture interface and the host's own address,
/// both substituted into the rendered sniffer configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HostConfig {
    pub interface: String,
    pub host_ip: String,
}

/// Resource budget facets: hard ceilings and the three throttle thresholds.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ResourceConfig {
    #[serde(default = "default_max_cpu_percent")]
    pub max_cpu_percent: f64,
    #[serde(default = "default_max_ram_percent")]
    pub max_ram_percent: f64,
    /// Below `throttle_t1` the throttle level is 0.
    #[serde(default = "default_throttle_t1")]
    pub throttle_t1: f64,
    #[serde(default = "default_throttle_t2")]
    pub throttle_t2: f64,
    #[serde(default = "default_throttle_t3")]
    pub throttle_t3: f64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            max_cpu_percent: default_max_cpu_percent(),
            max_ram_percent: default_max_ram_percent(),
            throttle_t1: default_throttle_t1(),
            throttle_t2: default_throttle_t2(),
            throttle_t3: default_throttle_t3(),
        }
    }
}

fn default_max_cpu_percent() -> f64 {
    70.0
}
fn default_max_ram_percent() -> f64 {
    70.0
}
fn default_throttle_t1() -> f64 {
    50.0
}
fn default_throttle_t2() -> f64 {
    60.0
}
fn default_throttle_t3() -> f64 {
    70.0
}

/// Remote search cluster facets. The endpoint may be empty at load time; the
/// bring-up state machine resolves it from the cluster domain in phase A.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClusterConfig {
    pub credential_profile: String,
    pub region: String,
    pub domain: String,
    #[serde(default)]
    pub endpoint: String,
}

/// Worker cadence and metrics endpoint facets.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WorkerConfig {
    /// Resource monitor sampling cadence.
    #[serde(with = "humantime_serde", default = "default_sample_interval")]
    pub sample_interval: Duration,
    /// Reachability prober cycle cadence.
    #[serde(with = "humantime_serde", default = "default_check_interval")]
    pub check_interval: Duration,
    #[serde(default = "default_metrics_host")]
    pub metrics_host: String,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(with = "humantime_serde", default = "default_metrics_refresh_interval")]
    pub metrics_refresh_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            sample_interval: default_sample_interval(),
            check_interval: default_check_interval(),
            metrics_host: default_metrics_host(),
            metrics_port: default_metrics_port(),
            metrics_refresh_interval: default_metrics_refresh_interval(),
        }
    }
}

fn default_sample_interval() -> Duration {
    Duration::from_secs(2)
}
fn default_check_interval() -> Duration {
    Duration::from_secs(30)
}
fn default_metrics_host() -> String {
    "0.0.0.0".to_string()
}
fn default_metrics_port() -> u16 {
    9100
}
fn default_metrics_refresh_interval() -> Duration {
    Duration::from_secs(5)
}

/// Filesystem facets: the compose file, template sources, rendered targets,
/// the RAM-backed log file and the shipper's disk buffer.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PathConfig {
    pub compose_file: String,
    pub sniffer_template: String,
    pub shipper_template: String,
    pub sniffer_config: String,
    pub shipper_config: String,
    pub ram_log: String,
    pub buffer_path: String,
    /// Versioned directory for phase-F change capture. Empty disables capture.
    #[serde(default)]
    pub capture_dir: String,
}

/// Policy facets: dry-run, shutdown behavior, retry schedule.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PolicyConfig {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(with = "humantime_serde", default = "default_shutdown_grace_period")]
    pub shutdown_grace_period: Duration,
    #[serde(with = "humantime_serde", default = "default_phase_d_timeout")]
    pub phase_d_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_retry_base")]
    pub retry_base: Duration,
    #[serde(with = "humantime_serde", default = "default_retry_cap")]
    pub retry_cap: Duration,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// If true, the agent stops the container stack on exit when it was the
    /// one that started it. The safe default leaves the stack running.
    #[serde(default)]
    pub stop_on_exit: bool,
    /// If true, phase F aborts bring-up when the capture directory is not a
    /// working tree on `capture_branch` instead of skipping with a warning.
    #[serde(default)]
    pub strict_change_capture: bool,
    #[serde(default = "default_capture_branch")]
    pub capture_branch: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            shutdown_grace_period: default_shutdown_grace_period(),
            phase_d_timeout: default_phase_d_timeout(),
            retry_base: default_retry_base(),
            retry_cap: default_retry_cap(),
            retry_attempts: default_retry_attempts(),
            stop_on_exit: false,
            strict_change_capture: false,
            capture_branch: default_capture_branch(),
        }
    }
}

fn default_shutdown_grace_period() -> Duration {
    Duration::from_secs(30)
}
fn default_phase_d_timeout() -> Duration {
    Duration::from_secs(120)
}
fn default_retry_base() -> Duration {
    Duration::from_secs(2)
}
fn default_retry_cap() -> Duration {
    Duration::from_secs(10)
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_capture_branch() -> String {
    "main".to_string()
}

impl PolicyConfig {
    /// Backoff before retry attempt `attempt` (1-based): exponential from
    /// `retry_base`, capped at `retry_cap`.
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        (self.retry_base * factor).min(self.retry_cap)
    }
}

/// Represents the final, validated, and resolved agent configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub host: HostConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    pub paths: PathConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Creates a new `Config` by reading a TOML file, resolving `${NAME}`
    /// environment placeholders, parsing, and validating.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let resolved = resolve_placeholders(&contents, |name| env::var(name).ok())?;
        let config: Config = toml::from_str(&resolved)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        let r = &self.resources;
        for (name, value) in [
            ("throttle_t1", r.throttle_t1),
            ("throttle_t2", r.throttle_t2),
            ("throttle_t3", r.throttle_t3),
        ] {
            if !(value > 0.0 && value <= 100.0) {
                return Err(anyhow!("resources.{name} must be in (0, 100], got {value}"));
            }
        }
        if !(r.throttle_t1 < r.throttle_t2 && r.throttle_t2 < r.throttle_t3) {
            return Err(anyhow!(
                "throttle thresholds must be strictly increasing (t1 < t2 < t3), got {} / {} / {}",
                r.throttle_t1,
                r.throttle_t2,
                r.throttle_t3
            ));
        }
        if r.max_cpu_percent < r.throttle_t3 || r.max_ram_percent < r.throttle_t3 {
            return Err(anyhow!(
                "resource ceilings must be >= throttle_t3 ({})",
                r.throttle_t3
            ));
        }

        let w = &self.workers;
        for (name, interval) in [
            ("sample_interval", w.sample_interval),
            ("check_interval", w.check_interval),
            ("metrics_refresh_interval", w.metrics_refresh_interval),
        ] {
            if interval.is_zero() {
                return Err(anyhow!("workers.{name} must be greater than zero"));
            }
        }
        if w.metrics_port == 0 {
            return Err(anyhow!("workers.metrics_port cannot be 0"));
        }
        if w.metrics_host.trim().is_empty() {
            return Err(anyhow!("workers.metrics_host cannot be empty"));
        }

        if self.host.interface.trim().is_empty() {
            return Err(anyhow!("host.interface cannot be empty"));
        }
        if self.host.host_ip.trim().is_empty() {
            return Err(anyhow!("host.host_ip cannot be empty"));
        }
        if self.cluster.domain.trim().is_empty() && self.cluster.endpoint.trim().is_empty() {
            return Err(anyhow!(
                "cluster.domain and cluster.endpoint cannot both be empty"
            ));
        }
        if self.cluster.credential_profile.trim().is_empty() {
            return Err(anyhow!("cluster.credential_profile cannot be empty"));
        }

        let p = &self.paths;
        for (name, value) in [
            ("compose_file", &p.compose_file),
            ("sniffer_template", &p.sniffer_template),
            ("shipper_template", &p.shipper_template),
            ("sniffer_config", &p.sniffer_config),
            ("shipper_config", &p.shipper_config),
            ("ram_log", &p.ram_log),
            ("buffer_path", &p.buffer_path),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow!("paths.{name} cannot be empty"));
            }
        }

        let pol = &self.policy;
        for (name, interval) in [
            ("shutdown_grace_period", pol.shutdown_grace_period),
            ("phase_d_timeout", pol.phase_d_timeout),
            ("retry_base", pol.retry_base),
            ("retry_cap", pol.retry_cap),
        ] {
            if interval.is_zero() {
                return Err(anyhow!("policy.{name} must be greater than zero"));
            }
        }
        if pol.retry_attempts == 0 {
            return Err(anyhow!("policy.retry_attempts must be at least 1"));
        }
        Ok(())
    }
}

/// Substitutes `${NAME}` placeholders in `input` using `lookup`.
///
/// `$${NAME}` escapes to the literal `${NAME}`. A placeholder whose name has
/// no binding is a configuration error naming the variable.
pub fn resolve_placeholders(
    input: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if ch != '$' {
            out.push(ch);
            continue;
        }

        // "$${" is an escaped literal "${"; emit a single '$' and let the
        // braced token pass through untouched on the next iterations.
        if let Some(&(_, '$')) = chars.peek() {
            let mut ahead = chars.clone();
            ahead.next();
            if let Some(&(_, '{')) = ahead.peek() {
                chars.next();
                out.push('$');
                if let Some((_, brace)) = chars.next() {
                    out.push(brace);
                    for (_, c) in chars.by_ref() {
                        out.push(c);
                        if c == '}' {
                            break;
                        }
                    }
                }
                continue;
            }
        }

        if let Some(&(_, '{')) = chars.peek() {
            chars.next();
            let mut name = String::new();
            let mut closed = false;
            for (_, c) in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                name.push(c);
            }
            if !closed {
                return Err(anyhow!(
                    "unterminated placeholder starting at byte {idx}: '${{{name}'"
                ));
            }
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(anyhow!("invalid placeholder name '${{{name}}}'"));
            }
            match lookup(&name) {
                Some(value) => out.push_str(&value),
                None => {
                    return Err(anyhow!(
                        "unresolved placeholder '${{{name}}}': environment variable '{name}' is not set"
                    ));
                }
            }
        } else {
            out.push('$');
        }
    }
    Ok(out)
}
