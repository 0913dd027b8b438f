// src/core/orchestrator.rs

//! Subprocess orchestration: template rendering and the external compose
//! tool. At most one external command runs at a time; child output is
//! captured and line-forwarded to the agent log.

use crate::config::Config;
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{error, info};

pub const RENDER_TIMEOUT: Duration = Duration::from_secs(5);
pub const COMPOSE_UP_TIMEOUT: Duration = Duration::from_secs(180);
pub const COMPOSE_STATUS_TIMEOUT: Duration = Duration::from_secs(15);
pub const COMPOSE_DOWN_TIMEOUT: Duration = Duration::from_secs(60);
pub const GIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Fixed shipper parameters substituted into the rendered configs.
pub const SHIPPER_BATCH_SIZE: u32 = 100;
pub const SHIPPER_BATCH_TIMEOUT_SECS: u64 = 30;
pub const SHIPPER_BUFFER_SIZE_BYTES: u64 = 256 * 1024 * 1024;

/// The environment variable naming the credential profile for child
/// processes. Only the profile name crosses the boundary, never a secret.
pub const CREDENTIAL_PROFILE_ENV: &str = "AWS_PROFILE";

/// Values substituted into the sniffer and shipper templates.
#[derive(Debug, Clone)]
pub struct TemplateVars {
    pub interface: String,
    pub host_ip: String,
    pub ram_log: String,
    pub cluster_endpoint: String,
    pub credential_profile: String,
    pub region: String,
    pub batch_size: u32,
    pub batch_timeout_secs: u64,
    pub buffer_path: String,
    pub buffer_size_bytes: u64,
}

impl TemplateVars {
    pub fn from_config(config: &Config, cluster_endpoint: &str) -> Self {
        Self {
            interface: config.host.interface.clone(),
            host_ip: config.host.host_ip.clone(),
            ram_log: config.paths.ram_log.clone(),
            cluster_endpoint: cluster_endpoint.to_string(),
            credential_profile: config.cluster.credential_profile.clone(),
            region: config.cluster.region.clone(),
            batch_size: SHIPPER_BATCH_SIZE,
            batch_timeout_secs: SHIPPER_BATCH_TIMEOUT_SECS,
            buffer_path: config.paths.buffer_path.clone(),
            buffer_size_bytes: SHIPPER_BUFFER_SIZE_BYTES,
        }
    }

    fn pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("interface", self.interface.clone()),
            ("host_ip", self.host_ip.clone()),
            ("ram_log", self.ram_log.clone()),
            ("cluster_endpoint", self.cluster_endpoint.clone()),
            ("credential_profile", self.credential_profile.clone()),
            ("region", self.region.clone()),
            ("batch_size", self.batch_size.to_string()),
            ("batch_timeout_secs", self.batch_timeout_secs.to_string()),
            ("buffer_path", self.buffer_path.clone()),
            ("buffer_size_bytes", self.buffer_size_bytes.to_string()),
        ]
    }
}

/// Structured result of one external command. Exit code and captured stderr
/// are surfaced verbatim; the caller decides abort or retry.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One container row from `compose ps --format json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerStatus {
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(alias = "State", default)]
    pub state: String,
    #[serde(alias = "Health", default)]
    pub health: String,
}

impl ContainerStatus {
    /// A container with a health check must report "healthy"; one without is
    /// considered healthy while running.
    pub fn is_healthy(&self) -> bool {
        if self.health.is_empty() {
            self.state.eq_ignore_ascii_case("running")
        } else {
            self.health.eq_ignore_ascii_case("healthy")
        }
    }
}

/// Renders container statuses into a single exit-message line.
pub fn summarize_statuses(statuses: &[ContainerStatus]) -> String {
    if statuses.is_empty() {
        return "no containers reported".to_string();
    }
    statuses
        .iter()
        .map(|s| {
            let health = if s.health.is_empty() { &s.state } else { &s.health };
            format!("{}={health}", s.name)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub struct Orchestrator {
    compose_file: PathBuf,
    workdir: PathBuf,
    credential_profile: String,
    /// Subprocess invocation is serialized; one external command at a time.
    lock: Mutex<()>,
}

impl Orchestrator {
    pub fn new(config: &Config) -> Self {
        let compose_file = PathBuf::from(&config.paths.compose_file);
        let workdir = compose_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            compose_file,
            workdir,
            credential_profile: config.cluster.credential_profile.clone(),
            lock: Mutex::new(()),
        }
    }

    /// Pure text rendering: substitutes `{{name}}` markers. Rendering the
    /// same input with the same values is byte-identical.
    pub fn render_template(input: &str, vars: &TemplateVars) -> String {
        let mut out = input.to_string();
        for (key, value) in vars.pairs() {
            out = out.replace(&format!("{{{{{key}}}}}"), &value);
        }
        out
    }

    /// Renders `template` to `dest` and validates the result: non-empty, no
    /// unresolved `{{` markers.
    pub async fn render(&self, template: &Path, dest: &Path, vars: &TemplateVars) -> Result<()> {
        tokio::time::timeout(RENDER_TIMEOUT, async {
            let input = tokio::fs::read_to_string(template)
                .await
                .with_context(|| format!("failed to read template '{}'", template.display()))?;
            let rendered = Self::render_template(&input, vars);
            if rendered.trim().is_empty() {
                return Err(anyhow!(
                    "template '{}' rendered to an empty file",
                    template.display()
                ));
            }
            if let Some(pos) = rendered.find("{{") {
                return Err(anyhow!(
                    "unresolved marker near byte {pos} while rendering '{}'",
                    template.display()
                ));
            }
            tokio::fs::write(dest, rendered)
                .await
                .with_context(|| format!("failed to write rendered config '{}'", dest.display()))?;
            info!(
                "Rendered '{}' -> '{}'.",
                template.display(),
                dest.display()
            );
            Ok(())
        })
        .await
        .map_err(|_| anyhow!("rendering '{}' timed out", template.display()))?
    }

    pub async fn compose_up(&self) -> Result<()> {
        let out = self.run_compose(&["up", "-d"], COMPOSE_UP_TIMEOUT).await?;
        if !out.success() {
            return Err(anyhow!(
                "compose up exited with code {}: {}",
                out.exit_code,
                out.stderr.trim()
            ));
        }
        Ok(())
    }

    pub async fn compose_status(&self) -> Result<Vec<ContainerStatus>> {
        let out = self
            .run_compose(&["ps", "--format", "json"], COMPOSE_STATUS_TIMEOUT)
            .await?;
        if !out.success() {
            return Err(anyhow!(
                "compose ps exited with code {}: {}",
                out.exit_code,
                out.stderr.trim()
            ));
        }
        // The compose tool emits one JSON object per line.
        let mut statuses = Vec::new();
        for line in out.stdout.lines().filter(|l| !l.trim().is_empty()) {
            let status: ContainerStatus = serde_json::from_str(line)
                .with_context(|| format!("unparseable compose status line: {line}"))?;
            statuses.push(status);
        }
        Ok(statuses)
    }

    pub async fn compose_down(&self) -> Result<()> {
        let out = self.run_compose(&["down"], COMPOSE_DOWN_TIMEOUT).await?;
        if !out.success() {
            return Err(anyhow!(
                "compose down exited with code {}: {}",
                out.exit_code,
                out.stderr.trim()
            ));
        }
        Ok(())
    }

    /// Runs git inside `dir`; used by the phase-F change capture.
    pub async fn git(&self, dir: &Path, args: &[&str]) -> Result<CommandOutput> {
        let _guard = self.lock.lock().await;
        self.run_unlocked("git", args, dir, GIT_TIMEOUT).await
    }

    /// Runs an arbitrary external command in the compose working directory.
    pub async fn run_command(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let _guard = self.lock.lock().await;
        self.run_unlocked(program, args, &self.workdir, timeout).await
    }

    async fn run_compose(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        let compose_file = self.compose_file.display().to_string();
        let mut full_args = vec!["compose", "-f", compose_file.as_str()];
        full_args.extend_from_slice(args);
        let _guard = self.lock.lock().await;
        self.run_unlocked("docker", &full_args, &self.workdir, timeout)
            .await
    }

    async fn run_unlocked(
        &self,
        program: &str,
        args: &[&str],
        cwd: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let mut child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_default())
            .env("HOME", std::env::var("HOME").unwrap_or_default())
            .env(CREDENTIAL_PROFILE_ENV, &self.credential_profile)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn '{program}'"))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("missing stdout pipe for '{program}'"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("missing stderr pipe for '{program}'"))?;

        let stdout_task = tokio::spawn(forward_lines(stdout, program.to_string(), false));
        let stderr_task = tokio::spawn(forward_lines(stderr, program.to_string(), true));

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(res) => res.with_context(|| format!("failed to wait for '{program}'"))?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(anyhow!("'{program}' timed out after {timeout:?}"));
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        Ok(CommandOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}

/// Forwards child output line by line to the agent log while collecting it
/// for the structured result.
async fn forward_lines(
    reader: impl AsyncRead + Unpin,
    program: String,
    is_stderr: bool,
) -> String {
    let mut lines = BufReader::new(reader).lines();
    let mut collected = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            error!(command = %program, "{line}");
        } else {
            info!(command = %program, "{line}");
        }
        collected.push_str(&line);
        collected.push('\n');
    }
    collected
}
