//! Installer State Machine (C10): drives a single node through
//! validate → probe → prepare → install → wait_ready → vip_apply (CP
//! only) → verify, or the idempotent converge path if already installed.
//!
//! The PROBE step treats "already running" output as success rather than
//! an error, so re-running the installer against a configured node
//! converges instead of failing.

use std::time::Duration;

use thiserror::Error;

use foundry_common::Error as CoreError;

use crate::network;
use crate::ssh::{Executor, SshError};
use crate::vip;

const INSTALL_TIMEOUT: Duration = Duration::from_secs(300);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
const WAIT_READY_ATTEMPTS: u32 = 30;
const WAIT_READY_INTERVAL: Duration = Duration::from_secs(10);
const VIP_APPLY_ATTEMPTS: u32 = 30;
const VIP_APPLY_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallerState {
    Start,
    Probe,
    Prepare,
    Install,
    WaitReady,
    VipApply,
    Verify,
    Converge,
    Done,
}

#[derive(Debug, Clone)]
pub struct InstallerConfig {
    pub hostname: String,
    pub vip: String,
    /// `https://<vip>:6443`, required when joining (not the first CP).
    pub server_url: Option<String>,
    pub cluster_token: String,
    pub agent_token: String,
    pub is_control_plane: bool,
    /// Only true for the first control-plane node.
    pub cluster_init: bool,
    pub iface: Option<String>,
    pub dns_servers: Vec<String>,
    pub dns_domains: Vec<String>,
    pub tls_sans: Vec<String>,
    pub disabled_components: Vec<String>,
    pub etcd_tuning_args: Vec<String>,
    pub registries_extra_yaml: Option<String>,
}

impl InstallerConfig {
    pub fn joining(&self) -> bool {
        !self.cluster_init
    }
}

#[derive(Debug, Error)]
pub enum InstallerError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("remote command failed: {0}")]
    Ssh(#[from] SshError),
    #[error("installer exited non-zero for {intent}: {stderr}")]
    RemoteExit { intent: String, stderr: String },
    #[error("{resource} did not become ready after {attempts} retries")]
    Timeout { resource: String, attempts: u32 },
    #[error("vip manifest error: {0}")]
    Vip(#[from] vip::VipError),
    #[error("network probe error: {0}")]
    Network(#[from] network::NetworkProbeError),
}

impl From<InstallerError> for CoreError {
    fn from(e: InstallerError) -> Self {
        match e {
            InstallerError::Validation(msg) => CoreError::Validation(msg),
            InstallerError::RemoteExit { intent, stderr } => {
                CoreError::RemoteExit { intent, stderr }
            }
            InstallerError::Timeout { resource, attempts } => {
                CoreError::ConvergenceTimeout { resource, attempts }
            }
            other => CoreError::Environmental(other.to_string()),
        }
    }
}

#[derive(Debug)]
pub struct InstallOutcome {
    pub final_state: InstallerState,
    pub converged: bool,
}

/// Validate config (VIP present + private; if joining, server URL + a
/// token required).
fn validate(cfg: &InstallerConfig) -> Result<(), InstallerError> {
    vip::validate_vip(&cfg.vip).map_err(|e| InstallerError::Validation(e.to_string()))?;
    if cfg.joining() {
        if cfg.server_url.is_none() {
            return Err(InstallerError::Validation(
                "server URL required when joining".to_string(),
            ));
        }
        if cfg.cluster_token.is_empty() && cfg.agent_token.is_empty() {
            return Err(InstallerError::Validation(
                "a token is required when joining".to_string(),
            ));
        }
    }
    Ok(())
}

fn default_disabled(cfg: &InstallerConfig) -> Vec<String> {
    if cfg.disabled_components.is_empty() {
        vec!["traefik".to_string(), "servicelb".to_string()]
    } else {
        cfg.disabled_components.clone()
    }
}

/// `curl -sfL https://get.k3s.io | sh -s - server <flags>` with a fixed
/// flag order so the resulting command line is deterministic.
pub fn build_server_install_command(cfg: &InstallerConfig) -> String {
    let mut flags = Vec::new();
    if cfg.cluster_init {
        flags.push("--cluster-init".to_string());
    }
    if let Some(server_url) = &cfg.server_url {
        flags.push(format!("--server {server_url}"));
    }
    flags.push(format!("--token {}", cfg.cluster_token));
    flags.push(format!("--agent-token {}", cfg.agent_token));
    for san in &cfg.tls_sans {
        flags.push(format!("--tls-san {san}"));
    }
    flags.push(format!("--tls-san {}", cfg.vip));
    for disabled in default_disabled(cfg) {
        flags.push(format!("--disable={disabled}"));
    }
    for arg in &cfg.etcd_tuning_args {
        flags.push(format!("--etcd-arg={arg}"));
    }

    format!(
        "curl -sfL https://get.k3s.io | sh -s - server {}",
        flags.join(" ")
    )
}

/// `curl -sfL https://get.k3s.io | K3S_URL=<url> K3S_TOKEN=<token> sh -`.
pub fn build_agent_install_command(cfg: &InstallerConfig) -> String {
    let server_url = cfg.server_url.as_deref().unwrap_or_default();
    format!(
        "curl -sfL https://get.k3s.io | K3S_URL={} K3S_TOKEN={} sh -",
        server_url, cfg.agent_token
    )
}

fn install_command(cfg: &InstallerConfig) -> String {
    if cfg.is_control_plane {
        build_server_install_command(cfg)
    } else {
        build_agent_install_command(cfg)
    }
}

/// Merges caller-supplied registry entries with the mirrors/configs the
/// local pull-through cache needs.
pub fn build_registries_yaml(extra: Option<&str>) -> String {
    let base = r#"mirrors:
  docker.io:
    endpoint:
      - "https://registry-mirror.internal"
  ghcr.io:
    endpoint:
      - "https://registry-mirror.internal"
configs:
  "registry-mirror.internal":
    tls:
      insecure_skip_verify: true
"#;
    match extra {
        Some(extra) if !extra.trim().is_empty() => format!("{base}{extra}\n"),
        _ => base.to_string(),
    }
}

async fn is_already_installed(
    executor: &dyn Executor,
    is_control_plane: bool,
) -> Result<bool, InstallerError> {
    let unit = if is_control_plane { "k3s" } else { "k3s-agent" };
    let result = executor
        .exec(&format!("systemctl is-active {unit}"), COMMAND_TIMEOUT)
        .await?;
    Ok(result.stdout.trim() == "active")
}

async fn configure_dns(
    executor: &dyn Executor,
    cfg: &InstallerConfig,
) -> Result<(), InstallerError> {
    if cfg.dns_servers.is_empty() {
        return Ok(());
    }
    let resolved_check = executor
        .exec("systemctl is-active systemd-resolved", COMMAND_TIMEOUT)
        .await?;
    if resolved_check.stdout.trim() == "active" {
        let mut stanza = format!("[Resolve]\nDNS={}\n", cfg.dns_servers.join(" "));
        if !cfg.dns_domains.is_empty() {
            stanza.push_str(&format!("Domains={}\n", cfg.dns_domains.join(" ")));
        }
        let command = format!(
            "mkdir -p /etc/systemd/resolved.conf.d && cat <<'EOF' | sudo tee /etc/systemd/resolved.conf.d/foundry.conf >/dev/null\n{stanza}EOF\nsudo systemctl restart systemd-resolved"
        );
        run_fatal(executor, &command, "configure DNS via systemd-resolved").await?;
    } else {
        let nameservers: String = cfg
            .dns_servers
            .iter()
            .map(|ns| format!("nameserver {ns}\n"))
            .collect();
        let command = format!(
            "sudo chattr -i /etc/resolv.conf 2>/dev/null; cat <<'EOF' | sudo tee /etc/resolv.conf >/dev/null\n{nameservers}EOF\nsudo chattr +i /etc/resolv.conf"
        );
        run_fatal(executor, &command, "configure static /etc/resolv.conf").await?;
    }
    Ok(())
}

async fn write_registries(
    executor: &dyn Executor,
    cfg: &InstallerConfig,
) -> Result<(), InstallerError> {
    let yaml = build_registries_yaml(cfg.registries_extra_yaml.as_deref());
    let command = format!(
        "sudo mkdir -p /etc/rancher/k3s && cat <<'EOF' | sudo tee /etc/rancher/k3s/registries.yaml >/dev/null\n{yaml}EOF"
    );
    run_fatal(executor, &command, "write registries.yaml").await
}

async fn write_etcd_tuning(
    executor: &dyn Executor,
    cfg: &InstallerConfig,
) -> Result<(), InstallerError> {
    if cfg.etcd_tuning_args.is_empty() {
        return Ok(());
    }
    let mut body = String::from("etcd-arg:\n");
    for arg in &cfg.etcd_tuning_args {
        body.push_str(&format!("  - \"{arg}\"\n"));
    }
    let command = format!(
        "sudo mkdir -p /etc/rancher/k3s/config.yaml.d && cat <<'EOF' | sudo tee /etc/rancher/k3s/config.yaml.d/etcd-tuning.yaml >/dev/null\n{body}EOF"
    );
    run_fatal(executor, &command, "write etcd tuning drop-in").await
}

async fn apply_apparmor_profile(executor: &dyn Executor) {
    let command = "sudo mkdir -p /etc/apparmor.d && printf 'profile nerdctl-default flags=(attach_disconnected,mediate_deleted) {\\n  signal (receive) peer=runc,\\n}\\n' | sudo tee /etc/apparmor.d/nerdctl-default >/dev/null";
    match executor.exec(command, COMMAND_TIMEOUT).await {
        Ok(result) if result.success() => {}
        Ok(result) => tracing::warn!(stderr = %result.stderr, "apparmor profile install failed, continuing"),
        Err(e) => tracing::warn!(error = %e, "apparmor profile install failed, continuing"),
    }
}

async fn run_fatal(
    executor: &dyn Executor,
    command: &str,
    intent: &str,
) -> Result<(), InstallerError> {
    let result = executor.exec(command, COMMAND_TIMEOUT).await?;
    if !result.success() {
        return Err(InstallerError::RemoteExit {
            intent: intent.to_string(),
            stderr: result.stderr,
        });
    }
    Ok(())
}

/// Fixed-interval retry: polls `check` up to `attempts` times, sleeping
/// `interval` between tries. No exponential backoff, per design.
async fn poll_until<F, Fut>(
    resource: &str,
    attempts: u32,
    interval: Duration,
    mut check: F,
) -> Result<(), InstallerError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<bool, InstallerError>>,
{
    for attempt in 0..attempts {
        if check().await? {
            return Ok(());
        }
        if attempt + 1 < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Err(InstallerError::Timeout {
        resource: resource.to_string(),
        attempts,
    })
}

async fn wait_ready(executor: &dyn Executor, cfg: &InstallerConfig) -> Result<(), InstallerError> {
    poll_until(
        "k3s node",
        WAIT_READY_ATTEMPTS,
        WAIT_READY_INTERVAL,
        || async {
            if cfg.is_control_plane {
                let result = executor
                    .exec("k3s kubectl get nodes", COMMAND_TIMEOUT)
                    .await?;
                Ok(result.success())
            } else {
                let result = executor
                    .exec("systemctl is-active k3s-agent", COMMAND_TIMEOUT)
                    .await?;
                Ok(result.stdout.trim() == "active")
            }
        },
    )
    .await
}

async fn apply_vip(executor: &dyn Executor, cfg: &InstallerConfig) -> Result<(), InstallerError> {
    let iface = cfg.iface.clone().unwrap_or_default();
    let manifest = vip::generate(&cfg.vip, &iface)?;
    let command = format!(
        "cat <<'EOF' | sudo k3s kubectl apply -f -\n{manifest}\nEOF"
    );
    run_fatal(executor, &command, "apply kube-vip manifest").await?;

    poll_until("VIP", VIP_APPLY_ATTEMPTS, VIP_APPLY_INTERVAL, || async {
        let result = executor
            .exec(&format!("ip addr show | grep -q {}", cfg.vip), COMMAND_TIMEOUT)
            .await?;
        Ok(result.success())
    })
    .await
}

async fn verify(executor: &dyn Executor, cfg: &InstallerConfig) -> Result<(), InstallerError> {
    if cfg.is_control_plane {
        let command = format!(
            "k3s kubectl get node {} -o jsonpath='{{.metadata.labels.node-role\\.kubernetes\\.io/control-plane}}'",
            cfg.hostname
        );
        let result = executor.exec(&command, COMMAND_TIMEOUT).await?;
        if result.stdout.trim() != "true" {
            return Err(InstallerError::RemoteExit {
                intent: "verify control-plane label".to_string(),
                stderr: result.stderr,
            });
        }
        Ok(())
    } else {
        let journal = executor
            .exec(
                "journalctl -u k3s-agent --no-pager | grep -q 'successfully registered'",
                COMMAND_TIMEOUT,
            )
            .await?;
        if journal.success() {
            return Ok(());
        }
        let active = executor
            .exec("systemctl is-active k3s-agent", COMMAND_TIMEOUT)
            .await?;
        if active.stdout.trim() == "active" {
            Ok(())
        } else {
            Err(InstallerError::RemoteExit {
                intent: "verify worker registration".to_string(),
                stderr: active.stderr,
            })
        }
    }
}

/// Runs the state machine for one node.
pub async fn run(
    executor: &dyn Executor,
    cfg: &mut InstallerConfig,
) -> Result<InstallOutcome, InstallerError> {
    validate(cfg)?;

    if is_already_installed(executor, cfg.is_control_plane).await? {
        converge(executor, cfg).await?;
        return Ok(InstallOutcome {
            final_state: InstallerState::Done,
            converged: true,
        });
    }

    if cfg.is_control_plane && cfg.iface.is_none() {
        cfg.iface = Some(network::detect_default_interface(executor).await?);
    }

    configure_dns(executor, cfg).await?;
    write_registries(executor, cfg).await?;
    write_etcd_tuning(executor, cfg).await?;
    apply_apparmor_profile(executor).await;

    let command = install_command(cfg);
    run_fatal(executor, &command, "k3s install").await?;

    wait_ready(executor, cfg).await?;

    if cfg.is_control_plane {
        apply_vip(executor, cfg).await?;
    }

    verify(executor, cfg).await?;

    Ok(InstallOutcome {
        final_state: InstallerState::Done,
        converged: false,
    })
}

/// Update etcd tuning / registries if provided; restart k3s iff either
/// changed; wait ready; re-apply VIP manifests (CP) idempotently; no
/// forced restart of the cloud-provider.
async fn converge(executor: &dyn Executor, cfg: &InstallerConfig) -> Result<(), InstallerError> {
    let mut changed = false;

    if !cfg.etcd_tuning_args.is_empty() {
        write_etcd_tuning(executor, cfg).await?;
        changed = true;
    }
    if cfg.registries_extra_yaml.is_some() {
        write_registries(executor, cfg).await?;
        changed = true;
    }

    if changed {
        let unit = if cfg.is_control_plane { "k3s" } else { "k3s-agent" };
        run_fatal(
            executor,
            &format!("sudo systemctl restart {unit}"),
            "restart k3s after converge",
        )
        .await?;
    }

    wait_ready(executor, cfg).await?;

    if cfg.is_control_plane {
        apply_vip(executor, cfg).await?;
    }

    Ok(())
}
