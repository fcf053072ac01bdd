//! Cluster Orchestrator (C11): sequences per-node installs into a working
//! cluster, adds/removes nodes after the fact, and reports health.
//!
//! Nodes join in a fixed order: the first control-plane node, a settle
//! delay, the remaining control planes, then the workers, each separated
//! by its own settle delay rather than a readiness poll.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use foundry_common::Error as CoreError;

use crate::installer::{self, InstallerConfig, InstallerError};
use crate::k8s::{self, ClusterHealth, K8sError};
use crate::kubeconfig::{self, KubeconfigError};
use crate::registry::{Host, HostRegistry, RegistryError};
use crate::roles::{self, RoleError};
use crate::secrets::{SecretStore, SecretStoreError};
use crate::ssh::Executor;
use crate::tokens::{self, ClusterTokens};

const FIRST_CP_SETTLE: Duration = Duration::from_secs(10);
const JOIN_SETTLE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("role planning error: {0}")]
    Role(#[from] RoleError),
    #[error("installer error on {host}: {source}")]
    Installer {
        host: String,
        #[source]
        source: InstallerError,
    },
    #[error("kubeconfig error: {0}")]
    Kubeconfig(#[from] KubeconfigError),
    #[error("kubernetes api error: {0}")]
    K8s(#[from] K8sError),
    #[error("token manager error: {0}")]
    Tokens(#[from] SecretStoreError),
    #[error("no control-plane host available")]
    NoControlPlane,
    #[error("could not build a kubernetes client from the retrieved kubeconfig: {0}")]
    KubeClient(String),
}

impl From<OrchestratorError> for CoreError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::Installer { source, .. } => source.into(),
            OrchestratorError::Registry(inner) => inner.into(),
            OrchestratorError::Role(inner) => inner.into(),
            OrchestratorError::Kubeconfig(inner) => inner.into(),
            OrchestratorError::K8s(inner) => inner.into(),
            OrchestratorError::Tokens(inner) => inner.into(),
            OrchestratorError::NoControlPlane => {
                CoreError::Validation("no control-plane host available".to_string())
            }
            OrchestratorError::KubeClient(msg) => CoreError::Environmental(msg),
        }
    }
}

/// A host paired with the executor used to reach it. The orchestrator
/// never dials hosts itself; that's the Remote Executor's job.
pub struct NodeHandle<'a> {
    pub host: Host,
    pub executor: &'a dyn Executor,
}

fn installer_config(
    host: &Host,
    vip: &str,
    role: roles::NodeRole,
    cluster_init: bool,
    server_url: Option<String>,
    tokens: &ClusterTokens,
    tls_sans: Vec<String>,
) -> InstallerConfig {
    InstallerConfig {
        hostname: host.hostname.clone(),
        vip: vip.to_string(),
        server_url,
        cluster_token: tokens.cluster_token.0.clone(),
        agent_token: tokens.agent_token.0.clone(),
        is_control_plane: role.is_control_plane,
        cluster_init,
        iface: None,
        dns_servers: Vec::new(),
        dns_domains: Vec::new(),
        tls_sans,
        disabled_components: Vec::new(),
        etcd_tuning_args: Vec::new(),
        registries_extra_yaml: None,
    }
}

async fn install_one(
    node: &NodeHandle<'_>,
    vip: &str,
    role: roles::NodeRole,
    cluster_init: bool,
    server_url: Option<String>,
    tokens: &ClusterTokens,
    tls_sans: Vec<String>,
) -> Result<(), OrchestratorError> {
    let mut cfg = installer_config(&node.host, vip, role, cluster_init, server_url, tokens, tls_sans);
    installer::run(node.executor, &mut cfg)
        .await
        .map(|_| ())
        .map_err(|source| OrchestratorError::Installer {
            host: node.host.hostname.clone(),
            source,
        })
}

/// Builds a `kube::Client` from a kubeconfig string rather than ambient
/// discovery, since the cluster a freshly-initialized client needs to talk
/// to didn't exist until the moment this kubeconfig was retrieved.
async fn client_from_kubeconfig(kubeconfig_yaml: &str) -> Result<kube::Client, OrchestratorError> {
    let kubeconfig = kube::config::Kubeconfig::from_yaml(kubeconfig_yaml)
        .map_err(|e| OrchestratorError::KubeClient(e.to_string()))?;
    let config = kube::Config::from_custom_kubeconfig(kubeconfig, &kube::config::KubeConfigOptions::default())
        .await
        .map_err(|e| OrchestratorError::KubeClient(e.to_string()))?;
    kube::Client::try_from(config).map_err(|e| OrchestratorError::KubeClient(e.to_string()))
}

/// Confirms a freshly-joined cluster is healthy. The only production
/// implementation, `LiveHealthCheck`, builds a `kube::Client` from the
/// kubeconfig `initialize` just retrieved and queries the live API server;
/// tests substitute a double that returns a canned result instead of
/// opening a socket.
#[async_trait::async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self, kubeconfig_yaml: &str) -> Result<ClusterHealth, OrchestratorError>;
}

pub struct LiveHealthCheck;

#[async_trait::async_trait]
impl HealthCheck for LiveHealthCheck {
    async fn check(&self, kubeconfig_yaml: &str) -> Result<ClusterHealth, OrchestratorError> {
        let client = client_from_kubeconfig(kubeconfig_yaml).await?;
        let nodes = k8s::list_nodes(&client).await?;
        Ok(k8s::calculate_cluster_health(&nodes))
    }
}

/// Brings up a brand-new cluster across `nodes` in inventory order:
/// tokens, first control-plane (`--cluster-init`), a 10s settle, the
/// remaining control planes in order (5s settle each), the workers in
/// order (5s settle each), kubeconfig retrieval/storage, and a live
/// health check against the API server reached through the
/// just-retrieved kubeconfig.
pub async fn initialize(
    nodes: &[NodeHandle<'_>],
    vip: &str,
    store: &dyn SecretStore,
    overrides: &[Option<String>],
) -> Result<ClusterHealth, OrchestratorError> {
    initialize_with_health_check(nodes, vip, store, overrides, &LiveHealthCheck).await
}

/// Same as `initialize`, with the post-join health check pluggable so
/// tests can verify the sequencing without dialing a real API server.
pub async fn initialize_with_health_check(
    nodes: &[NodeHandle<'_>],
    vip: &str,
    store: &dyn SecretStore,
    overrides: &[Option<String>],
    health_check: &dyn HealthCheck,
) -> Result<ClusterHealth, OrchestratorError> {
    let assigned = roles::plan(nodes.len(), overrides)?;
    let first_cp_index = roles::first_control_plane(&assigned).ok_or(OrchestratorError::NoControlPlane)?;

    let tokens = tokens::ensure_tokens(store).await?;

    let server_url = format!("https://{vip}:6443");
    let tls_sans: Vec<String> = nodes.iter().map(|n| n.host.address.clone()).collect();

    install_one(
        &nodes[first_cp_index],
        vip,
        assigned[first_cp_index],
        true,
        None,
        &tokens,
        tls_sans.clone(),
    )
    .await?;

    tokio::time::sleep(FIRST_CP_SETTLE).await;

    for (i, node) in nodes.iter().enumerate() {
        if i == first_cp_index || !assigned[i].is_control_plane {
            continue;
        }
        install_one(
            node,
            vip,
            assigned[i],
            false,
            Some(server_url.clone()),
            &tokens,
            tls_sans.clone(),
        )
        .await?;
        tokio::time::sleep(JOIN_SETTLE).await;
    }

    for (i, node) in nodes.iter().enumerate() {
        if assigned[i].is_control_plane {
            continue;
        }
        install_one(
            node,
            vip,
            assigned[i],
            false,
            Some(server_url.clone()),
            &tokens,
            tls_sans.clone(),
        )
        .await?;
        tokio::time::sleep(JOIN_SETTLE).await;
    }

    let kubeconfig_yaml = kubeconfig::retrieve_and_store(nodes[first_cp_index].executor, store, vip).await?;

    health_check.check(&kubeconfig_yaml).await
}

/// A preview of what `add_node`/`remove_node` would do, rendered by the
/// CLI instead of executed — the steps are descriptive, not a literal
/// command transcript, since the real commands depend on tokens minted
/// at execution time.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub hostname: String,
    pub steps: Vec<String>,
}

/// Builds the plan for joining `hostname` to the cluster without running
/// anything — same role derivation `add_node` uses.
pub fn plan_add_node(
    hostname: &str,
    vip: &str,
    existing_cp_count: usize,
    explicit_role: Option<&str>,
) -> Result<Plan, OrchestratorError> {
    let role = roles::plan_add_node(existing_cp_count, explicit_role)?;
    let server_url = format!("https://{vip}:6443");
    let steps = if role.is_control_plane {
        vec![format!(
            "join {hostname} as a control-plane node via {server_url}"
        )]
    } else {
        vec![format!("join {hostname} as a worker node via {server_url}")]
    };
    Ok(Plan {
        hostname: hostname.to_string(),
        steps,
    })
}

/// Builds the plan for removing `hostname` without running anything.
pub fn plan_remove_node(hostname: &str, has_cluster_role: bool) -> Plan {
    let mut steps = vec![
        format!("cordon {hostname}"),
        format!("drain {hostname} (evict pods, skip DaemonSet-owned ones)"),
        format!("delete the {hostname} node object from the API server"),
    ];
    steps.push(if has_cluster_role {
        format!("run k3s-uninstall.sh (falling back to k3s-agent-uninstall.sh) on {hostname} over SSH")
    } else {
        format!("run k3s-agent-uninstall.sh on {hostname} over SSH")
    });
    Plan {
        hostname: hostname.to_string(),
        steps,
    }
}

/// Installs a new node into an already-running cluster: plans its role
/// from the current control-plane count, installs it with `--server`
/// pointing at the VIP, and settles.
pub async fn add_node(
    node: &NodeHandle<'_>,
    vip: &str,
    existing_cp_count: usize,
    explicit_role: Option<&str>,
    store: &dyn SecretStore,
) -> Result<(), OrchestratorError> {
    let role = roles::plan_add_node(existing_cp_count, explicit_role)?;
    let tokens = tokens::ensure_tokens(store).await?;
    let server_url = format!("https://{vip}:6443");

    install_one(
        node,
        vip,
        role,
        false,
        Some(server_url),
        &tokens,
        vec![node.host.address.clone()],
    )
    .await?;

    tokio::time::sleep(JOIN_SETTLE).await;
    Ok(())
}

/// Removes a node from the cluster: cordon, drain, delete the Kubernetes
/// object, then run the upstream uninstall script over SSH.
pub async fn remove_node(
    client: &kube::Client,
    node: &NodeHandle<'_>,
    registry: &HostRegistry,
) -> Result<(), OrchestratorError> {
    let name = &node.host.hostname;
    k8s::cordon_node(client, name).await?;
    k8s::drain_node(client, name).await?;
    k8s::delete_node(client, name).await?;

    let uninstall_script = if node.host.has_cluster_role() {
        "sudo /usr/local/bin/k3s-uninstall.sh || sudo /usr/local/bin/k3s-agent-uninstall.sh"
    } else {
        "sudo /usr/local/bin/k3s-agent-uninstall.sh"
    };
    let _ = node
        .executor
        .exec(uninstall_script, Duration::from_secs(120))
        .await;

    registry.remove(name).await?;
    Ok(())
}

/// Reports current cluster health from the live API server.
pub async fn health(client: &kube::Client) -> Result<ClusterHealth, OrchestratorError> {
    let nodes = k8s::list_nodes(client).await?;
    Ok(k8s::calculate_cluster_health(&nodes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HostRole;
    use crate::secrets::fake::FakeSecretStore;
    use crate::ssh::{ExecResult, SshError};
    use async_trait::async_trait;
    use std::time::Duration as StdDuration;

    /// Returns a fixed `ClusterHealth` without building a `kube::Client` or
    /// dialing anything, so orchestration-sequencing tests don't need a
    /// live (or mocked) API server.
    struct FakeHealthCheck(ClusterHealth);

    #[async_trait]
    impl HealthCheck for FakeHealthCheck {
        async fn check(&self, _kubeconfig_yaml: &str) -> Result<ClusterHealth, OrchestratorError> {
            Ok(self.0.clone())
        }
    }

    struct ScriptedExecutor;

    #[async_trait]
    impl Executor for ScriptedExecutor {
        async fn exec(&self, _command: &str, _timeout: StdDuration) -> Result<ExecResult, SshError> {
            Ok(ExecResult {
                stdout: "active".to_string(),
                stderr: String::new(),
                exit_code: 0,
            })
        }
    }

    fn host(name: &str) -> Host {
        let mut h = Host::new(name, "10.0.0.1", "root");
        h.roles.push(HostRole::ClusterControlPlane);
        h
    }

    #[test]
    fn plan_add_node_before_three_cps_proposes_control_plane() {
        let plan = plan_add_node("n4", "192.168.1.100", 1, None).unwrap();
        assert_eq!(plan.hostname, "n4");
        assert!(plan.steps[0].contains("control-plane"));
        assert!(plan.steps[0].contains("https://192.168.1.100:6443"));
    }

    #[test]
    fn plan_add_node_after_three_cps_proposes_worker() {
        let plan = plan_add_node("n5", "192.168.1.100", 3, None).unwrap();
        assert!(plan.steps[0].contains("worker"));
    }

    #[test]
    fn plan_remove_node_lists_cordon_drain_delete_uninstall_in_order() {
        let plan = plan_remove_node("n1", true);
        assert_eq!(plan.steps.len(), 4);
        assert!(plan.steps[0].starts_with("cordon"));
        assert!(plan.steps[1].starts_with("drain"));
        assert!(plan.steps[2].starts_with("delete"));
        assert!(plan.steps[3].contains("k3s-uninstall.sh"));
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_three_nodes_produces_a_healthy_cluster() {
        let executors: Vec<ScriptedExecutor> = (0..3).map(|_| ScriptedExecutor).collect();
        let hosts = vec![host("n1"), host("n2"), host("n3")];
        let nodes: Vec<NodeHandle> = hosts
            .into_iter()
            .zip(executors.iter())
            .map(|(host, executor)| NodeHandle { host, executor })
            .collect();

        let store = FakeSecretStore::default();
        let overrides = vec![None, None, None];

        let expected = ClusterHealth {
            total: 3,
            control_plane: 3,
            worker: 3,
            ready: 3,
            not_ready: 0,
            overall_healthy: true,
            message: "all nodes ready".to_string(),
        };
        let checker = FakeHealthCheck(expected.clone());

        let health = initialize_with_health_check(&nodes, "192.168.1.100", &store, &overrides, &checker)
            .await
            .unwrap();

        assert_eq!(health, expected);
    }
}
