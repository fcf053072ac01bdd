//! `cluster init|status|node add|node remove|node list|node label`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use foundry_core::orchestrator::{self, NodeHandle};
use foundry_core::{k8s, registry::HostRegistry};

use crate::output::{self, OutputFormat};
use crate::session;

#[derive(Subcommand)]
pub enum NodeCommands {
    /// Add a node to an already-running cluster
    Add {
        hostname: String,
        #[arg(long)]
        role: Option<String>,
        /// Print the planned action without connecting to the host
        #[arg(long)]
        dry_run: bool,
    },
    /// Cordon, drain, and remove a node
    Remove {
        hostname: String,
        #[arg(long)]
        yes: bool,
        /// Print the planned action without connecting to anything
        #[arg(long)]
        dry_run: bool,
    },
    /// List nodes in the live cluster
    List,
    /// Set or clear labels on a node
    Label {
        hostname: String,
        /// `key=value` pairs; `key-` clears the label
        labels: Vec<String>,
        /// Print the node's current labels instead of changing anything
        #[arg(long)]
        list: bool,
        /// Persist the change back to the host's inventory entry
        #[arg(long)]
        save: bool,
        /// With `--list`, hide Kubernetes/k3s system-prefixed labels
        #[arg(long)]
        user_only: bool,
    },
}

#[derive(Subcommand)]
pub enum ClusterCommands {
    /// Provision a brand-new cluster from the inventory file
    Init,
    /// Report live cluster health
    Status,
    /// Node lifecycle operations
    Node {
        #[command(subcommand)]
        command: NodeCommands,
    },
}

#[derive(Tabled, Serialize)]
struct NodeRow {
    name: String,
    ready: String,
    roles: String,
    internal_ip: String,
}

impl From<k8s::NodeInfo> for NodeRow {
    fn from(n: k8s::NodeInfo) -> Self {
        Self {
            name: n.name,
            ready: if n.ready { "Ready".to_string() } else { "NotReady".to_string() },
            roles: if n.roles.is_empty() {
                "worker".to_string()
            } else {
                n.roles.join(",")
            },
            internal_ip: n.internal_ip.unwrap_or_default(),
        }
    }
}

#[derive(Tabled, Serialize)]
struct LabelRow {
    key: String,
    value: String,
}

/// Combines `parse_label_args`'s set/remove halves into the single
/// `label_node` map (an empty value clears the key).
fn parse_labels(pairs: &[String]) -> BTreeMap<String, String> {
    let parsed = k8s::parse_label_args(pairs);
    let mut combined = parsed.set;
    for key in parsed.remove {
        combined.insert(key, String::new());
    }
    combined
}

pub async fn handle(
    command: ClusterCommands,
    config_path: Option<PathBuf>,
    format: &str,
    insecure_host_keys: bool,
) -> Result<()> {
    let format = OutputFormat::from_str(format);

    match command {
        ClusterCommands::Init => {
            let (_, inventory) = session::load_inventory(config_path)?;
            let store = session::secret_store()?;
            let custodian = session::key_custodian(session::secret_store()?);

            let mut executors = Vec::new();
            for host in &inventory.hosts {
                executors.push(session::connect(host, &custodian, insecure_host_keys).await?);
            }
            let nodes: Vec<NodeHandle> = inventory
                .hosts
                .iter()
                .cloned()
                .zip(executors.iter())
                .map(|(host, executor)| NodeHandle { host, executor })
                .collect();

            let overrides = vec![None; nodes.len()];
            let spinner = output::spinner("provisioning cluster nodes...");
            let result =
                orchestrator::initialize(&nodes, &inventory.cluster.vip, &store, &overrides).await;
            spinner.finish_and_clear();
            let health = result.context("initializing cluster")?;
            output::print_single(&health_json(&health), format)?;
            output::success("cluster initialized");
        }
        ClusterCommands::Status => {
            let client = session::kube_client().await?;
            let health = orchestrator::health(&client).await.context("fetching cluster health")?;
            output::print_single(&health_json(&health), format)?;
        }
        ClusterCommands::Node { command } => match command {
            NodeCommands::Add { hostname, role, dry_run } => {
                let (_, inventory) = session::load_inventory(config_path)?;

                let existing_cp = inventory
                    .hosts
                    .iter()
                    .filter(|h| h.has_cluster_role())
                    .count();

                if dry_run {
                    let plan = orchestrator::plan_add_node(
                        &hostname,
                        &inventory.cluster.vip,
                        existing_cp,
                        role.as_deref(),
                    )
                    .context("planning add-node")?;
                    output::print_single(&plan, format)?;
                    return Ok(());
                }

                let store = session::secret_store()?;
                let custodian = session::key_custodian(session::secret_store()?);

                let host = inventory
                    .hosts
                    .iter()
                    .find(|h| h.hostname == hostname)
                    .cloned()
                    .with_context(|| format!("{hostname} is not in the inventory"))?;
                let executor = session::connect(&host, &custodian, insecure_host_keys).await?;
                let node = NodeHandle { host, executor: &executor };

                let spinner = output::spinner(&format!("joining {hostname} to the cluster..."));
                let result =
                    orchestrator::add_node(&node, &inventory.cluster.vip, existing_cp, role.as_deref(), &store)
                        .await;
                spinner.finish_and_clear();
                result.context("adding node")?;
                output::success(&format!("{hostname} added to the cluster"));
            }
            NodeCommands::Remove { hostname, yes, dry_run } => {
                let (path, mut inventory) = session::load_inventory(config_path)?;

                if dry_run {
                    let has_cluster_role = inventory
                        .hosts
                        .iter()
                        .find(|h| h.hostname == hostname)
                        .map(|h| h.has_cluster_role())
                        .unwrap_or(false);
                    let plan = orchestrator::plan_remove_node(&hostname, has_cluster_role);
                    output::print_single(&plan, format)?;
                    return Ok(());
                }

                if !yes
                    && !dialoguer::Confirm::new()
                        .with_prompt(format!("Remove {hostname} from the cluster?"))
                        .default(false)
                        .interact()?
                {
                    output::warn("aborted");
                    return Ok(());
                }

                let custodian = session::key_custodian(session::secret_store()?);
                let host = inventory
                    .hosts
                    .iter()
                    .find(|h| h.hostname == hostname)
                    .cloned()
                    .with_context(|| format!("{hostname} is not in the inventory"))?;
                let executor = session::connect(&host, &custodian, insecure_host_keys).await?;
                let node = NodeHandle { host, executor: &executor };

                let client = session::kube_client().await?;
                let registry = HostRegistry::new();
                registry.add(node.host.clone()).await.context("seeding host registry")?;

                let spinner = output::spinner(&format!("removing {hostname} from the cluster..."));
                let result = orchestrator::remove_node(&client, &node, &registry).await;
                spinner.finish_and_clear();
                result.context("removing node")?;

                inventory.hosts.retain(|h| h.hostname != hostname);
                let yaml = serde_yaml::to_string(&inventory)?;
                std::fs::write(&path, yaml)?;
                output::success(&format!("{hostname} removed from the cluster"));
            }
            NodeCommands::List => {
                let client = session::kube_client().await?;
                let nodes = k8s::list_nodes(&client).await.context("listing nodes")?;
                let rows: Vec<NodeRow> = nodes.into_iter().map(NodeRow::from).collect();
                output::print_rows(rows, format)?;
            }
            NodeCommands::Label {
                hostname,
                labels,
                list,
                save,
                user_only,
            } => {
                let client = session::kube_client().await?;

                if list {
                    let current = k8s::get_node_labels(&client, &hostname)
                        .await
                        .context("fetching node labels")?;
                    let current = if user_only { k8s::filter_user_labels(&current) } else { current };
                    let rows: Vec<LabelRow> = current
                        .into_iter()
                        .map(|(key, value)| LabelRow { key, value })
                        .collect();
                    output::print_rows(rows, format)?;
                    return Ok(());
                }

                let parsed = parse_labels(&labels);
                k8s::label_node(&client, &hostname, &parsed)
                    .await
                    .context("labeling node")?;

                if save {
                    let (path, mut inventory) = session::load_inventory(config_path)?;
                    let host = inventory
                        .hosts
                        .iter_mut()
                        .find(|h| h.hostname == hostname)
                        .with_context(|| format!("{hostname} is not in the inventory"))?;
                    for (key, value) in &parsed {
                        if value.is_empty() {
                            host.labels.remove(key);
                        } else {
                            host.labels.insert(key.clone(), value.clone());
                        }
                    }
                    let yaml = serde_yaml::to_string(&inventory)?;
                    std::fs::write(&path, yaml)?;
                }

                output::success(&format!("labels updated on {hostname}"));
            }
        },
    }

    Ok(())
}

#[derive(Serialize)]
struct HealthJson {
    total: usize,
    control_plane: usize,
    worker: usize,
    ready: usize,
    not_ready: usize,
    overall_healthy: bool,
    message: String,
}

fn health_json(h: &k8s::ClusterHealth) -> HealthJson {
    HealthJson {
        total: h.total,
        control_plane: h.control_plane,
        worker: h.worker,
        ready: h.ready,
        not_ready: h.not_ready,
        overall_healthy: h.overall_healthy,
        message: h.message.clone(),
    }
}
