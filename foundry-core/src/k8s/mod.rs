//! Kubernetes Operator (C12): node inventory, cordon/drain/delete, label
//! management, and cluster health, all against the live API server rather
//! than SSH.
//!
//! Drain evicts every non-DaemonSet pod through the eviction API and
//! force-deletes bare pods with no owning controller (grace period zero)
//! rather than skipping them, so a drain never stalls on an orphan.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::api::policy::v1::Eviction;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use thiserror::Error;

use foundry_common::Error as CoreError;

const DRAIN_POLL_ATTEMPTS: u32 = 30;
const DRAIN_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum K8sError {
    #[error("kubernetes api error: {0}")]
    Api(#[from] kube::Error),
    #[error("node not found: {0}")]
    NodeNotFound(String),
    #[error("drain of {node} did not finish after {attempts} retries")]
    DrainTimeout { node: String, attempts: u32 },
    #[error("cannot set system label: {0}")]
    SystemLabel(String),
}

impl From<K8sError> for CoreError {
    fn from(e: K8sError) -> Self {
        match &e {
            K8sError::NodeNotFound(n) => CoreError::NotFound(n.clone()),
            K8sError::DrainTimeout { node, attempts } => CoreError::ConvergenceTimeout {
                resource: format!("drain({node})"),
                attempts: *attempts,
            },
            K8sError::Api(_) => CoreError::Environmental(e.to_string()),
            K8sError::SystemLabel(_) => CoreError::Validation(e.to_string()),
        }
    }
}

/// Well-known prefixes Kubernetes itself reserves; never writable through
/// the label-management surface.
const SYSTEM_LABEL_PREFIXES: &[&str] = &[
    "kubernetes.io/",
    "node.kubernetes.io/",
    "beta.kubernetes.io/",
    "k3s.io/",
    "topology.kubernetes.io/",
    "failure-domain.beta.kubernetes.io/",
];

pub fn is_system_label_key(key: &str) -> bool {
    SYSTEM_LABEL_PREFIXES.iter().any(|prefix| key.starts_with(prefix))
}

/// Drops every system-prefixed key, leaving only operator-set labels.
pub fn filter_user_labels(labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    labels
        .iter()
        .filter(|(k, _)| !is_system_label_key(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// A parsed `label` CLI invocation: `key=value` tokens accumulate into
/// `set`, `key-` tokens accumulate into `remove`. Mixed sets and removes in
/// one invocation are allowed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LabelArgs {
    pub set: BTreeMap<String, String>,
    pub remove: Vec<String>,
}

/// `parse_label_args`: each token is either `<key>=<value>` (set) or
/// `<key>-` (remove).
pub fn parse_label_args(args: &[String]) -> LabelArgs {
    let mut parsed = LabelArgs::default();
    for token in args {
        if let Some((key, value)) = token.split_once('=') {
            parsed.set.insert(key.to_string(), value.to_string());
        } else if let Some(key) = token.strip_suffix('-') {
            parsed.remove.push(key.to_string());
        }
    }
    parsed
}

#[derive(Debug, Clone)]
pub struct NodeCondition {
    pub condition_type: String,
    pub status: String,
    pub reason: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub name: String,
    pub ready: bool,
    pub roles: Vec<String>,
    pub internal_ip: Option<String>,
    pub external_ip: Option<String>,
    pub os_image: Option<String>,
    pub kernel_version: Option<String>,
    pub container_runtime: Option<String>,
    pub kubelet_version: Option<String>,
    pub conditions: Vec<NodeCondition>,
    pub unschedulable: bool,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterHealth {
    pub total: usize,
    pub control_plane: usize,
    pub worker: usize,
    pub ready: usize,
    pub not_ready: usize,
    pub overall_healthy: bool,
    pub message: String,
}

fn node_roles(meta: &ObjectMeta) -> Vec<String> {
    meta.labels
        .as_ref()
        .map(|labels| {
            labels
                .keys()
                .filter_map(|key| key.strip_prefix("node-role.kubernetes.io/"))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn to_node_info(node: &Node) -> NodeInfo {
    let status = node.status.clone().unwrap_or_default();
    let spec = node.spec.clone().unwrap_or_default();

    let conditions: Vec<NodeCondition> = status
        .conditions
        .unwrap_or_default()
        .into_iter()
        .map(|c| NodeCondition {
            condition_type: c.type_,
            status: c.status,
            reason: c.reason,
            message: c.message,
        })
        .collect();

    let ready = conditions
        .iter()
        .any(|c| c.condition_type == "Ready" && c.status == "True");

    let addresses = status.addresses.unwrap_or_default();
    let internal_ip = addresses
        .iter()
        .find(|a| a.type_ == "InternalIP")
        .map(|a| a.address.clone());
    let external_ip = addresses
        .iter()
        .find(|a| a.type_ == "ExternalIP")
        .map(|a| a.address.clone());

    let info = status.node_info.clone();

    NodeInfo {
        name: node.metadata.name.clone().unwrap_or_default(),
        ready,
        roles: node_roles(&node.metadata),
        internal_ip,
        external_ip,
        os_image: info.as_ref().map(|i| i.os_image.clone()),
        kernel_version: info.as_ref().map(|i| i.kernel_version.clone()),
        container_runtime: info.as_ref().map(|i| i.container_runtime_version.clone()),
        kubelet_version: info.as_ref().map(|i| i.kubelet_version.clone()),
        conditions,
        unschedulable: spec.unschedulable.unwrap_or(false),
        labels: node.metadata.labels.clone().unwrap_or_default().into_iter().collect(),
    }
}

/// Lists every node in the cluster.
pub async fn list_nodes(client: &Client) -> Result<Vec<NodeInfo>, K8sError> {
    let api: Api<Node> = Api::all(client.clone());
    let nodes = api.list(&ListParams::default()).await?;
    Ok(nodes.items.iter().map(to_node_info).collect())
}

/// Fetches a single node by name.
pub async fn get_node(client: &Client, name: &str) -> Result<NodeInfo, K8sError> {
    let api: Api<Node> = Api::all(client.clone());
    let node = api
        .get(name)
        .await
        .map_err(|_| K8sError::NodeNotFound(name.to_string()))?;
    Ok(to_node_info(&node))
}

/// Sets `spec.unschedulable`.
async fn set_unschedulable(client: &Client, name: &str, unschedulable: bool) -> Result<(), K8sError> {
    let api: Api<Node> = Api::all(client.clone());
    let patch = serde_json::json!({ "spec": { "unschedulable": unschedulable } });
    api.patch(
        name,
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

pub async fn cordon_node(client: &Client, name: &str) -> Result<(), K8sError> {
    set_unschedulable(client, name, true).await
}

pub async fn uncordon_node(client: &Client, name: &str) -> Result<(), K8sError> {
    set_unschedulable(client, name, false).await
}

fn is_daemonset_owned(pod: &Pod) -> bool {
    pod.metadata
        .owner_references
        .as_ref()
        .map(|refs| refs.iter().any(|r| r.kind == "DaemonSet"))
        .unwrap_or(false)
}

fn is_bare(pod: &Pod) -> bool {
    pod.metadata
        .owner_references
        .as_ref()
        .map(|refs| refs.is_empty())
        .unwrap_or(true)
}

async fn evict_pod(client: &Client, pod: &Pod) -> Result<(), K8sError> {
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    let name = pod.metadata.name.clone().unwrap_or_default();
    let api: Api<Eviction> = Api::namespaced(client.clone(), &namespace);
    let eviction = Eviction {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.clone()),
            ..Default::default()
        },
        delete_options: None,
    };
    api.create(&PostParams::default(), &eviction).await?;
    Ok(())
}

async fn force_delete_pod(client: &Client, pod: &Pod) -> Result<(), K8sError> {
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    let name = pod.metadata.name.clone().unwrap_or_default();
    let api: Api<Pod> = Api::namespaced(client.clone(), &namespace);
    let params = DeleteParams {
        grace_period_seconds: Some(0),
        ..DeleteParams::default()
    };
    let _ = api.delete(&name, &params).await;
    Ok(())
}

async fn pods_on_node(client: &Client, node_name: &str) -> Result<Vec<Pod>, K8sError> {
    let api: Api<Pod> = Api::all(client.clone());
    let params = ListParams::default().fields(&format!("spec.nodeName={node_name}"));
    let pods = api.list(&params).await?;
    Ok(pods.items)
}

/// Cordons (if not already), then evicts every non-DaemonSet pod
/// (respecting PDBs via the eviction API), force-deletes bare pods with no
/// owning controller, and skips DaemonSet-owned pods entirely. Polls at a
/// fixed interval until the node carries no more evictable pods.
pub async fn drain_node(client: &Client, node_name: &str) -> Result<(), K8sError> {
    cordon_node(client, node_name).await?;

    let pods = pods_on_node(client, node_name).await?;
    for pod in &pods {
        if is_daemonset_owned(pod) {
            continue;
        }
        if is_bare(pod) {
            force_delete_pod(client, pod).await?;
        } else {
            evict_pod(client, pod).await?;
        }
    }

    for attempt in 0..DRAIN_POLL_ATTEMPTS {
        let remaining = pods_on_node(client, node_name)
            .await?
            .into_iter()
            .filter(|p| !is_daemonset_owned(p))
            .count();
        if remaining == 0 {
            return Ok(());
        }
        if attempt + 1 < DRAIN_POLL_ATTEMPTS {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    Err(K8sError::DrainTimeout {
        node: node_name.to_string(),
        attempts: DRAIN_POLL_ATTEMPTS,
    })
}

pub async fn delete_node(client: &Client, name: &str) -> Result<(), K8sError> {
    let api: Api<Node> = Api::all(client.clone());
    api.delete(name, &DeleteParams::default()).await?;
    Ok(())
}

/// Current label set of a node.
pub async fn get_node_labels(client: &Client, name: &str) -> Result<BTreeMap<String, String>, K8sError> {
    let info = get_node(client, name).await?;
    Ok(info.labels)
}

/// Merge-patches labels onto a node; an empty string value removes the key.
/// Rejects the whole batch if any key names a system-reserved prefix.
pub async fn label_node(
    client: &Client,
    name: &str,
    labels: &BTreeMap<String, String>,
) -> Result<(), K8sError> {
    if let Some(key) = labels.keys().find(|k| is_system_label_key(k)) {
        return Err(K8sError::SystemLabel(key.clone()));
    }

    let api: Api<Node> = Api::all(client.clone());
    let json_labels: serde_json::Map<String, serde_json::Value> = labels
        .iter()
        .map(|(k, v)| {
            if v.is_empty() {
                (k.clone(), serde_json::Value::Null)
            } else {
                (k.clone(), serde_json::Value::String(v.clone()))
            }
        })
        .collect();
    let patch = serde_json::json!({ "metadata": { "labels": json_labels } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// A node is "not ready" if its `Ready` condition isn't `True`;
/// `overall_healthy` is true iff every node is ready AND at least one
/// control-plane node exists.
pub fn calculate_cluster_health(nodes: &[NodeInfo]) -> ClusterHealth {
    let total = nodes.len();
    let control_plane = nodes
        .iter()
        .filter(|n| n.roles.iter().any(|r| r == "control-plane" || r == "master"))
        .count();
    // Every node in this design carries the worker role regardless of
    // control-plane status (see `roles::NodeRole`, which never produces
    // `is_worker: false`) — a k3s control-plane node schedules workloads
    // unless explicitly tainted.
    let worker = total;
    let ready = nodes.iter().filter(|n| n.ready).count();
    let not_ready = total - ready;

    let message = if control_plane == 0 {
        "no control-plane node present".to_string()
    } else if not_ready == 0 {
        "all nodes ready".to_string()
    } else {
        format!("{not_ready} node(s) not ready")
    };

    ClusterHealth {
        total,
        control_plane,
        worker,
        ready,
        not_ready,
        overall_healthy: not_ready == 0 && control_plane >= 1,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, ready: bool, roles: Vec<&str>) -> NodeInfo {
        NodeInfo {
            name: name.to_string(),
            ready,
            roles: roles.into_iter().map(str::to_string).collect(),
            internal_ip: None,
            external_ip: None,
            os_image: None,
            kernel_version: None,
            container_runtime: None,
            kubelet_version: None,
            conditions: Vec::new(),
            unschedulable: false,
            labels: BTreeMap::new(),
        }
    }

    #[test]
    fn health_matches_the_documented_scenario() {
        let nodes = vec![
            node("cp1", true, vec!["control-plane"]),
            node("cp2", true, vec!["control-plane"]),
            node("w1", false, vec![]),
        ];
        let health = calculate_cluster_health(&nodes);
        assert_eq!(health.total, 3);
        assert_eq!(health.control_plane, 2);
        assert_eq!(health.worker, 3);
        assert_eq!(health.ready, 2);
        assert_eq!(health.not_ready, 1);
        assert!(!health.overall_healthy);
        assert_eq!(health.message, "1 node(s) not ready");
    }

    #[test]
    fn health_of_all_ready_nodes_is_healthy() {
        let nodes = vec![node("cp1", true, vec!["control-plane"]), node("w1", true, vec![])];
        let health = calculate_cluster_health(&nodes);
        assert!(health.overall_healthy);
        assert_eq!(health.message, "all nodes ready");
    }

    #[test]
    fn health_of_empty_cluster_is_unhealthy_for_lack_of_a_control_plane() {
        let health = calculate_cluster_health(&[]);
        assert_eq!(health.total, 0);
        assert!(!health.overall_healthy);
        assert_eq!(health.message, "no control-plane node present");
    }

    #[test]
    fn system_label_keys_are_recognized_and_filtered() {
        assert!(is_system_label_key("kubernetes.io/hostname"));
        assert!(!is_system_label_key("node-role.kubernetes.io/control-plane"));
        assert!(is_system_label_key("k3s.io/internal-ip"));
        assert!(!is_system_label_key("environment"));

        let mut labels = BTreeMap::new();
        labels.insert("kubernetes.io/hostname".to_string(), "x".to_string());
        labels.insert("environment".to_string(), "production".to_string());
        let filtered = filter_user_labels(&labels);
        assert_eq!(filtered.len(), 1);
        assert!(filtered.contains_key("environment"));
    }

    #[test]
    fn parse_label_args_splits_sets_and_removes() {
        let args = vec!["environment=production".to_string(), "zone-".to_string()];
        let parsed = parse_label_args(&args);
        assert_eq!(parsed.set.get("environment"), Some(&"production".to_string()));
        assert_eq!(parsed.remove, vec!["zone".to_string()]);
    }
}
