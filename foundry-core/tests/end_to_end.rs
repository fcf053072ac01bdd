//! Literal end-to-end scenarios seeding the suite: each test below mirrors
//! one numbered scenario from the testable-properties section, run against
//! in-memory doubles so the full install/orchestrate/label path exercises
//! real module wiring without touching a network or a real cluster.

use foundry_core::k8s::ClusterHealth;
use foundry_core::orchestrator::{self, NodeHandle};
use foundry_core::registry::Host;
use foundry_core::secrets::fake::FakeSecretStore;
use foundry_core::test_support::{success, FakeHealthCheck, RecordingExecutor};
use foundry_core::{k8s, kubeconfig, tokens};

const VIP: &str = "192.168.1.100";

/// A `ClusterHealth` reporting `count` ready control-plane nodes, matching
/// what a live API server would report right after a clean join.
fn ready_health(count: usize) -> ClusterHealth {
    ClusterHealth {
        total: count,
        control_plane: count,
        worker: count,
        ready: count,
        not_ready: 0,
        overall_healthy: true,
        message: "all nodes ready".to_string(),
    }
}

fn cp_executor(hostname: &str) -> RecordingExecutor {
    RecordingExecutor::new()
        .script(
            "ip route show default | head -n1 | awk '{print $5}'",
            success("eth0"),
        )
        .script(
            format!(
                "k3s kubectl get node {hostname} -o jsonpath='{{.metadata.labels.node-role\\.kubernetes\\.io/control-plane}}'"
            ),
            success("true"),
        )
}

fn worker_executor() -> RecordingExecutor {
    RecordingExecutor::new()
        // First answer: the PROBE step sees the agent not yet active.
        .script("systemctl is-active k3s-agent", success("inactive"))
        // Second and every later answer: WAIT_READY sees it come up.
        .script("systemctl is-active k3s-agent", success("active"))
}

fn host(name: &str, address: &str) -> Host {
    Host::new(name, address, "root")
}

const SAMPLE_KUBECONFIG: &str =
    "apiVersion: v1\nclusters:\n- cluster:\n    server: https://127.0.0.1:6443\n  name: default\n";

/// Scenario 1: three-node HA init.
#[tokio::test(start_paused = true)]
async fn three_node_ha_init() {
    let executors = vec![
        cp_executor("n1").script("sudo cat /etc/rancher/k3s/k3s.yaml", success(SAMPLE_KUBECONFIG)),
        cp_executor("n2"),
        cp_executor("n3"),
    ];

    let hosts = vec![host("n1", "10.0.0.1"), host("n2", "10.0.0.2"), host("n3", "10.0.0.3")];
    let nodes: Vec<NodeHandle> = hosts
        .into_iter()
        .zip(executors.iter())
        .map(|(host, executor)| NodeHandle { host, executor })
        .collect();

    let store = FakeSecretStore::default();
    let overrides = vec![None, None, None];

    let checker = FakeHealthCheck(ready_health(3));
    let health = orchestrator::initialize_with_health_check(&nodes, VIP, &store, &overrides, &checker)
        .await
        .unwrap();
    assert_eq!(health.total, 3);
    assert_eq!(health.control_plane, 3);
    assert_eq!(health.worker, 3);
    assert!(health.overall_healthy);

    let issued_tokens = tokens::ensure_tokens(&store).await.unwrap();

    let first_install = executors[0].find("get.k3s.io").expect("first CP ran an install command");
    assert!(first_install.contains("--cluster-init"));
    assert!(first_install.contains(&format!("--token {}", issued_tokens.cluster_token.0)));
    assert!(first_install.contains(&format!("--agent-token {}", issued_tokens.agent_token.0)));
    assert!(first_install.contains(&format!("--tls-san {VIP}")));
    assert!(first_install.contains("--disable=traefik"));
    assert!(first_install.contains("--disable=servicelb"));
    assert!(!first_install.contains("--server"));

    for executor in &executors[1..] {
        let join_install = executor.find("get.k3s.io").expect("joining CP ran an install command");
        assert!(join_install.contains(&format!("--server https://{VIP}:6443")));
        assert!(!join_install.contains("--cluster-init"));
    }

    let stored = kubeconfig::load(&store).await.unwrap();
    assert!(stored.contains(&format!("https://{VIP}:6443")));
    assert!(!stored.contains("127.0.0.1"));
}

/// Scenario 2: single-node cluster.
#[tokio::test(start_paused = true)]
async fn single_node_cluster() {
    let executor = cp_executor("solo").script("sudo cat /etc/rancher/k3s/k3s.yaml", success(SAMPLE_KUBECONFIG));

    let nodes = vec![NodeHandle {
        host: host("solo", "10.0.0.9"),
        executor: &executor,
    }];
    let store = FakeSecretStore::default();

    let checker = FakeHealthCheck(ready_health(1));
    let health = orchestrator::initialize_with_health_check(&nodes, VIP, &store, &[None], &checker)
        .await
        .unwrap();
    assert_eq!(health.total, 1);
    assert_eq!(health.control_plane, 1);
    assert_eq!(health.worker, 1);

    let install = executor.find("get.k3s.io").unwrap();
    assert!(install.contains("--cluster-init"));
    assert!(!install.contains("--server"));

    kubeconfig::load(&store).await.unwrap();
}

/// Scenario 3: add a worker after three control planes are already up.
#[tokio::test(start_paused = true)]
async fn add_worker_after_three_control_planes() {
    let executor = worker_executor();
    let node = NodeHandle {
        host: host("n4", "10.0.0.4"),
        executor: &executor,
    };
    let store = FakeSecretStore::default();
    let tokens = tokens::ensure_tokens(&store).await.unwrap();

    orchestrator::add_node(&node, VIP, 3, None, &store).await.unwrap();

    let install = executor.find("K3S_URL").expect("worker ran an agent install command");
    assert!(install.contains(&format!("K3S_URL=https://{VIP}:6443")));
    assert!(install.contains(&format!("K3S_TOKEN={}", tokens.agent_token.0)));
}

/// Scenario 5: label round-trip, including the system-label rejection.
#[test]
fn label_round_trip_parsing() {
    let args = vec!["environment=production".to_string(), "zone-".to_string()];
    let parsed = k8s::parse_label_args(&args);

    assert_eq!(parsed.set.get("environment"), Some(&"production".to_string()));
    assert_eq!(parsed.remove, vec!["zone".to_string()]);

    assert!(k8s::is_system_label_key("kubernetes.io/hostname"));
}

/// Scenario 6: cluster health over the literal documented node set.
#[test]
fn cluster_health_matches_documented_scenario() {
    use std::collections::BTreeMap;

    fn node(name: &str, ready: bool, control_plane: bool) -> k8s::NodeInfo {
        let mut roles = Vec::new();
        if control_plane {
            roles.push("control-plane".to_string());
        }
        k8s::NodeInfo {
            name: name.to_string(),
            ready,
            roles,
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

    let nodes = vec![
        node("cp1", true, true),
        node("cp2", true, true),
        node("w1", false, false),
    ];
    let health = k8s::calculate_cluster_health(&nodes);

    assert_eq!(health.total, 3);
    assert_eq!(health.control_plane, 2);
    assert_eq!(health.worker, 3);
    assert_eq!(health.ready, 2);
    assert_eq!(health.not_ready, 1);
    assert!(!health.overall_healthy);
    assert_eq!(health.message, "1 node(s) not ready");
}
