//! Kubeconfig Custodian (C9): extracts the cluster's kubeconfig from the
//! first control-plane node, rewrites the server URL to the VIP, and
//! stores it in the secret store.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

use foundry_common::Error as CoreError;

use crate::secrets::{SecretStore, SecretStoreError, MOUNT};
use crate::ssh::{Executor, SshError};

pub const KUBECONFIG_PATH: &str = "k3s/kubeconfig";
const LOOPBACK_SERVER: &str = "https://127.0.0.1:6443";
const READ_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum KubeconfigError {
    #[error("remote command failed: {0}")]
    Ssh(#[from] SshError),
    #[error("remote kubeconfig file was empty")]
    Empty,
    #[error("secret store error: {0}")]
    SecretStore(#[from] SecretStoreError),
    #[error("no kubeconfig stored")]
    NotStored,
}

impl From<KubeconfigError> for CoreError {
    fn from(e: KubeconfigError) -> Self {
        match &e {
            KubeconfigError::NotStored => CoreError::NotFound("k3s kubeconfig".to_string()),
            _ => CoreError::Environmental(e.to_string()),
        }
    }
}

/// Replaces every literal occurrence of the loopback server URL with the
/// VIP's; leaves every other byte intact.
pub fn rewrite_server(kubeconfig: &str, vip: &str) -> String {
    kubeconfig.replace(LOOPBACK_SERVER, &format!("https://{vip}:6443"))
}

/// Reads `/etc/rancher/k3s/k3s.yaml` with sudo on the first control-plane
/// node, rewrites the server URL to the VIP, and stores it under
/// `k3s/kubeconfig`.
pub async fn retrieve_and_store(
    executor: &dyn Executor,
    store: &dyn SecretStore,
    vip: &str,
) -> Result<String, KubeconfigError> {
    let result = executor
        .exec("sudo cat /etc/rancher/k3s/k3s.yaml", READ_TIMEOUT)
        .await?;
    let raw = result.stdout.trim();
    if raw.is_empty() {
        return Err(KubeconfigError::Empty);
    }

    let rewritten = rewrite_server(raw, vip);

    let mut data = HashMap::new();
    data.insert("kubeconfig".to_string(), rewritten.clone());
    store.write_secret_v2(MOUNT, KUBECONFIG_PATH, data).await?;

    Ok(rewritten)
}

/// Loads the stored kubeconfig, or a distinguished not-found error if
/// absent or empty.
pub async fn load(store: &dyn SecretStore) -> Result<String, KubeconfigError> {
    match store.read_secret_v2(MOUNT, KUBECONFIG_PATH).await {
        Ok(secret) => secret
            .data
            .get("kubeconfig")
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or(KubeconfigError::NotStored),
        Err(SecretStoreError::NotFound(_)) => Err(KubeconfigError::NotStored),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::fake::FakeSecretStore;
    use crate::ssh::ExecResult;
    use async_trait::async_trait;

    struct FakeExecutor(String);

    #[async_trait]
    impl Executor for FakeExecutor {
        async fn exec(&self, _command: &str, _timeout: Duration) -> Result<ExecResult, SshError> {
            Ok(ExecResult {
                stdout: self.0.clone(),
                stderr: String::new(),
                exit_code: 0,
            })
        }
    }

    const SAMPLE: &str = "apiVersion: v1\nclusters:\n- cluster:\n    server: https://127.0.0.1:6443\n  name: default\n";

    #[test]
    fn rewrite_replaces_every_loopback_occurrence_and_nothing_else() {
        let doubled = format!("{SAMPLE}{SAMPLE}");
        let rewritten = rewrite_server(&doubled, "192.168.1.100");
        assert_eq!(rewritten.matches("https://127.0.0.1:6443").count(), 0);
        assert_eq!(
            rewritten.matches("https://192.168.1.100:6443").count(),
            2
        );
        assert!(rewritten.contains("apiVersion: v1"));
    }

    #[tokio::test]
    async fn retrieve_and_store_round_trips_through_load() {
        let executor = FakeExecutor(SAMPLE.to_string());
        let store = FakeSecretStore::default();

        let stored = retrieve_and_store(&executor, &store, "192.168.1.100")
            .await
            .unwrap();
        assert!(stored.contains("https://192.168.1.100:6443"));

        let loaded = load(&store).await.unwrap();
        assert_eq!(loaded, stored);
    }

    #[tokio::test]
    async fn retrieve_fails_on_empty_remote_file() {
        let executor = FakeExecutor(String::new());
        let store = FakeSecretStore::default();
        let err = retrieve_and_store(&executor, &store, "192.168.1.100")
            .await
            .unwrap_err();
        assert!(matches!(err, KubeconfigError::Empty));
    }

    #[tokio::test]
    async fn load_before_any_store_is_not_stored() {
        let store = FakeSecretStore::default();
        let err = load(&store).await.unwrap_err();
        assert!(matches!(err, KubeconfigError::NotStored));
    }
}
