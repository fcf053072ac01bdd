//! Secret Store Client (C4): KV-v2 semantics against an external secret
//! store (HashiCorp Vault / OpenBao wire-compatible). Used to custody join
//! tokens, the cluster kubeconfig, and per-host SSH keypairs.
//!
//! A token-authenticated `reqwest::Client` with a cached bearer token, and
//! typed read/write/delete methods against `/v1/{mount}/data/{path}` and
//! `/v1/{mount}/metadata/{path}`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use foundry_common::Error as CoreError;

pub const MOUNT: &str = "foundry-core";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretStoreConfig {
    pub address: String,
    pub token: String,
    pub namespace: Option<String>,
    pub tls_skip_verify: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretMetadata {
    pub created_time: String,
    pub deletion_time: Option<String>,
    pub destroyed: bool,
    pub version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    pub data: HashMap<String, String>,
    pub metadata: Option<SecretMetadata>,
}

#[derive(Debug, Error)]
pub enum SecretStoreError {
    #[error("secret store request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("secret store returned HTTP {status} for {path}")]
    Http { status: u16, path: String },
    #[error("malformed secret payload at {0}")]
    MalformedPayload(String),
    #[error("secret not found: {0}")]
    NotFound(String),
}

impl From<SecretStoreError> for CoreError {
    fn from(e: SecretStoreError) -> Self {
        match &e {
            SecretStoreError::NotFound(path) => CoreError::NotFound(path.clone()),
            _ => CoreError::Environmental(e.to_string()),
        }
    }
}

/// Capability interface the Token Manager, Key Custodian, and Kubeconfig
/// Custodian depend on. Concrete types are injected; tests substitute an
/// in-memory fake.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn read_secret_v2(&self, mount: &str, path: &str) -> Result<Secret, SecretStoreError>;
    async fn write_secret_v2(
        &self,
        mount: &str,
        path: &str,
        data: HashMap<String, String>,
    ) -> Result<(), SecretStoreError>;
    async fn delete_secret_v2(&self, mount: &str, path: &str) -> Result<(), SecretStoreError>;
}

pub struct HttpSecretStore {
    config: SecretStoreConfig,
    client: reqwest::Client,
}

impl HttpSecretStore {
    pub fn new(config: SecretStoreConfig) -> Result<Self, SecretStoreError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.tls_skip_verify)
            .build()?;
        Ok(Self { config, client })
    }

    fn data_url(&self, mount: &str, path: &str) -> String {
        format!("{}/v1/{}/data/{}", self.config.address, mount, path)
    }

    fn metadata_url(&self, mount: &str, path: &str) -> String {
        format!("{}/v1/{}/metadata/{}", self.config.address, mount, path)
    }

    fn with_namespace(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.namespace {
            Some(ns) => builder.header("X-Vault-Namespace", ns),
            None => builder,
        }
    }
}

#[async_trait]
impl SecretStore for HttpSecretStore {
    async fn read_secret_v2(&self, mount: &str, path: &str) -> Result<Secret, SecretStoreError> {
        let url = self.data_url(mount, path);
        let request = self
            .client
            .get(&url)
            .header("X-Vault-Token", &self.config.token);
        let response = self.with_namespace(request).send().await?;

        if response.status().as_u16() == 404 {
            return Err(SecretStoreError::NotFound(path.to_string()));
        }
        if !response.status().is_success() {
            return Err(SecretStoreError::Http {
                status: response.status().as_u16(),
                path: path.to_string(),
            });
        }

        let body: serde_json::Value = response.json().await?;

        let data: HashMap<String, String> = body["data"]["data"]
            .as_object()
            .ok_or_else(|| SecretStoreError::MalformedPayload(path.to_string()))?
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect();

        let metadata = body["data"]["metadata"].as_object().map(|meta| SecretMetadata {
            created_time: meta
                .get("created_time")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            deletion_time: meta
                .get("deletion_time")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            destroyed: meta
                .get("destroyed")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            version: meta.get("version").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        });

        Ok(Secret { data, metadata })
    }

    async fn write_secret_v2(
        &self,
        mount: &str,
        path: &str,
        data: HashMap<String, String>,
    ) -> Result<(), SecretStoreError> {
        let url = self.data_url(mount, path);
        let payload = serde_json::json!({ "data": data });
        let request = self
            .client
            .post(&url)
            .header("X-Vault-Token", &self.config.token)
            .json(&payload);
        let response = self.with_namespace(request).send().await?;

        if !response.status().is_success() {
            return Err(SecretStoreError::Http {
                status: response.status().as_u16(),
                path: path.to_string(),
            });
        }

        tracing::info!(path, "secret written");
        Ok(())
    }

    async fn delete_secret_v2(&self, mount: &str, path: &str) -> Result<(), SecretStoreError> {
        let url = self.metadata_url(mount, path);
        let request = self
            .client
            .delete(&url)
            .header("X-Vault-Token", &self.config.token);
        let response = self.with_namespace(request).send().await?;

        if response.status().as_u16() == 404 {
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(SecretStoreError::Http {
                status: response.status().as_u16(),
                path: path.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    //! In-memory `SecretStore` used by the orchestrator and installer test
    //! suites so they never touch the network.
    use super::*;
    use tokio::sync::RwLock;

    #[derive(Default)]
    pub struct FakeSecretStore {
        inner: RwLock<HashMap<(String, String), HashMap<String, String>>>,
    }

    #[async_trait]
    impl SecretStore for FakeSecretStore {
        async fn read_secret_v2(
            &self,
            mount: &str,
            path: &str,
        ) -> Result<Secret, SecretStoreError> {
            let key = (mount.to_string(), path.to_string());
            self.inner
                .read()
                .await
                .get(&key)
                .cloned()
                .map(|data| Secret {
                    data,
                    metadata: None,
                })
                .ok_or_else(|| SecretStoreError::NotFound(path.to_string()))
        }

        async fn write_secret_v2(
            &self,
            mount: &str,
            path: &str,
            data: HashMap<String, String>,
        ) -> Result<(), SecretStoreError> {
            let key = (mount.to_string(), path.to_string());
            self.inner.write().await.insert(key, data);
            Ok(())
        }

        async fn delete_secret_v2(&self, mount: &str, path: &str) -> Result<(), SecretStoreError> {
            let key = (mount.to_string(), path.to_string());
            self.inner.write().await.remove(&key);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeSecretStore;
    use super::*;

    #[tokio::test]
    async fn read_of_unwritten_path_is_not_found() {
        let store = FakeSecretStore::default();
        let err = store.read_secret_v2(MOUNT, "k3s/cluster-token").await.unwrap_err();
        assert!(matches!(err, SecretStoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let store = FakeSecretStore::default();
        let mut data = HashMap::new();
        data.insert("token".to_string(), "abc123".to_string());
        store
            .write_secret_v2(MOUNT, "k3s/cluster-token", data.clone())
            .await
            .unwrap();

        let secret = store.read_secret_v2(MOUNT, "k3s/cluster-token").await.unwrap();
        assert_eq!(secret.data.get("token"), Some(&"abc123".to_string()));
    }

    #[tokio::test]
    async fn delete_then_read_is_not_found_again() {
        let store = FakeSecretStore::default();
        let mut data = HashMap::new();
        data.insert("token".to_string(), "abc123".to_string());
        store
            .write_secret_v2(MOUNT, "k3s/agent-token", data)
            .await
            .unwrap();
        store.delete_secret_v2(MOUNT, "k3s/agent-token").await.unwrap();

        let err = store.read_secret_v2(MOUNT, "k3s/agent-token").await.unwrap_err();
        assert!(matches!(err, SecretStoreError::NotFound(_)));
    }
}
