//! Token Manager (C7): generates the cluster-token and agent-token once
//! per cluster, idempotent against the secret store.

use std::collections::HashMap;

use base64::Engine;
use rand::RngCore;

use foundry_common::Redacted;

use crate::secrets::{SecretStore, SecretStoreError, MOUNT};

pub const CLUSTER_TOKEN_PATH: &str = "k3s/cluster-token";
pub const AGENT_TOKEN_PATH: &str = "k3s/agent-token";

#[derive(Debug, Clone)]
pub struct ClusterTokens {
    pub cluster_token: Redacted<String>,
    pub agent_token: Redacted<String>,
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

async fn read_token(store: &dyn SecretStore, path: &str) -> Option<String> {
    match store.read_secret_v2(MOUNT, path).await {
        Ok(secret) => secret.data.get("token").filter(|v| !v.is_empty()).cloned(),
        Err(_) => None,
    }
}

/// Idempotent: returns the existing pair if both tokens are already
/// present and non-empty; otherwise generates, writes, and returns a fresh
/// pair.
pub async fn ensure_tokens(store: &dyn SecretStore) -> Result<ClusterTokens, SecretStoreError> {
    let existing_cluster = read_token(store, CLUSTER_TOKEN_PATH).await;
    let existing_agent = read_token(store, AGENT_TOKEN_PATH).await;

    if let (Some(cluster_token), Some(agent_token)) = (existing_cluster, existing_agent) {
        return Ok(ClusterTokens {
            cluster_token: Redacted(cluster_token),
            agent_token: Redacted(agent_token),
        });
    }

    let cluster_token = generate_token();
    let agent_token = generate_token();

    let mut cluster_data = HashMap::new();
    cluster_data.insert("token".to_string(), cluster_token.clone());
    store
        .write_secret_v2(MOUNT, CLUSTER_TOKEN_PATH, cluster_data)
        .await?;

    let mut agent_data = HashMap::new();
    agent_data.insert("token".to_string(), agent_token.clone());
    store
        .write_secret_v2(MOUNT, AGENT_TOKEN_PATH, agent_data)
        .await?;

    tracing::info!("cluster tokens generated");

    Ok(ClusterTokens {
        cluster_token: Redacted(cluster_token),
        agent_token: Redacted(agent_token),
    })
}
