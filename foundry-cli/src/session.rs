//! Wires a loaded inventory into the concrete types `foundry-core` needs:
//! a secret store client (config via environment, matching the reference
//! CLI's env-first credential resolution) and per-host SSH executors.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use foundry_core::config::{self, InventoryFile};
use foundry_core::keys::{HybridBackend, KeyCustodian};
use foundry_core::secrets::{HttpSecretStore, SecretStoreConfig};
use foundry_core::ssh::{ConnectOptions, HostKeyPolicy, SshExecutor};

pub fn key_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".config/foundry/keys")
}

pub fn load_inventory(config_path: Option<PathBuf>) -> Result<(PathBuf, InventoryFile)> {
    let path = config::resolve_path(config_path);
    let inventory = config::load(&path)
        .with_context(|| format!("loading inventory from {}", path.display()))?;
    Ok((path, inventory))
}

pub fn secret_store() -> Result<HttpSecretStore> {
    let address = std::env::var("FOUNDRY_SECRET_STORE_ADDR")
        .context("FOUNDRY_SECRET_STORE_ADDR must be set")?;
    let token =
        std::env::var("FOUNDRY_SECRET_STORE_TOKEN").context("FOUNDRY_SECRET_STORE_TOKEN must be set")?;
    let tls_skip_verify = std::env::var("FOUNDRY_SECRET_STORE_INSECURE_TLS").is_ok();
    let store = HttpSecretStore::new(SecretStoreConfig {
        address,
        token,
        namespace: std::env::var("FOUNDRY_SECRET_STORE_NAMESPACE").ok(),
        tls_skip_verify,
    })?;
    Ok(store)
}

pub fn key_custodian(
    store: HttpSecretStore,
) -> KeyCustodian<HybridBackend<HttpSecretStore>> {
    KeyCustodian::new(HybridBackend::new(store, key_dir()))
}

/// Connects to a host, bootstrapping with a password on first contact
/// (prompted via `rpassword`) if no key is custodied yet, otherwise using
/// the stored key directly.
pub async fn connect(
    host: &foundry_core::registry::Host,
    custodian: &KeyCustodian<HybridBackend<HttpSecretStore>>,
    insecure_host_keys: bool,
) -> Result<SshExecutor> {
    let policy = if insecure_host_keys {
        HostKeyPolicy::Insecure
    } else {
        HostKeyPolicy::AcceptNew
    };
    let opts = ConnectOptions {
        host: host.address.clone(),
        port: host.port,
        user: host.user.clone(),
        host_key_policy: policy,
        dial_timeout: Duration::from_secs(30),
    };

    if custodian.exists(&host.hostname).await.unwrap_or(false) {
        let kp = custodian
            .load(&host.hostname)
            .await
            .with_context(|| format!("loading custodied key for {}", host.hostname))?;
        let key = russh_keys::decode_secret_key(&kp.private_pem, None)
            .context("decoding custodied OpenSSH private key")?;
        let executor = SshExecutor::connect(&opts, None, Some(Arc::new(key)))
            .await
            .with_context(|| format!("connecting to {}", host.hostname))?;
        Ok(executor)
    } else {
        let prompt = format!("Password for {}@{}: ", host.user, host.address);
        let password = rpassword::prompt_password(prompt).context("reading password")?;
        let executor = SshExecutor::connect(&opts, Some(&password), None)
            .await
            .with_context(|| format!("connecting to {}", host.hostname))?;
        Ok(executor)
    }
}

pub async fn kube_client() -> Result<kube::Client> {
    kube::Client::try_default()
        .await
        .context("connecting to the Kubernetes API server")
}
