//! Host Registry (C3): authoritative map from hostname to connection
//! parameters, role set, lifecycle state, and labels. Thread-safe,
//! validated, and sorted on enumeration.
//!
//! An `Arc<RwLock<HashMap<..>>>` whose readers get deep copies, never
//! aliases into the locked map.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use foundry_common::Error as CoreError;

/// Closed enumeration of roles a host may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostRole {
    Openbao,
    Dns,
    Zot,
    ClusterControlPlane,
    ClusterWorker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostState {
    Added,
    SshConfigured,
    Configured,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub hostname: String,
    pub address: String,
    pub port: u16,
    pub user: String,
    pub key_configured: bool,
    pub roles: Vec<HostRole>,
    pub state: HostState,
    pub labels: BTreeMap<String, String>,
}

impl Host {
    pub fn new(hostname: impl Into<String>, address: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            address: address.into(),
            port: 22,
            user: user.into(),
            key_configured: false,
            roles: Vec::new(),
            state: HostState::Added,
            labels: BTreeMap::new(),
        }
    }

    pub fn has_cluster_role(&self) -> bool {
        self.roles
            .iter()
            .any(|r| matches!(r, HostRole::ClusterControlPlane | HostRole::ClusterWorker))
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("host already exists: {0}")]
    AlreadyExists(String),
    #[error("host not found: {0}")]
    NotFound(String),
    #[error("invalid host: {0}")]
    Invalid(String),
}

impl From<RegistryError> for CoreError {
    fn from(e: RegistryError) -> Self {
        match &e {
            RegistryError::NotFound(h) => CoreError::NotFound(h.clone()),
            RegistryError::AlreadyExists(_) | RegistryError::Invalid(_) => {
                CoreError::Validation(e.to_string())
            }
        }
    }
}

fn hostname_regex() -> &'static Regex {
    // DNS-label shape.
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9]([-a-z0-9]{0,61}[a-z0-9])?$").unwrap())
}

/// `I6`: label keys may carry an optional DNS-subdomain prefix, then a
/// name part; values follow the same name-part rule and may be empty.
fn label_key_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([a-z0-9][-a-z0-9.]{0,251}[a-z0-9]/)?[A-Za-z0-9]([-A-Za-z0-9._]{0,61}[A-Za-z0-9])?$")
            .unwrap()
    })
}

fn label_value_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9]([-A-Za-z0-9._]{0,61}[A-Za-z0-9])?$").unwrap())
}

pub fn validate_label_key(key: &str) -> Result<(), RegistryError> {
    if !label_key_regex().is_match(key) {
        return Err(RegistryError::Invalid(format!("invalid label key: {key}")));
    }
    Ok(())
}

pub fn validate_label_value(value: &str) -> Result<(), RegistryError> {
    if value.is_empty() {
        return Ok(());
    }
    if !label_value_regex().is_match(value) {
        return Err(RegistryError::Invalid(format!(
            "invalid label value: {value}"
        )));
    }
    Ok(())
}

/// Validates a `Host`'s hostname shape, address, and label syntax.
pub fn validate(host: &Host) -> Result<(), RegistryError> {
    if !hostname_regex().is_match(&host.hostname) {
        return Err(RegistryError::Invalid(format!(
            "hostname does not match DNS-label shape: {}",
            host.hostname
        )));
    }
    if host.address.trim().is_empty() {
        return Err(RegistryError::Invalid("address must not be empty".into()));
    }
    if host.port == 0 {
        return Err(RegistryError::Invalid("port must be 1-65535".into()));
    }
    for (key, value) in &host.labels {
        validate_label_key(key)?;
        validate_label_value(value)?;
    }
    Ok(())
}

/// Thread-safe `hostname -> Host` map. All reads and writes serialize
/// through a single lock; reads return deep copies so callers cannot
/// mutate registry state by aliasing.
#[derive(Default)]
pub struct HostRegistry {
    hosts: Arc<RwLock<HashMap<String, Host>>>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, host: Host) -> Result<(), RegistryError> {
        validate(&host)?;
        let mut hosts = self.hosts.write().await;
        if hosts.contains_key(&host.hostname) {
            return Err(RegistryError::AlreadyExists(host.hostname));
        }
        hosts.insert(host.hostname.clone(), host);
        Ok(())
    }

    pub async fn get(&self, hostname: &str) -> Result<Host, RegistryError> {
        self.hosts
            .read()
            .await
            .get(hostname)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(hostname.to_string()))
    }

    /// Sorted by hostname.
    pub async fn list(&self) -> Vec<Host> {
        let hosts = self.hosts.read().await;
        let mut values: Vec<Host> = hosts.values().cloned().collect();
        values.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        values
    }

    pub async fn update(&self, host: Host) -> Result<(), RegistryError> {
        validate(&host)?;
        let mut hosts = self.hosts.write().await;
        if !hosts.contains_key(&host.hostname) {
            return Err(RegistryError::NotFound(host.hostname));
        }
        hosts.insert(host.hostname.clone(), host);
        Ok(())
    }

    pub async fn remove(&self, hostname: &str) -> Result<(), RegistryError> {
        let mut hosts = self.hosts.write().await;
        hosts
            .remove(hostname)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NotFound(hostname.to_string()))
    }

    pub async fn exists(&self, hostname: &str) -> bool {
        self.hosts.read().await.contains_key(hostname)
    }

    pub async fn count(&self) -> usize {
        self.hosts.read().await.len()
    }

    pub async fn clear(&self) {
        self.hosts.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str) -> Host {
        Host::new(name, "10.0.0.1", "root")
    }

    #[tokio::test]
    async fn add_then_get_round_trips() {
        let registry = HostRegistry::new();
        registry.add(host("n1")).await.unwrap();
        let fetched = registry.get("n1").await.unwrap();
        assert_eq!(fetched.hostname, "n1");
    }

    #[tokio::test]
    async fn add_of_duplicate_hostname_fails() {
        let registry = HostRegistry::new();
        registry.add(host("n1")).await.unwrap();
        let err = registry.add(host("n1")).await.unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn list_is_sorted_by_hostname() {
        let registry = HostRegistry::new();
        registry.add(host("n3")).await.unwrap();
        registry.add(host("n1")).await.unwrap();
        registry.add(host("n2")).await.unwrap();

        let names: Vec<String> = registry.list().await.into_iter().map(|h| h.hostname).collect();
        assert_eq!(names, vec!["n1", "n2", "n3"]);
    }

    #[tokio::test]
    async fn removing_unknown_host_is_not_found() {
        let registry = HostRegistry::new();
        let err = registry.remove("ghost").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn reads_are_deep_copies_not_aliases() {
        let registry = HostRegistry::new();
        registry.add(host("n1")).await.unwrap();

        let mut fetched = registry.get("n1").await.unwrap();
        fetched.address = "mutated".to_string();

        let refetched = registry.get("n1").await.unwrap();
        assert_eq!(refetched.address, "10.0.0.1");
    }

    #[tokio::test]
    async fn concurrent_adds_of_distinct_hostnames_all_succeed() {
        let registry = Arc::new(HostRegistry::new());
        let mut handles = Vec::new();
        for i in 0..20 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.add(host(&format!("n{i}"))).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(registry.count().await, 20);
        let names: Vec<String> = registry.list().await.into_iter().map(|h| h.hostname).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn label_value_of_63_chars_is_accepted_64_rejected() {
        let value_63 = "a".repeat(63);
        let value_64 = "a".repeat(64);
        assert!(validate_label_value(&value_63).is_ok());
        assert!(validate_label_value(&value_64).is_err());
    }

    #[test]
    fn invalid_hostname_fails_validation() {
        let mut h = host("Not_A_Valid_Hostname!");
        h.hostname = "Not_A_Valid_Hostname!".to_string();
        assert!(validate(&h).is_err());
    }
}
