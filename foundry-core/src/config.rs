//! Configuration loading (§10.3): a single YAML file carrying the host
//! inventory and cluster-wide settings, resolved the way the reference
//! CLI resolves its own config — an explicit flag falling back to a
//! dotfile under the user's config directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use foundry_common::Error as CoreError;

use crate::registry::{self, Host, RegistryError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub vip: String,
    #[serde(default)]
    pub dns_servers: Vec<String>,
    #[serde(default)]
    pub dns_domains: Vec<String>,
    #[serde(default)]
    pub tls_sans: Vec<String>,
    #[serde(default)]
    pub etcd_tuning_args: Vec<String>,
    #[serde(default)]
    pub registries_extra_yaml: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryFile {
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub hosts: Vec<Host>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid host in config: {0}")]
    InvalidHost(#[from] RegistryError),
    #[error("no VIP configured")]
    MissingVip,
}

impl From<ConfigError> for CoreError {
    fn from(e: ConfigError) -> Self {
        match &e {
            ConfigError::InvalidHost(_) | ConfigError::MissingVip => {
                CoreError::Validation(e.to_string())
            }
            ConfigError::Read { .. } | ConfigError::Parse { .. } => {
                CoreError::Environmental(e.to_string())
            }
        }
    }
}

const DEFAULT_CONFIG_SUBPATH: &str = "foundry/config.yaml";

/// `--config` flag if given, otherwise `$XDG_CONFIG_HOME/foundry/config.yaml`
/// or `$HOME/.config/foundry/config.yaml`.
pub fn resolve_path(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join(DEFAULT_CONFIG_SUBPATH);
        }
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".config").join(DEFAULT_CONFIG_SUBPATH)
}

/// Loads and validates every host the same way `HostRegistry::add` would —
/// no separate deserialization-time validation path.
pub fn load(path: &Path) -> Result<InventoryFile, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&raw, path)
}

fn parse(raw: &str, path: &Path) -> Result<InventoryFile, ConfigError> {
    let file: InventoryFile = serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    if file.cluster.vip.trim().is_empty() {
        return Err(ConfigError::MissingVip);
    }
    for host in &file.hosts {
        registry::validate(host)?;
    }
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
cluster:
  vip: 192.168.1.100
  dns_servers: ["1.1.1.1"]
hosts:
  - hostname: n1
    address: 10.0.0.1
    port: 22
    user: root
    key_configured: false
    roles: [cluster-control-plane]
    state: added
    labels: {}
"#;

    #[test]
    fn parses_a_minimal_inventory_file() {
        let file = parse(SAMPLE, Path::new("config.yaml")).unwrap();
        assert_eq!(file.cluster.vip, "192.168.1.100");
        assert_eq!(file.hosts.len(), 1);
        assert_eq!(file.hosts[0].hostname, "n1");
    }

    #[test]
    fn rejects_missing_vip() {
        let bad = "cluster:\n  vip: \"\"\nhosts: []\n";
        assert!(matches!(
            parse(bad, Path::new("config.yaml")),
            Err(ConfigError::MissingVip)
        ));
    }

    #[test]
    fn rejects_an_invalid_host_entry() {
        let bad = r#"
cluster:
  vip: 192.168.1.100
hosts:
  - hostname: "Not Valid!"
    address: 10.0.0.1
    port: 22
    user: root
    key_configured: false
    roles: []
    state: added
    labels: {}
"#;
        assert!(matches!(
            parse(bad, Path::new("config.yaml")),
            Err(ConfigError::InvalidHost(_))
        ));
    }

    #[test]
    fn resolve_path_prefers_explicit_flag() {
        let explicit = PathBuf::from("/tmp/custom.yaml");
        assert_eq!(resolve_path(Some(explicit.clone())), explicit);
    }
}
