//! `host add|configure|list|sync-keys|migrate-keys`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use foundry_core::config::{self, InventoryFile};
use foundry_core::registry::Host;
use foundry_core::ssh::Executor as _;

use crate::output::{self, OutputFormat};
use crate::session;

#[derive(Subcommand)]
pub enum HostCommands {
    /// Add a host to the inventory file
    Add {
        hostname: String,
        address: String,
        #[arg(long, default_value = "root")]
        user: String,
        #[arg(long, default_value = "22")]
        port: u16,
    },
    /// Generate and install an SSH keypair on a host, replacing the
    /// password-bootstrap path with key-based auth
    Configure {
        hostname: String,
        #[arg(long)]
        insecure_host_keys: bool,
    },
    /// List hosts in the inventory file
    List,
    /// Ensure every inventoried host has a custodied keypair, generating
    /// and installing one where missing
    SyncKeys {
        #[arg(long)]
        insecure_host_keys: bool,
    },
    /// Force every custodied key from the filesystem backend into the
    /// secret store
    MigrateKeys,
}

#[derive(Tabled, Serialize)]
struct HostRow {
    hostname: String,
    address: String,
    port: u16,
    user: String,
    key_configured: bool,
    state: String,
}

impl From<Host> for HostRow {
    fn from(h: Host) -> Self {
        Self {
            hostname: h.hostname,
            address: h.address,
            port: h.port,
            user: h.user,
            key_configured: h.key_configured,
            state: format!("{:?}", h.state),
        }
    }
}

fn save(path: &PathBuf, inventory: &InventoryFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = serde_yaml::to_string(inventory)?;
    std::fs::write(path, yaml)?;
    Ok(())
}

pub async fn handle(command: HostCommands, config_path: Option<PathBuf>, format: &str) -> Result<()> {
    let format = OutputFormat::from_str(format);

    match command {
        HostCommands::Add {
            hostname,
            address,
            user,
            port,
        } => {
            let path = config::resolve_path(config_path);
            let mut inventory = config::load(&path).unwrap_or(InventoryFile {
                cluster: foundry_core::config::ClusterConfig {
                    vip: String::new(),
                    dns_servers: Vec::new(),
                    dns_domains: Vec::new(),
                    tls_sans: Vec::new(),
                    etcd_tuning_args: Vec::new(),
                    registries_extra_yaml: None,
                },
                hosts: Vec::new(),
            });

            let mut host = Host::new(&hostname, &address, &user);
            host.port = port;
            foundry_core::registry::validate(&host).context("validating new host entry")?;
            inventory.hosts.push(host);
            save(&path, &inventory)?;
            output::success(&format!("{hostname} added to {}", path.display()));
        }
        HostCommands::Configure {
            hostname,
            insecure_host_keys,
        } => {
            let (path, mut inventory) = session::load_inventory(config_path)?;
            let store = session::secret_store()?;
            let custodian = session::key_custodian(store);

            let host = inventory
                .hosts
                .iter()
                .find(|h| h.hostname == hostname)
                .cloned()
                .with_context(|| format!("{hostname} is not in the inventory"))?;

            let executor = session::connect(&host, &custodian, insecure_host_keys).await?;
            let kp = custodian.generate(&hostname);

            let install_command = format!(
                "mkdir -p ~/.ssh && chmod 700 ~/.ssh && echo '{}' >> ~/.ssh/authorized_keys && chmod 600 ~/.ssh/authorized_keys",
                kp.public_line
            );
            executor
                .exec(&install_command, std::time::Duration::from_secs(30))
                .await
                .context("installing public key on remote host")?;

            custodian.store(&hostname, &kp).await.context("custodying keypair")?;

            for h in inventory.hosts.iter_mut() {
                if h.hostname == hostname {
                    h.key_configured = true;
                    h.state = foundry_core::registry::HostState::SshConfigured;
                }
            }
            save(&path, &inventory)?;
            output::success(&format!("{hostname} configured for key-based access"));
        }
        HostCommands::List => {
            let (_, inventory) = session::load_inventory(config_path)?;
            let rows: Vec<HostRow> = inventory.hosts.into_iter().map(HostRow::from).collect();
            output::print_rows(rows, format)?;
        }
        HostCommands::SyncKeys { insecure_host_keys } => {
            let (path, mut inventory) = session::load_inventory(config_path)?;
            let store = session::secret_store()?;
            let custodian = session::key_custodian(store);

            for host in inventory.hosts.iter_mut() {
                if custodian.exists(&host.hostname).await.unwrap_or(false) {
                    continue;
                }
                let executor = session::connect(host, &custodian, insecure_host_keys).await?;
                let kp = custodian.generate(&host.hostname);
                let install_command = format!(
                    "mkdir -p ~/.ssh && chmod 700 ~/.ssh && echo '{}' >> ~/.ssh/authorized_keys && chmod 600 ~/.ssh/authorized_keys",
                    kp.public_line
                );
                executor
                    .exec(&install_command, std::time::Duration::from_secs(30))
                    .await
                    .context("installing public key on remote host")?;
                custodian.store(&host.hostname, &kp).await?;
                host.key_configured = true;
                host.state = foundry_core::registry::HostState::SshConfigured;
                output::success(&format!("{} configured", host.hostname));
            }
            save(&path, &inventory)?;
        }
        HostCommands::MigrateKeys => {
            let (_, inventory) = session::load_inventory(config_path)?;
            let store = session::secret_store()?;
            let custodian = session::key_custodian(store);

            for host in &inventory.hosts {
                match custodian.load(&host.hostname).await {
                    Ok(_) => output::success(&format!("{} migrated", host.hostname)),
                    Err(e) => output::warn(&format!("{}: {e}", host.hostname)),
                }
            }
        }
    }

    Ok(())
}
