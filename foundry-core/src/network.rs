//! Network Probe (C5): detects the primary route-bearing interface, its
//! MAC and current IPv4, on a remote host via the Remote Executor.

use std::time::Duration;

use regex::Regex;
use thiserror::Error;

use foundry_common::Error as CoreError;

use crate::ssh::{Executor, SshError};

#[derive(Debug, Error)]
pub enum NetworkProbeError {
    #[error("remote command failed: {0}")]
    Ssh(#[from] SshError),
    #[error("could not detect a default route-bearing interface")]
    NoDefaultInterface,
    #[error("interface {0} has no MAC address matching the expected shape")]
    MalformedMac(String),
}

impl From<NetworkProbeError> for CoreError {
    fn from(e: NetworkProbeError) -> Self {
        match &e {
            NetworkProbeError::Ssh(ssh) => ssh.clone_as_core(),
            NetworkProbeError::NoDefaultInterface | NetworkProbeError::MalformedMac(_) => {
                CoreError::Environmental(e.to_string())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    pub name: String,
    pub mac: Option<String>,
    pub ipv4: Option<String>,
    pub is_default: bool,
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

fn mac_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-9a-fA-F]{2}:){5}[0-9a-fA-F]{2}$").unwrap())
}

/// Detects the interface carrying the default route.
pub async fn detect_default_interface(
    executor: &dyn Executor,
) -> Result<String, NetworkProbeError> {
    let result = executor
        .exec(
            "ip route show default | head -n1 | awk '{print $5}'",
            PROBE_TIMEOUT,
        )
        .await?;
    let iface = result.stdout.trim().to_string();
    if iface.is_empty() {
        return Err(NetworkProbeError::NoDefaultInterface);
    }
    Ok(iface)
}

/// Reads the MAC address of `iface` from sysfs.
pub async fn detect_mac(
    executor: &dyn Executor,
    iface: &str,
) -> Result<String, NetworkProbeError> {
    let result = executor
        .exec(&format!("cat /sys/class/net/{iface}/address"), PROBE_TIMEOUT)
        .await?;
    let mac = result.stdout.trim().to_string();
    if !mac_regex().is_match(&mac) {
        return Err(NetworkProbeError::MalformedMac(mac));
    }
    Ok(mac)
}

/// Reads the first IPv4 address currently assigned to `iface`.
pub async fn detect_ipv4(
    executor: &dyn Executor,
    iface: &str,
) -> Result<Option<String>, NetworkProbeError> {
    let result = executor
        .exec(
            &format!("ip addr show {iface} | grep 'inet '"),
            PROBE_TIMEOUT,
        )
        .await?;
    let first_line = result.stdout.lines().next();
    let ip = first_line.and_then(|line| {
        line.split_whitespace()
            .find(|tok| tok.len() > 0 && tok.chars().next().unwrap().is_ascii_digit())
            .map(|cidr| cidr.split('/').next().unwrap_or(cidr).to_string())
    });
    Ok(ip)
}

/// Enumerates all non-loopback interfaces, best-effort per-interface
/// MAC/IP, marking whichever carries the default route.
pub async fn list_interfaces(
    executor: &dyn Executor,
) -> Result<Vec<InterfaceInfo>, NetworkProbeError> {
    let default_iface = detect_default_interface(executor).await.ok();

    let result = executor
        .exec("ip -o link show | awk -F': ' '{print $2}'", PROBE_TIMEOUT)
        .await?;

    let mut interfaces = Vec::new();
    for name in result.stdout.lines() {
        let name = name.trim().trim_end_matches("@NONE").to_string();
        if name.is_empty() || name == "lo" {
            continue;
        }
        let mac = detect_mac(executor, &name).await.ok();
        let ipv4 = detect_ipv4(executor, &name).await.ok().flatten();
        let is_default = default_iface.as_deref() == Some(name.as_str());
        interfaces.push(InterfaceInfo {
            name,
            mac,
            ipv4,
            is_default,
        });
    }
    Ok(interfaces)
}

// `SshError` doesn't implement `Clone` (it wraps `russh::Error`), so this
// helper reconstructs a core error from its rendered message instead of
// requiring `Clone` all the way down the SSH stack.
trait SshErrorCoreExt {
    fn clone_as_core(&self) -> CoreError;
}

impl SshErrorCoreExt for SshError {
    fn clone_as_core(&self) -> CoreError {
        CoreError::Environmental(self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::ExecResult;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct FakeExecutor(HashMap<String, ExecResult>);

    #[async_trait]
    impl Executor for FakeExecutor {
        async fn exec(&self, command: &str, _timeout: Duration) -> Result<ExecResult, SshError> {
            Ok(self.0.get(command).cloned().unwrap_or(ExecResult {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            }))
        }
    }

    #[tokio::test]
    async fn detect_default_interface_trims_and_errors_on_empty() {
        let mut responses = HashMap::new();
        responses.insert(
            "ip route show default | head -n1 | awk '{print $5}'".to_string(),
            ExecResult {
                stdout: "eth0\n".into(),
                stderr: String::new(),
                exit_code: 0,
            },
        );
        let exec = FakeExecutor(responses);
        let iface = detect_default_interface(&exec).await.unwrap();
        assert_eq!(iface, "eth0");
    }

    #[tokio::test]
    async fn detect_default_interface_errors_when_empty() {
        let exec = FakeExecutor(HashMap::new());
        let err = detect_default_interface(&exec).await.unwrap_err();
        assert!(matches!(err, NetworkProbeError::NoDefaultInterface));
    }

    #[tokio::test]
    async fn detect_mac_validates_shape() {
        let mut responses = HashMap::new();
        responses.insert(
            "cat /sys/class/net/eth0/address".to_string(),
            ExecResult {
                stdout: "aa:bb:cc:dd:ee:ff\n".into(),
                stderr: String::new(),
                exit_code: 0,
            },
        );
        let exec = FakeExecutor(responses);
        let mac = detect_mac(&exec, "eth0").await.unwrap();
        assert_eq!(mac, "aa:bb:cc:dd:ee:ff");
    }

    #[tokio::test]
    async fn detect_mac_rejects_malformed_output() {
        let mut responses = HashMap::new();
        responses.insert(
            "cat /sys/class/net/eth0/address".to_string(),
            ExecResult {
                stdout: "not-a-mac\n".into(),
                stderr: String::new(),
                exit_code: 0,
            },
        );
        let exec = FakeExecutor(responses);
        let err = detect_mac(&exec, "eth0").await.unwrap_err();
        assert!(matches!(err, NetworkProbeError::MalformedMac(_)));
    }

    #[tokio::test]
    async fn detect_ipv4_takes_first_match() {
        let mut responses = HashMap::new();
        responses.insert(
            "ip addr show eth0 | grep 'inet '".to_string(),
            ExecResult {
                stdout: "    inet 192.168.1.50/24 brd 192.168.1.255 scope global eth0\n".into(),
                stderr: String::new(),
                exit_code: 0,
            },
        );
        let exec = FakeExecutor(responses);
        let ip = detect_ipv4(&exec, "eth0").await.unwrap();
        assert_eq!(ip, Some("192.168.1.50".to_string()));
    }
}
