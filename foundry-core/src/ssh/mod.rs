//! Remote Executor (C1): one-shot command execution on a remote host with
//! stdout/stderr/exit capture, timeouts, and a password-then-key
//! credential-bootstrap path.
//!
//! `exit_code` is always populated and a non-zero exit is never an error on
//! its own — only connection faults (dial, auth, session, timeout) are.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};
use thiserror::Error;
use tokio::time::timeout;

use foundry_common::{Error as CoreError, Result as CoreResult};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Host-key verification policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Trust-on-first-use: accept and pin an unseen key, reject a change.
    AcceptNew,
    /// Require a key already known to the caller's host-key store.
    Strict,
    /// Accept any key. Never the default; the CLI gates this behind an
    /// explicit flag.
    Insecure,
}

/// Bootstrap credential for a session. `Password` is used only on first
/// contact, before a per-host key has been installed and custodied.
pub enum Auth {
    Password(String),
    PrivateKey(Arc<KeyPair>),
}

#[derive(Debug, Clone)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Error)]
pub enum SshError {
    #[error("failed to dial {host}:{port}: {source}")]
    Dial {
        host: String,
        port: u16,
        #[source]
        source: russh::Error,
    },
    #[error("authentication to {user}@{host} failed")]
    Auth { host: String, user: String },
    #[error("host key for {host} was rejected by policy {policy:?}")]
    HostKeyRejected { host: String, policy: HostKeyPolicyDebug },
    #[error("session error on {host}: {source}")]
    Session {
        host: String,
        #[source]
        source: russh::Error,
    },
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
}

/// `HostKeyPolicy` isn't `Debug` by itself in a way worth exposing in error
/// text beyond its variant name; this newtype keeps the error enum's
/// `#[derive(Error)]` simple.
#[derive(Debug, Clone, Copy)]
pub struct HostKeyPolicyDebug(pub HostKeyPolicy);

impl From<SshError> for CoreError {
    fn from(e: SshError) -> Self {
        match &e {
            SshError::Timeout(_) => CoreError::Environmental(e.to_string()),
            _ => CoreError::Environmental(e.to_string()),
        }
    }
}

/// Capability interface the installer and orchestrator depend on. Concrete
/// types are injected; tests substitute a fake that never touches the
/// network.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn exec(&self, command: &str, timeout: Duration) -> Result<ExecResult, SshError>;

    /// Runs each command in order, stopping at the first non-zero exit.
    async fn exec_multiple(
        &self,
        commands: &[&str],
        timeout: Duration,
    ) -> Result<Vec<ExecResult>, SshError> {
        let mut results = Vec::with_capacity(commands.len());
        for cmd in commands {
            let res = self.exec(cmd, timeout).await?;
            let failed = !res.success();
            results.push(res);
            if failed {
                break;
            }
        }
        Ok(results)
    }
}

struct TofuHandler {
    host: String,
    policy: HostKeyPolicy,
    known: Arc<tokio::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>>,
}

impl client::Handler for TofuHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        match self.policy {
            HostKeyPolicy::Insecure => Ok(true),
            HostKeyPolicy::AcceptNew | HostKeyPolicy::Strict => {
                let fingerprint = server_public_key.fingerprint();
                let mut known = self.known.lock().await;
                match known.get(&self.host) {
                    Some(pinned) => Ok(pinned.as_slice() == fingerprint.as_bytes()),
                    None => {
                        if matches!(self.policy, HostKeyPolicy::Strict) {
                            Ok(false)
                        } else {
                            known.insert(self.host.clone(), fingerprint.as_bytes().to_vec());
                            Ok(true)
                        }
                    }
                }
            }
        }
    }
}

/// SSH connection parameters for one host.
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub host_key_policy: HostKeyPolicy,
    pub dial_timeout: Duration,
}

/// Opens one persistent SSH session per `SshExecutor` instance; every
/// `Exec` call opens its own channel on that session rather than dialing a
/// new TCP connection per command.
pub struct SshExecutor {
    handle: Handle<TofuHandler>,
}

impl SshExecutor {
    /// Dials and authenticates, trying `password` first if supplied (the
    /// bootstrap path) and falling back to `key` otherwise.
    pub async fn connect(
        opts: &ConnectOptions,
        password: Option<&str>,
        key: Option<Arc<KeyPair>>,
    ) -> Result<Self, SshError> {
        let config = Arc::new(client::Config::default());
        let known = Arc::new(tokio::sync::Mutex::new(std::collections::HashMap::new()));
        let handler = TofuHandler {
            host: opts.host.clone(),
            policy: opts.host_key_policy,
            known,
        };

        let addr = (opts.host.as_str(), opts.port);
        let mut handle = timeout(opts.dial_timeout, client::connect(config, addr, handler))
            .await
            .map_err(|_| SshError::Timeout(opts.dial_timeout))?
            .map_err(|source| SshError::Dial {
                host: opts.host.clone(),
                port: opts.port,
                source,
            })?;

        let mut authenticated = false;
        if let Some(password) = password {
            authenticated = handle
                .authenticate_password(&opts.user, password)
                .await
                .map_err(|source| SshError::Session {
                    host: opts.host.clone(),
                    source,
                })?;
        }
        if !authenticated {
            if let Some(key) = key {
                authenticated = handle
                    .authenticate_publickey(&opts.user, key)
                    .await
                    .map_err(|source| SshError::Session {
                        host: opts.host.clone(),
                        source,
                    })?;
            }
        }

        if !authenticated {
            return Err(SshError::Auth {
                host: opts.host.clone(),
                user: opts.user.clone(),
            });
        }

        Ok(Self { handle })
    }
}

#[async_trait]
impl Executor for SshExecutor {
    async fn exec(&self, command: &str, cmd_timeout: Duration) -> Result<ExecResult, SshError> {
        let work = async {
            let mut channel =
                self.handle
                    .channel_open_session()
                    .await
                    .map_err(|source| SshError::Session {
                        host: "session".to_string(),
                        source,
                    })?;
            channel
                .exec(true, command)
                .await
                .map_err(|source| SshError::Session {
                    host: "session".to_string(),
                    source,
                })?;

            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let mut exit_code = 0i32;

            loop {
                match channel.wait().await {
                    Some(ChannelMsg::Data { ref data }) => stdout.extend_from_slice(data),
                    Some(ChannelMsg::ExtendedData { ref data, ext: 1 }) => {
                        stderr.extend_from_slice(data)
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        exit_code = exit_status as i32;
                    }
                    Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
                    _ => {}
                }
            }

            Ok(ExecResult {
                stdout: String::from_utf8_lossy(&stdout).to_string(),
                stderr: String::from_utf8_lossy(&stderr).to_string(),
                exit_code,
            })
        };

        timeout(cmd_timeout, work)
            .await
            .map_err(|_| SshError::Timeout(cmd_timeout))?
    }
}

impl Drop for SshExecutor {
    fn drop(&mut self) {
        let handle = self.handle.clone();
        tokio::spawn(async move {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "", "English")
                .await;
        });
    }
}

/// Converts a raw `CoreResult` failure path convenience used by higher
/// layers that only care about the crate-wide error kind.
pub fn into_core_result<T>(r: Result<T, SshError>) -> CoreResult<T> {
    r.map_err(CoreError::from)
}
