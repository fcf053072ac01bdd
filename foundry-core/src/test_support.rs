//! In-memory `Executor` double shared by unit and integration tests. Kept
//! behind `test-support` so `tests/` can drive the installer and
//! orchestrator without a real SSH transport.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::k8s::ClusterHealth;
use crate::orchestrator::{HealthCheck, OrchestratorError};
use crate::ssh::{ExecResult, Executor, SshError};

/// Records every command it's asked to run and answers from a per-command
/// queue, falling back to a default once the queue for that command is
/// exhausted. The queue lets a single command (e.g. `systemctl is-active
/// k3s-agent`, asked once by the probe and again by the wait-ready loop)
/// answer differently each time it's seen.
pub struct RecordingExecutor {
    default_response: ExecResult,
    scripted: Mutex<HashMap<String, VecDeque<ExecResult>>>,
    commands: Mutex<Vec<String>>,
}

impl RecordingExecutor {
    /// Every command not otherwise scripted succeeds with empty output —
    /// the common case for "probe says not installed yet" style checks.
    pub fn new() -> Self {
        Self {
            default_response: ExecResult {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            },
            scripted: Mutex::new(HashMap::new()),
            commands: Mutex::new(Vec::new()),
        }
    }

    /// All commands default to this response instead of an empty success —
    /// e.g. `"active"` so probes and wait-loops see the node as already up.
    pub fn with_default_stdout(stdout: impl Into<String>) -> Self {
        Self {
            default_response: ExecResult {
                stdout: stdout.into(),
                stderr: String::new(),
                exit_code: 0,
            },
            scripted: Mutex::new(HashMap::new()),
            commands: Mutex::new(Vec::new()),
        }
    }

    /// Queues `result` as the next answer for `command`; calling this
    /// repeatedly for the same command queues successive answers in order.
    pub fn script(self, command: impl Into<String>, result: ExecResult) -> Self {
        self.scripted
            .lock()
            .unwrap()
            .entry(command.into())
            .or_default()
            .push_back(result);
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// The first recorded command containing `needle`, if any.
    pub fn find(&self, needle: &str) -> Option<String> {
        self.commands().into_iter().find(|c| c.contains(needle))
    }
}

impl Default for RecordingExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn exec(&self, command: &str, _timeout: Duration) -> Result<ExecResult, SshError> {
        self.commands.lock().unwrap().push(command.to_string());

        let mut scripted = self.scripted.lock().unwrap();
        let result = match scripted.get_mut(command) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        Ok(result.unwrap_or_else(|| self.default_response.clone()))
    }
}

pub fn success(stdout: impl Into<String>) -> ExecResult {
    ExecResult {
        stdout: stdout.into(),
        stderr: String::new(),
        exit_code: 0,
    }
}

pub fn failure(stderr: impl Into<String>) -> ExecResult {
    ExecResult {
        stdout: String::new(),
        stderr: stderr.into(),
        exit_code: 1,
    }
}

/// Returns a fixed `ClusterHealth` without building a `kube::Client` or
/// dialing an API server, so `orchestrator::initialize_with_health_check`
/// can be exercised end-to-end without a live cluster.
pub struct FakeHealthCheck(pub ClusterHealth);

#[async_trait]
impl HealthCheck for FakeHealthCheck {
    async fn check(&self, _kubeconfig_yaml: &str) -> Result<ClusterHealth, OrchestratorError> {
        Ok(self.0.clone())
    }
}
