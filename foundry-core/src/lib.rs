//! Core provisioning and lifecycle engine: every module here is a plain
//! library type, independent of any CLI or wire protocol. `foundry-cli`
//! is the only consumer that wires these into a process.

pub mod config;
pub mod installer;
pub mod k8s;
pub mod keys;
pub mod kubeconfig;
pub mod network;
pub mod orchestrator;
pub mod registry;
pub mod roles;
pub mod secrets;
pub mod ssh;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tokens;
pub mod vip;
