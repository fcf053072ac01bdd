//! Shared error taxonomy and small value types used across the Foundry workspace.

use serde::{Deserialize, Serialize};

/// The five error kinds the design distinguishes. Every module-local error
/// type maps into exactly one of these; they are never conflated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed input, surfaced immediately with no side effects.
    Validation,
    /// Dial/auth/session/unreachable failures.
    Environmental,
    /// A remote command returned non-zero.
    RemoteExit,
    /// A wait loop exhausted its retries.
    ConvergenceTimeout,
    /// Distinguished absence, used for idempotency probes.
    NotFound,
}

/// Crate-wide error type. Module-local error enums (`SshError`,
/// `SecretStoreError`, ...) convert into this via `From` so callers at any
/// layer can match on `kind()` without downcasting.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("environmental error: {0}")]
    Environmental(String),

    #[error("remote command failed ({intent}): {stderr}")]
    RemoteExit { intent: String, stderr: String },

    #[error("{resource} did not become ready after {attempts} retries")]
    ConvergenceTimeout { resource: String, attempts: u32 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Environmental(_) => ErrorKind::Environmental,
            Error::RemoteExit { .. } => ErrorKind::RemoteExit,
            Error::ConvergenceTimeout { .. } => ErrorKind::ConvergenceTimeout,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Io(_) => ErrorKind::Environmental,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn environmental(msg: impl Into<String>) -> Self {
        Error::Environmental(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Wraps a value so its `Debug` impl never prints the contents. Used for
/// token and private-key bytes that pass through `tracing` spans.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redacted<T>(pub T);

impl<T> std::fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<redacted>")
    }
}

impl<T> std::ops::Deref for Redacted<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_mapping_is_exhaustive_and_stable() {
        assert_eq!(Error::Validation("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(
            Error::Environmental("x".into()).kind(),
            ErrorKind::Environmental
        );
        assert_eq!(
            Error::RemoteExit {
                intent: "install".into(),
                stderr: "boom".into()
            }
            .kind(),
            ErrorKind::RemoteExit
        );
        assert_eq!(
            Error::ConvergenceTimeout {
                resource: "node".into(),
                attempts: 30
            }
            .kind(),
            ErrorKind::ConvergenceTimeout
        );
        assert_eq!(Error::NotFound("x".into()).kind(), ErrorKind::NotFound);
    }

    #[test]
    fn redacted_never_leaks_its_contents_via_debug() {
        let secret = Redacted("super-secret-token".to_string());
        let rendered = format!("{:?}", secret);
        assert_eq!(rendered, "<redacted>");
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn not_found_helper_matches_direct_construction() {
        let a = Error::not_found("host n4");
        let b = Error::NotFound("host n4".to_string());
        assert_eq!(a.to_string(), b.to_string());
    }
}
