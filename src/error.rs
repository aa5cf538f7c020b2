//! Crate-wide error taxonomy.
//!
//! Categories follow the reconciliation error design: validation errors are
//! never retried, transient orchestrator/DB errors are retried with
//! back-off, and policy violations are fatal for the current reconcile but
//! not retried until the resource changes.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Error returned by the Kubernetes API.
    #[error("kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Structural problem found by the spec validators (`validate`).
    #[error("validation failed: {0}")]
    ValidationError(String),

    /// DB admin protocol error (§4.C categories collapsed into one variant
    /// with a kind tag, since the wire client itself is out of scope).
    #[error("db admin error ({kind}): {message}")]
    DbAdminError { kind: DbErrorKind, message: String },

    /// A safety policy would be violated by the requested action (quorum
    /// loss, downgrade, even primary count past the max boundary).
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// A bounded wait (stabilization, health check, rollout step) expired.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// Controller/runtime configuration problem (missing CRD, bad flags).
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// (De)serialization failure outside the Kubernetes API path.
    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// A weak reference (BackupCR→ClusterCR, DatabaseCR→ClusterCR) did not
    /// resolve to an existing, ready target.
    #[error("not found: {0}")]
    NotFound(String),

    /// Finalizer helper surfaced an error in its own bookkeeping.
    #[error("finalizer error: {0}")]
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),
}

/// Taxonomy of DB admin protocol failures (spec.md §4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorKind {
    Connect,
    Timeout,
    Auth,
    Protocol,
    Operation,
}

impl std::fmt::Display for DbErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DbErrorKind::Connect => "connect",
            DbErrorKind::Timeout => "timeout",
            DbErrorKind::Auth => "auth",
            DbErrorKind::Protocol => "protocol",
            DbErrorKind::Operation => "operation",
        };
        write!(f, "{s}")
    }
}

impl Error {
    /// Whether the work queue should retry this error with back-off rather
    /// than leaving the resource in a terminal failed phase.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(_) => true,
            Error::DbAdminError { kind, .. } => {
                matches!(kind, DbErrorKind::Connect | DbErrorKind::Timeout)
            }
            Error::Timeout(_) => true,
            Error::ValidationError(_) => false,
            Error::PolicyViolation(_) => false,
            Error::ConfigError(_) => false,
            Error::SerdeError(_) => false,
            Error::NotFound(_) => true,
            Error::FinalizerError(_) => true,
        }
    }

    pub fn db(kind: DbErrorKind, message: impl Into<String>) -> Self {
        Error::DbAdminError {
            kind,
            message: message.into(),
        }
    }
}

impl From<kube::runtime::finalizer::Error<Error>> for Error {
    fn from(e: kube::runtime::finalizer::Error<Error>) -> Self {
        Error::FinalizerError(Box::new(e))
    }
}
