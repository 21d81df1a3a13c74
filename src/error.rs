//! Error types for the agent provision operator

use std::time::Duration;

use thiserror::Error;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
///
/// Every fatal variant propagates to the controller's error policy and is
/// retried with backoff; user-visible failure is reported through the
/// `ReconcileCompleted` condition on the `ProvisionerConfig` status.
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// The referenced kubeconfig secret does not exist on the hub
    #[error("Failed to get '{name}' secret in '{namespace}' namespace")]
    SecretNotFound { name: String, namespace: String },

    /// The kubeconfig secret exists but lacks the required key
    #[error("Secret '{secret}' does not contain '{key}' key value")]
    SecretKeyNotFound { secret: String, key: String },

    /// The kubeconfig blob could not be parsed into a client configuration
    #[error("invalid kubeconfig: {0}")]
    InvalidKubeconfig(String),

    /// Spoke client acquisition failed (secret resolution or construction)
    #[error("Failed to create client: {0}")]
    ClientUnavailable(String),

    /// The agent-install CRDs are not installed on the hub cluster
    #[error("agent-install CRDs are not available")]
    PrerequisiteMissing,

    /// Create/update failure while synchronizing a managed resource
    #[error("Resource sync error: {0}")]
    Sync(String),

    /// Optimistic-concurrency conflict on a hub write
    #[error("Conflicting write: {0}")]
    Conflict(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The per-reconcile deadline elapsed
    #[error("Reconcile timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// Create a sync error
    pub fn sync(msg: impl Into<String>) -> Self {
        Error::Sync(msg.into())
    }

    /// Wrap a client acquisition failure in the user-facing message
    pub fn client_unavailable(cause: &Error) -> Self {
        Error::ClientUnavailable(cause.to_string())
    }
}
