//! Error types for the Cassandra operator.

use thiserror::Error;

/// Errors that can occur during operator operations.
#[derive(Debug, Error)]
pub enum OperatorError {
    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Resource not found.
    #[error("Resource not found: {kind}/{name} in namespace {namespace}")]
    NotFound {
        /// Resource kind.
        kind: String,
        /// Resource name.
        name: String,
        /// Resource namespace.
        namespace: String,
    },

    /// Resource already exists (create conflict).
    #[error("Resource already exists: {kind}/{name}")]
    AlreadyExists {
        /// Resource kind.
        kind: String,
        /// Resource name.
        name: String,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The task payload does not select exactly one task type.
    #[error("Invalid task {name}: {reason}")]
    InvalidTask {
        /// Task name.
        name: String,
        /// What is wrong with the payload.
        reason: String,
    },

    /// Observed topology violates the one-rack-at-a-time invariants.
    #[error("Inconsistent state for datacenter {datacenter}: {reason}")]
    InconsistentState {
        /// DataCenter resource name.
        datacenter: String,
        /// Reason.
        reason: String,
    },

    /// Member management endpoint (sidecar) call failed.
    #[error("Sidecar call {operation} on {pod} failed: {cause}")]
    Sidecar {
        /// Pod the call was made against.
        pod: String,
        /// Operation name.
        operation: String,
        /// Error cause.
        cause: String,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A work queue unit failed to run to completion.
    #[error("Work unit {description} for {key} aborted: {cause}")]
    Unit {
        /// Cluster key the unit was queued under.
        key: String,
        /// Unit description.
        description: String,
        /// Error cause.
        cause: String,
    },
}

/// Result type for operator operations.
pub type OperatorResult<T> = Result<T, OperatorError>;

impl OperatorError {
    /// Whether this error is an HTTP 404 from the API server.
    pub fn is_not_found(&self) -> bool {
        match self {
            OperatorError::NotFound { .. } => true,
            OperatorError::KubeError(kube::Error::Api(err)) => err.code == 404,
            _ => false,
        }
    }

    /// Whether this error is an HTTP 409 from the API server.
    pub fn is_already_exists(&self) -> bool {
        match self {
            OperatorError::AlreadyExists { .. } => true,
            OperatorError::KubeError(kube::Error::Api(err)) => err.code == 409,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for OperatorError {
    fn from(err: serde_json::Error) -> Self {
        OperatorError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for OperatorError {
    fn from(err: serde_yaml::Error) -> Self {
        OperatorError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_detected() {
        let err = OperatorError::NotFound {
            kind: "StatefulSet".into(),
            name: "c1-dc1-rack1".into(),
            namespace: "default".into(),
        };
        assert!(err.is_not_found());
        assert!(!err.is_already_exists());
    }

    #[test]
    fn sidecar_error_message_names_pod() {
        let err = OperatorError::Sidecar {
            pod: "c1-dc1-rack1-2".into(),
            operation: "decommission".into(),
            cause: "connection refused".into(),
        };
        let message = err.to_string();
        assert!(message.contains("c1-dc1-rack1-2"));
        assert!(message.contains("decommission"));
    }
}
