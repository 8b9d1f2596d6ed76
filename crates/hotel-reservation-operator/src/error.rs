//! Error types for the hotel-reservation operator

use crate::resources::ResourceKind;
use thiserror::Error;

/// Errors that can occur during operator operations
#[derive(Error, Debug)]
pub enum OperatorError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A single create-if-absent call failed while provisioning
    #[error("Failed to provision {kind} '{name}': {source}")]
    ProvisionFailed {
        kind: ResourceKind,
        name: String,
        #[source]
        source: Box<OperatorError>,
    },
}

/// Result type for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

impl OperatorError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            OperatorError::KubeError(_) => true,
            OperatorError::ProvisionFailed { source, .. } => source.is_retryable(),
            OperatorError::InvalidConfig(_) => false,
        }
    }

    /// True when the API server rejected a create because the object already exists
    pub fn is_already_exists(&self) -> bool {
        match self {
            OperatorError::KubeError(kube::Error::Api(response)) => response.code == 409,
            OperatorError::ProvisionFailed { source, .. } => source.is_already_exists(),
            _ => false,
        }
    }

    /// Name of the resource that failed to provision, if this error carries one
    pub fn resource_name(&self) -> Option<&str> {
        match self {
            OperatorError::ProvisionFailed { name, .. } => Some(name),
            _ => None,
        }
    }
}
