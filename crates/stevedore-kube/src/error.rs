//! Error types for cluster operations

use thiserror::Error;

/// Cluster operation errors
#[derive(Debug, Error)]
pub enum KubeError {
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Applying one resource failed; `resource` is its display reference
    #[error("failed to apply {resource}: {message}")]
    Apply { resource: String, message: String },

    /// Server-side apply hit a managed-field conflict
    #[error("apply conflict on {resource}")]
    Conflict { resource: String },

    #[error("release store error: {0}")]
    ReleaseStore(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl KubeError {
    pub fn is_not_found(err: &kube::Error) -> bool {
        matches!(err, kube::Error::Api(api) if api.code == 404)
    }

    pub fn is_conflict(err: &kube::Error) -> bool {
        matches!(err, kube::Error::Api(api) if api.code == 409)
    }
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, KubeError>;
