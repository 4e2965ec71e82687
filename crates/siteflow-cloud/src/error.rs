//! Reconciler error types

use siteflow_core::SiteError;
use thiserror::Error;

/// Reconciler and control plane errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Resource already exists: {0}")]
    ResourceAlreadyExists(String),

    #[error("Unknown resource type: {0}")]
    UnknownResourceType(String),

    #[error("Invalid resource {resource}: {message}")]
    ValidationFailed { resource: String, message: String },

    #[error("Cannot {action} {resource}: lifecycle.prevent-destroy is set")]
    PreventDestroy { resource: String, action: String },

    #[error("Remote state conflict: {0}\nRun `site refresh` and plan again")]
    RemoteConflict(String),

    #[error("Resource {resource} was created but is not usable ({message}); it is marked tainted")]
    PartiallyCreated {
        resource: String,
        id: String,
        message: String,
    },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Request throttled: {0}")]
    Throttled(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Site(#[from] SiteError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Transient errors that are worth retrying with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CloudError::ApiError(_) | CloudError::Throttled(_) | CloudError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
