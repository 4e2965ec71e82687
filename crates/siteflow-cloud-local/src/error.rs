//! Local control plane error types

use siteflow_cloud::CloudError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocalError {
    #[error("Store file {path} is corrupted: {message}")]
    StoreCorrupted { path: PathBuf, message: String },

    #[error("Attribute `{attribute}` of {resource_type} must be a string")]
    NotAString {
        resource_type: String,
        attribute: String,
    },

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<LocalError> for CloudError {
    fn from(e: LocalError) -> Self {
        match e {
            LocalError::NotAString {
                ref resource_type, ..
            } => CloudError::ValidationFailed {
                resource: resource_type.clone(),
                message: e.to_string(),
            },
            LocalError::StoreCorrupted { .. } => CloudError::StateError(e.to_string()),
            LocalError::JsonError(e) => CloudError::Json(e),
            LocalError::IoError(e) => CloudError::Io(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, LocalError>;
