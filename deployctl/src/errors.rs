//! Error types for deployctl

use thiserror::Error;

/// Main error type for deployctl
#[derive(Error, Debug)]
pub enum DeployctlError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Storage closed: {0}")]
    StorageClosed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Deployment already in progress (attempt {0})")]
    AlreadyDeploying(u64),

    #[error("Deployment error: {0}")]
    DeployError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for DeployctlError {
    fn from(err: anyhow::Error) -> Self {
        DeployctlError::Internal(err.to_string())
    }
}
