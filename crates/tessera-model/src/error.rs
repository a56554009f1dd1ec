//! Error types for model-level validation

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("invalid package configuration: {0}")]
    InvalidPackage(String),

    #[error("invalid host setup: {0}")]
    InvalidHostSetup(String),

    #[error("unknown isolation mode: {0}")]
    UnknownIsolationMode(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for model operations
pub type Result<T> = std::result::Result<T, ModelError>;
