//! Error taxonomy for the driver hierarchy.

use serde::{Deserialize, Serialize};
use std::fmt;
use tessera_model::{ModelError, ProcessorArchitecture};
use thiserror::Error;

/// Errors raised by drivers, orchestration, and partitioning.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("the driver has not been initialized")]
    NotInitialized,

    #[error("cannot access a disposed driver")]
    Disposed,

    #[error("cannot run all test assemblies together because they declare mutually exclusive runtime versions: {0}")]
    IncompatibleRuntimeVersions(String),

    #[error("cannot run all test assemblies together because some require the {first} architecture while others require the {second} architecture")]
    IncompatibleArchitectures {
        first: ProcessorArchitecture,
        second: ProcessorArchitecture,
    },

    #[error("invalid runner configuration: {0}")]
    Configuration(String),

    #[error("host error: {0}")]
    Host(#[from] HostError),

    #[error("harness error: {0:#}")]
    Harness(#[source] anyhow::Error),

    #[error("remote driver failed ({kind}): {message}")]
    Remote {
        kind: RemoteErrorKind,
        message: String,
    },

    #[error("model error: {0}")]
    Model(#[from] ModelError),
}

impl DriverError {
    /// Whether the error is a cross-domain compatibility failure.
    pub fn is_compatibility(&self) -> bool {
        matches!(
            self,
            DriverError::IncompatibleRuntimeVersions(_)
                | DriverError::IncompatibleArchitectures { .. }
        )
    }
}

/// Result type for driver operations
pub type Result<T> = std::result::Result<T, DriverError>;

/// Errors raised while creating, using, or tearing down hosts.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("failed to create host: {0}")]
    Creation(String),

    #[error("host {0} has been shut down")]
    ShutDown(String),

    #[error("host boundary closed before the operation completed")]
    BoundaryClosed,

    #[error("wire protocol error: {0}")]
    Wire(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Classification of an error that crossed a host boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    InvalidArgument,
    NotInitialized,
    Disposed,
    Compatibility,
    Host,
    Harness,
    Other,
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RemoteErrorKind::InvalidArgument => "invalid_argument",
            RemoteErrorKind::NotInitialized => "not_initialized",
            RemoteErrorKind::Disposed => "disposed",
            RemoteErrorKind::Compatibility => "compatibility",
            RemoteErrorKind::Host => "host",
            RemoteErrorKind::Harness => "harness",
            RemoteErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// Serializable form of a [`DriverError`] sent back across a host boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl From<&DriverError> for RemoteError {
    fn from(err: &DriverError) -> Self {
        let kind = match err {
            DriverError::InvalidArgument(_) | DriverError::Model(_) => RemoteErrorKind::InvalidArgument,
            DriverError::NotInitialized => RemoteErrorKind::NotInitialized,
            DriverError::Disposed => RemoteErrorKind::Disposed,
            DriverError::IncompatibleRuntimeVersions(_)
            | DriverError::IncompatibleArchitectures { .. } => RemoteErrorKind::Compatibility,
            DriverError::Host(_) => RemoteErrorKind::Host,
            DriverError::Harness(_) => RemoteErrorKind::Harness,
            DriverError::Remote { kind, .. } => *kind,
            DriverError::Configuration(_) => RemoteErrorKind::Other,
        };
        let message = match err {
            DriverError::InvalidArgument(msg) => msg.clone(),
            DriverError::Remote { message, .. } => message.clone(),
            other => other.to_string(),
        };
        RemoteError { kind, message }
    }
}

impl From<RemoteError> for DriverError {
    fn from(err: RemoteError) -> Self {
        match err.kind {
            RemoteErrorKind::InvalidArgument => DriverError::InvalidArgument(err.message),
            RemoteErrorKind::NotInitialized => DriverError::NotInitialized,
            RemoteErrorKind::Disposed => DriverError::Disposed,
            kind => DriverError::Remote {
                kind,
                message: err.message,
            },
        }
    }
}
