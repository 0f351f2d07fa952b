use std::time::Duration;

use thiserror::Error;

use crate::response::FailureKind;

/// Invalid input caught before any remote call is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("target function name cannot be empty")]
    EmptyTarget,
    #[error("read timeout must be greater than zero")]
    ZeroReadTimeout,
    #[error("pool size must be a positive integer, got {0}")]
    InvalidWorkers(usize),
    #[error("invalid function path `{0}`: expected `module.function`")]
    InvalidFunctionPath(String),
    #[error("memory must be a multiple of {granularity} MB between {min} and {max} MB, got {value}")]
    InvalidMemory {
        value: u32,
        min: u32,
        max: u32,
        granularity: u32,
    },
    #[error("timeout must be between 1 and {max} seconds, got {value}")]
    InvalidTimeout { value: u32, max: u32 },
    #[error("an execution role ARN is required to create a function")]
    MissingRole,
    #[error("invalid value for {name}: {reason}")]
    InvalidSetting { name: String, reason: String },
    #[error("failed to start {component}: {reason}")]
    Startup { component: String, reason: String },
}

/// Failure encoding or decoding a payload on either side of the wire.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed json payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid base64 blob: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("failed to pack value: {0}")]
    Pack(#[from] rmp_serde::encode::Error),
    #[error("failed to unpack value: {0}")]
    Unpack(#[from] rmp_serde::decode::Error),
    #[error(transparent)]
    Path(#[from] ConfigError),
}

/// Network or platform fault between the client and the remote agent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    #[error("call throttled by the execution host: {0}")]
    Throttled(String),
    #[error("execution host fault: {0}")]
    Platform(String),
    #[error("connection failed: {0}")]
    Connection(String),
}

/// Error surfaced to the caller of an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    /// The remote function raised; the message is passed through verbatim.
    #[error("{message}")]
    Application { message: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error(transparent)]
    Configuration(#[from] ConfigError),
}

impl InvokeError {
    pub fn application(message: impl Into<String>) -> Self {
        Self::Application {
            message: message.into(),
        }
    }

    /// The response failure kind this error corresponds to, if it came from a call.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::Application { .. } => Some(FailureKind::Application),
            Self::Transport(_) => Some(FailureKind::Transport),
            Self::Serialization(_) => Some(FailureKind::Serialization),
            Self::Configuration(_) => None,
        }
    }
}

impl From<CodecError> for InvokeError {
    fn from(error: CodecError) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Failure reported by a deployment collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeployError {
    #[error("function {0} already exists")]
    AlreadyExists(String),
    #[error("function {0} does not exist")]
    NotFound(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("deployment service error: {0}")]
    Service(String),
}
