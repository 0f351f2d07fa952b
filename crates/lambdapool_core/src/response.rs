use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{decode_blob, encode_blob};
use crate::error::{InvokeError, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Application,
    Transport,
    Serialization,
}

/// Outcome of one call. Exactly one variant is ever populated.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Success(Value),
    Failure { kind: FailureKind, message: String },
}

/// Response document as it travels back from the execution host.
///
/// The agent fills `result` or `error` (plus `errorKind` when the failure is
/// not an application error). `errorMessage`/`errorType` are written by the
/// host itself when the call failed outside the agent's control; the two
/// channels are independent and both are checked on decode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(
        rename = "errorKind",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub error_kind: Option<FailureKind>,
    #[serde(
        rename = "errorMessage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub error_message: Option<String>,
    #[serde(rename = "errorType", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl WireResponse {
    /// Encodes a success value; an unencodable value becomes a serialization failure.
    pub fn success(value: &Value) -> Self {
        match encode_blob(value) {
            Ok(blob) => Self {
                result: Some(blob),
                ..Self::default()
            },
            Err(error) => Self::failure(
                FailureKind::Serialization,
                format!("failed to encode result: {error}"),
            ),
        }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            error_kind: match kind {
                FailureKind::Application => None,
                other => Some(other),
            },
            ..Self::default()
        }
    }
}

impl Response {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    /// Decodes a raw response body. `function_error` carries the host's side
    /// channel flag (Lambda's `X-Amz-Function-Error`), if any.
    pub fn decode(payload: &[u8], function_error: Option<&str>) -> Self {
        match serde_json::from_slice::<WireResponse>(payload) {
            Ok(wire) => Self::from_wire(wire, function_error),
            Err(error) => match function_error {
                Some(fault) => Self::failure(
                    FailureKind::Transport,
                    format!("{fault}: {}", String::from_utf8_lossy(payload).trim()),
                ),
                None => Self::failure(
                    FailureKind::Serialization,
                    format!("malformed response payload: {error}"),
                ),
            },
        }
    }

    pub fn from_wire(wire: WireResponse, function_error: Option<&str>) -> Self {
        if let Some(message) = wire.error_message {
            let message = match wire.error_type {
                Some(error_type) => format!("{error_type}: {message}"),
                None => message,
            };
            return Self::failure(FailureKind::Transport, message);
        }

        if let Some(message) = wire.error {
            return Self::failure(wire.error_kind.unwrap_or(FailureKind::Application), message);
        }

        if let Some(fault) = function_error {
            return Self::failure(
                FailureKind::Transport,
                format!("execution host reported {fault} without details"),
            );
        }

        match wire.result {
            Some(blob) => match decode_blob::<Value>(&blob) {
                Ok(value) => Self::Success(value),
                Err(error) => Self::failure(
                    FailureKind::Serialization,
                    format!("failed to decode result: {error}"),
                ),
            },
            None => Self::failure(
                FailureKind::Serialization,
                "response carries neither a result nor an error",
            ),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success(_) => None,
            Self::Failure { kind, .. } => Some(*kind),
        }
    }

    pub fn into_result(self) -> Result<Value, InvokeError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure { kind, message } => Err(match kind {
                FailureKind::Application => InvokeError::Application { message },
                FailureKind::Transport => InvokeError::Transport(TransportError::Platform(message)),
                FailureKind::Serialization => InvokeError::Serialization(message),
            }),
        }
    }
}

impl From<Response> for WireResponse {
    fn from(response: Response) -> Self {
        match response {
            Response::Success(value) => Self::success(&value),
            Response::Failure { kind, message } => Self::failure(kind, message),
        }
    }
}
