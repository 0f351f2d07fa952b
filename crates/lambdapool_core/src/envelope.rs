//! Call envelope and the two-layer payload encoding.
//!
//! The outer payload is a JSON document so it can travel as a Lambda event:
//!
//! ```text
//! {"function": "algorithms.fib", "args": "<blob>", "kwargs": "<blob>"}
//! ```
//!
//! Each blob is the standard base64 encoding of a MessagePack document holding
//! the positional list or the keyword map. Responses use the same blob format
//! (see [`crate::response`]).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CodecError, ConfigError};

pub type Kwargs = BTreeMap<String, Value>;

/// Dotted `module.function` identifier. The module part may itself be dotted;
/// the split happens on the final separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionPath {
    module: String,
    function: String,
}

impl FunctionPath {
    pub fn parse(path: &str) -> Result<Self, ConfigError> {
        let trimmed = path.trim();
        match trimmed.rsplit_once('.') {
            Some((module, function)) if !module.is_empty() && !function.is_empty() => Ok(Self {
                module: module.to_string(),
                function: function.to_string(),
            }),
            _ => Err(ConfigError::InvalidFunctionPath(trimmed.to_string())),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn function(&self) -> &str {
        &self.function
    }
}

impl fmt::Display for FunctionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.function)
    }
}

impl FromStr for FunctionPath {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Positional and keyword arguments of one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallArgs {
    pub args: Vec<Value>,
    pub kwargs: Kwargs,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn positional<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Self {
            args: values.into_iter().map(Into::into).collect(),
            kwargs: Kwargs::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Looks up a parameter by keyword first, then by position, and converts it.
    pub fn get<T: DeserializeOwned>(&self, index: usize, name: &str) -> Result<T, String> {
        let value = self
            .kwargs
            .get(name)
            .or_else(|| self.args.get(index))
            .ok_or_else(|| format!("missing required argument '{name}'"))?;
        convert_argument(value, name)
    }

    /// Like [`CallArgs::get`] but falls back to `default` when the parameter is absent.
    pub fn get_or<T: DeserializeOwned>(
        &self,
        index: usize,
        name: &str,
        default: T,
    ) -> Result<T, String> {
        match self.kwargs.get(name).or_else(|| self.args.get(index)) {
            Some(value) => convert_argument(value, name),
            None => Ok(default),
        }
    }
}

impl From<Value> for CallArgs {
    fn from(value: Value) -> Self {
        Self::new().arg(value)
    }
}

fn convert_argument<T: DeserializeOwned>(value: &Value, name: &str) -> Result<T, String> {
    T::deserialize(value).map_err(|error| format!("argument '{name}': {error}"))
}

/// Request unit carried across the process boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub function: FunctionPath,
    pub args: Vec<Value>,
    pub kwargs: Kwargs,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireEnvelope {
    function: String,
    args: String,
    kwargs: String,
}

impl Envelope {
    pub fn new(function: FunctionPath, call: CallArgs) -> Self {
        Self {
            function,
            args: call.args,
            kwargs: call.kwargs,
        }
    }

    pub fn call_args(&self) -> CallArgs {
        CallArgs {
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
        }
    }

    /// Encodes into the outer JSON document.
    pub fn to_event(&self) -> Result<Value, CodecError> {
        let wire = WireEnvelope {
            function: self.function.to_string(),
            args: encode_blob(&self.args)?,
            kwargs: encode_blob(&self.kwargs)?,
        };
        Ok(serde_json::to_value(wire)?)
    }

    pub fn from_event(event: Value) -> Result<Self, CodecError> {
        let wire: WireEnvelope = serde_json::from_value(event)?;
        Ok(Self {
            function: FunctionPath::parse(&wire.function)?,
            args: decode_blob(&wire.args)?,
            kwargs: decode_blob(&wire.kwargs)?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(&self.to_event()?)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        Self::from_event(serde_json::from_slice(payload)?)
    }
}

/// Packs a value as MessagePack and wraps it in base64 text.
pub fn encode_blob<T: Serialize + ?Sized>(value: &T) -> Result<String, CodecError> {
    let packed = rmp_serde::to_vec(value)?;
    Ok(STANDARD.encode(packed))
}

pub fn decode_blob<T: DeserializeOwned>(blob: &str) -> Result<T, CodecError> {
    let packed = STANDARD.decode(blob.trim())?;
    Ok(rmp_serde::from_slice(&packed)?)
}
