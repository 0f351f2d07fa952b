//! Protocol primitives for lambdapool remote invocation.
//!
//! This crate owns the call envelope and response contracts, the error
//! taxonomy, the remote function registry and the agent that runs at the
//! compute endpoint. It intentionally excludes AWS SDK, worker pool and Lambda
//! runtime concerns, which live in the `lambdapool` crate.

pub mod agent;
pub mod catalog;
pub mod context;
pub mod deploy;
pub mod envelope;
pub mod error;
pub mod listing;
pub mod registry;
pub mod response;

pub use agent::Agent;
pub use context::{ConnectionContext, Credentials};
pub use envelope::{CallArgs, Envelope, FunctionPath};
pub use error::{CodecError, ConfigError, DeployError, InvokeError, TransportError};
pub use registry::{Module, Registry};
pub use response::{FailureKind, Response, WireResponse};

/// Version stamped into deployed functions and reported by the agent.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
