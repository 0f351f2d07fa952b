//! Client side of lambdapool: invokers, the bounded worker pool and the AWS
//! adapters that carry envelopes to a deployed agent.
//!
//! Protocol types live in `lambdapool_core` and are re-exported here so most
//! callers only depend on this crate.
//!
//! ```no_run
//! use lambdapool::{CallArgs, ConnectionContext, LambdaPool};
//!
//! let context = ConnectionContext::from_env("test-function")?;
//! let pool = LambdaPool::lambda(4, context)?;
//! let fibs = pool.map("algorithms.fib", 0..10u64)?;
//! let echoed = pool.apply("echo.echo", CallArgs::new().arg("hi"))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod adapters;
pub mod call;
pub mod connections;
pub mod invoker;
pub mod pool;
pub mod telemetry;

pub use call::{AsyncResult, CallState};
pub use invoker::Invoker;
pub use lambdapool_core::{
    catalog, Agent, CallArgs, ConfigError, ConnectionContext, Credentials, DeployError,
    FailureKind, FunctionPath, InvokeError, Module, Registry, Response, TransportError,
};
pub use pool::LambdaPool;
