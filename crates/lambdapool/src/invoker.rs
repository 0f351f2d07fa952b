use std::sync::Arc;
use std::time::Instant;

use lambdapool_core::{
    CallArgs, ConnectionContext, Envelope, FailureKind, FunctionPath, InvokeError, Response,
};
use serde_json::Value;

use crate::adapters::transport::Connector;
use crate::connections::ConnectionTable;

/// Callable bound to one context and one remote function path.
#[derive(Debug, Clone)]
pub struct Invoker {
    function: FunctionPath,
    connections: Arc<ConnectionTable>,
}

impl Invoker {
    /// Standalone invoker; each thread that calls it opens its own connection.
    pub fn new(
        context: Arc<ConnectionContext>,
        function: FunctionPath,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self::with_connections(function, Arc::new(ConnectionTable::new(context, connector)))
    }

    pub fn with_connections(function: FunctionPath, connections: Arc<ConnectionTable>) -> Self {
        Self {
            function,
            connections,
        }
    }

    pub fn function(&self) -> &FunctionPath {
        &self.function
    }

    pub fn context(&self) -> &ConnectionContext {
        self.connections.context()
    }

    pub fn invoke(&self, args: CallArgs) -> Result<Value, InvokeError> {
        let started_at = Instant::now();
        let worker = self.connections.current_worker();
        let outcome = self.exchange(args).and_then(Response::into_result);
        let duration_ms = started_at.elapsed().as_millis() as u64;

        match &outcome {
            Ok(_) => tracing::debug!(
                component = "invoker",
                function = %self.function,
                worker = ?worker,
                duration_ms,
                "call_succeeded"
            ),
            Err(error) => tracing::warn!(
                component = "invoker",
                function = %self.function,
                worker = ?worker,
                duration_ms,
                kind = ?error.kind(),
                %error,
                "call_failed"
            ),
        }

        outcome
    }

    pub fn call_response(&self, args: CallArgs) -> Response {
        match self.exchange(args) {
            Ok(response) => response,
            Err(error) => Response::failure(
                error.kind().unwrap_or(FailureKind::Transport),
                error.to_string(),
            ),
        }
    }

    fn exchange(&self, args: CallArgs) -> Result<Response, InvokeError> {
        let payload = Envelope::new(self.function.clone(), args).encode()?;
        let transport = self.connections.connection()?;
        let reply = transport.send(&payload)?;
        Ok(Response::decode(&reply.payload, reply.function_error.as_deref()))
    }
}
