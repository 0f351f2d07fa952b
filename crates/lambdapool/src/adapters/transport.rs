use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lambdapool_core::{Agent, ConnectionContext, TransportError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    pub payload: Vec<u8>,
    pub function_error: Option<String>,
}

pub trait Transport: Send + Sync {
    fn send(&self, payload: &[u8]) -> Result<Reply, TransportError>;
}

pub trait Connector: Send + Sync {
    fn connect(&self, context: &ConnectionContext) -> Result<Box<dyn Transport>, TransportError>;
}

/// Runs an [`Agent`] in-process, honouring the context read timeout.
#[derive(Debug, Clone)]
pub struct LocalConnector {
    agent: Arc<Agent>,
}

impl LocalConnector {
    pub fn new(agent: Agent) -> Self {
        Self {
            agent: Arc::new(agent),
        }
    }
}

impl Connector for LocalConnector {
    fn connect(&self, context: &ConnectionContext) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(LocalTransport {
            agent: Arc::clone(&self.agent),
            read_timeout: context.read_timeout(),
        }))
    }
}

#[derive(Debug, Clone)]
pub struct LocalTransport {
    agent: Arc<Agent>,
    read_timeout: Duration,
}

impl Transport for LocalTransport {
    fn send(&self, payload: &[u8]) -> Result<Reply, TransportError> {
        let (sender, receiver) = mpsc::channel();
        let agent = Arc::clone(&self.agent);
        let request = payload.to_vec();

        thread::Builder::new()
            .name("lambdapool-local-agent".to_string())
            .spawn(move || {
                let response = agent.handle_payload(&request);
                let _ = sender.send(response);
            })
            .map_err(|error| TransportError::Connection(error.to_string()))?;

        match receiver.recv_timeout(self.read_timeout) {
            Ok(response) => {
                let payload = serde_json::to_vec(&response).map_err(|error| {
                    TransportError::Platform(format!("failed to frame agent response: {error}"))
                })?;
                Ok(Reply {
                    payload,
                    function_error: None,
                })
            }
            Err(RecvTimeoutError::Timeout) => Err(TransportError::Timeout(self.read_timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Platform(
                "agent terminated without a response".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use lambdapool_core::{catalog, CallArgs, Envelope, FunctionPath, Response};
    use serde_json::json;

    use super::*;

    fn transport(read_timeout: Duration) -> Box<dyn Transport> {
        let context = ConnectionContext::builder("local")
            .read_timeout(read_timeout)
            .build()
            .expect("context should build");
        LocalConnector::new(Agent::new(catalog::builtin_registry()))
            .connect(&context)
            .expect("local connector should not fail")
    }

    #[test]
    fn local_transport_round_trips_through_agent() {
        let envelope = Envelope::new(
            FunctionPath::parse("echo.echo").expect("path should parse"),
            CallArgs::new().arg("hi"),
        );
        let reply = transport(Duration::from_secs(5))
            .send(&envelope.encode().expect("envelope should encode"))
            .expect("send should succeed");

        assert_eq!(reply.function_error, None);
        assert_eq!(
            Response::decode(&reply.payload, None),
            Response::Success(json!("ECHOING: hi"))
        );
    }

    #[test]
    fn local_transport_frames_garbage_as_agent_failure() {
        let reply = transport(Duration::from_secs(5))
            .send(b"garbage")
            .expect("send should succeed");
        let response = Response::decode(&reply.payload, reply.function_error.as_deref());
        assert_eq!(
            response.failure_kind(),
            Some(lambdapool_core::FailureKind::Serialization)
        );
    }
}
