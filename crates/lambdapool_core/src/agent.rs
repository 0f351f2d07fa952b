//! Remote side of the protocol: decode, resolve, execute, encode.
//!
//! [`Agent::handle`] always produces a [`WireResponse`]. Decode failures,
//! unresolvable paths, errors returned by the function and panics are all
//! reported as structured failures so the hosting runtime never sees an
//! unhandled fault from the agent.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use serde_json::Value;

use crate::envelope::Envelope;
use crate::registry::Registry;
use crate::response::{FailureKind, WireResponse};

#[derive(Debug, Clone)]
pub struct Agent {
    registry: Registry,
}

impl Agent {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Handles one event delivered by the execution host.
    pub fn handle(&self, event: Value) -> WireResponse {
        match Envelope::from_event(event) {
            Ok(envelope) => self.execute(&envelope),
            Err(error) => {
                tracing::warn!(component = "agent", %error, "envelope_rejected");
                WireResponse::failure(
                    FailureKind::Serialization,
                    format!("failed to decode call envelope: {error}"),
                )
            }
        }
    }

    /// Same as [`Agent::handle`] for a raw JSON body.
    pub fn handle_payload(&self, payload: &[u8]) -> WireResponse {
        match serde_json::from_slice::<Value>(payload) {
            Ok(event) => self.handle(event),
            Err(error) => WireResponse::failure(
                FailureKind::Serialization,
                format!("failed to decode call envelope: {error}"),
            ),
        }
    }

    pub fn execute(&self, envelope: &Envelope) -> WireResponse {
        let started_at = Instant::now();
        let function = match self.registry.resolve(&envelope.function) {
            Ok(function) => function,
            Err(error) => {
                tracing::warn!(
                    component = "agent",
                    function = %envelope.function,
                    %error,
                    "function_unresolved"
                );
                return WireResponse::failure(FailureKind::Application, error.to_string());
            }
        };

        let call = envelope.call_args();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| function(&call)))
            .unwrap_or_else(|payload| Err(panic_message(payload.as_ref())));
        let duration_ms = started_at.elapsed().as_millis() as u64;

        match outcome {
            Ok(value) => {
                tracing::info!(
                    component = "agent",
                    function = %envelope.function,
                    duration_ms,
                    "call_completed"
                );
                WireResponse::success(&value)
            }
            Err(message) => {
                tracing::info!(
                    component = "agent",
                    function = %envelope.function,
                    duration_ms,
                    error = %message,
                    "call_raised"
                );
                WireResponse::failure(FailureKind::Application, message)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "remote function panicked".to_string()
    }
}
