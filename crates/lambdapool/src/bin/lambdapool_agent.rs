use std::sync::Arc;

use lambda_runtime::{service_fn, Error, LambdaEvent};
use lambdapool::telemetry::init_tracing;
use lambdapool::{catalog, Agent};
use lambdapool_core::WireResponse;
use serde_json::Value;

async fn handle_request(agent: &Agent, event: LambdaEvent<Value>) -> Result<WireResponse, Error> {
    Ok(agent.handle(event.payload))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing("info", true);

    let agent = Arc::new(Agent::new(catalog::builtin_registry()));
    tracing::info!(
        component = "agent",
        version = lambdapool_core::VERSION,
        functions = ?agent.registry().paths(),
        "agent_started"
    );

    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let agent = Arc::clone(&agent);
        async move { handle_request(&agent, event).await }
    }))
    .await
}
