use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_lambda::error::{DisplayErrorContext, SdkError};
use aws_sdk_lambda::operation::invoke::InvokeError as LambdaInvokeError;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::{InvocationType, LogType};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use lambdapool_core::{ConfigError, ConnectionContext, TransportError};

use super::transport::{Connector, Reply, Transport};

/// Tokio runtime driving the SDK futures for every worker connection.
///
/// Shut down in the background on drop so a pool may be released from inside
/// an async context.
struct SdkRuntime(Option<tokio::runtime::Runtime>);

impl SdkRuntime {
    fn handle(&self) -> Option<&tokio::runtime::Handle> {
        self.0.as_ref().map(tokio::runtime::Runtime::handle)
    }
}

impl Drop for SdkRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

/// Opens one Lambda client per worker.
///
/// Calls block the worker thread on a shared runtime, so transports must be
/// used from synchronous code (pool workers), never from inside an async task.
#[derive(Clone)]
pub struct LambdaConnector {
    runtime: Arc<SdkRuntime>,
}

impl LambdaConnector {
    pub fn new() -> Result<Self, ConfigError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("lambdapool-sdk")
            .enable_all()
            .build()
            .map_err(|error| ConfigError::Startup {
                component: "sdk runtime".to_string(),
                reason: error.to_string(),
            })?;
        Ok(Self {
            runtime: Arc::new(SdkRuntime(Some(runtime))),
        })
    }
}

impl fmt::Debug for LambdaConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LambdaConnector").finish_non_exhaustive()
    }
}

impl Connector for LambdaConnector {
    fn connect(&self, context: &ConnectionContext) -> Result<Box<dyn Transport>, TransportError> {
        let handle = self
            .runtime
            .handle()
            .ok_or_else(|| TransportError::Connection("sdk runtime is shut down".to_string()))?;
        let config = handle.block_on(load_sdk_config(context));

        Ok(Box::new(LambdaTransport {
            client: aws_sdk_lambda::Client::new(&config),
            runtime: Arc::clone(&self.runtime),
            function_name: context.target().to_string(),
            read_timeout: context.read_timeout(),
        }))
    }
}

pub async fn load_sdk_config(context: &ConnectionContext) -> SdkConfig {
    let timeouts = TimeoutConfig::builder()
        .read_timeout(context.read_timeout())
        .operation_timeout(context.read_timeout())
        .build();

    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .retry_config(RetryConfig::disabled())
        .timeout_config(timeouts);

    if let Some(region) = context.region() {
        loader = loader.region(Region::new(region.to_string()));
    }
    if let Some(credentials) = context.credentials() {
        loader = loader.credentials_provider(aws_sdk_lambda::config::Credentials::new(
            credentials.access_key_id(),
            credentials.secret_access_key(),
            credentials.session_token().map(str::to_string),
            None,
            "lambdapool",
        ));
    }
    if let Some(url) = context.endpoint_url() {
        loader = loader.endpoint_url(url);
    }

    loader.load().await
}

pub struct LambdaTransport {
    client: aws_sdk_lambda::Client,
    runtime: Arc<SdkRuntime>,
    function_name: String,
    read_timeout: Duration,
}

impl Transport for LambdaTransport {
    fn send(&self, payload: &[u8]) -> Result<Reply, TransportError> {
        let handle = self
            .runtime
            .handle()
            .ok_or_else(|| TransportError::Connection("sdk runtime is shut down".to_string()))?;
        let client = self.client.clone();
        let function_name = self.function_name.clone();
        let request_payload = payload.to_vec();

        let output = handle
            .block_on(async move {
                client
                    .invoke()
                    .function_name(function_name)
                    .invocation_type(InvocationType::RequestResponse)
                    .log_type(LogType::Tail)
                    .payload(Blob::new(request_payload))
                    .send()
                    .await
            })
            .map_err(|error| classify_invoke_error(error, self.read_timeout))?;

        if let Some(tail) = output.log_result() {
            log_tail(&self.function_name, tail);
        }

        Ok(Reply {
            payload: output
                .payload()
                .map(|blob| blob.as_ref().to_vec())
                .unwrap_or_default(),
            function_error: output.function_error().map(str::to_string),
        })
    }
}

fn classify_invoke_error<R>(
    error: SdkError<LambdaInvokeError, R>,
    read_timeout: Duration,
) -> TransportError
where
    R: fmt::Debug,
{
    match &error {
        SdkError::TimeoutError(_) => TransportError::Timeout(read_timeout),
        SdkError::DispatchFailure(failure) if failure.is_timeout() => {
            TransportError::Timeout(read_timeout)
        }
        SdkError::DispatchFailure(_) | SdkError::ConstructionFailure(_) => {
            TransportError::Connection(DisplayErrorContext(&error).to_string())
        }
        SdkError::ServiceError(service) if is_throttling(service.err()) => {
            TransportError::Throttled(DisplayErrorContext(&error).to_string())
        }
        _ => TransportError::Platform(DisplayErrorContext(&error).to_string()),
    }
}

fn is_throttling(error: &LambdaInvokeError) -> bool {
    error.is_too_many_requests_exception() || error.is_ec2_throttled_exception()
}

fn log_tail(function_name: &str, encoded: &str) {
    match STANDARD.decode(encoded) {
        Ok(bytes) => tracing::debug!(
            component = "lambda_transport",
            function_name,
            tail = %String::from_utf8_lossy(&bytes),
            "invocation_log_tail"
        ),
        Err(error) => tracing::debug!(
            component = "lambda_transport",
            function_name,
            %error,
            "invocation_log_tail_undecodable"
        ),
    }
}
