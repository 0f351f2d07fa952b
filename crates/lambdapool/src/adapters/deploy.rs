use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use aws_sdk_lambda::error::DisplayErrorContext;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::{Environment, FunctionCode, FunctionConfiguration, Runtime};
use lambdapool_core::deploy::{
    function_environment, is_lambdapool_function, parse_last_modified, Deployer, FunctionConfig,
    FunctionSummary, CREATOR, ENV_CREATOR,
};
use lambdapool_core::{ConfigError, ConnectionContext, DeployError, VERSION};

use super::lambda::load_sdk_config;

const AGENT_HANDLER: &str = "bootstrap";
const CREATOR_TAG: &str = "creator";
const ROLE_PROPAGATION_ATTEMPTS: u32 = 5;
const UPDATE_CONFLICT_ATTEMPTS: u32 = 10;
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Lambda lifecycle adapter. Methods block the current tokio worker, so they
/// must be called from a multi-threaded runtime.
#[derive(Debug, Clone)]
pub struct LambdaDeployer {
    client: aws_sdk_lambda::Client,
    role_arn: Option<String>,
}

impl LambdaDeployer {
    pub fn new(client: aws_sdk_lambda::Client, role_arn: Option<String>) -> Self {
        Self { client, role_arn }
    }

    pub async fn from_context(context: &ConnectionContext, role_arn: Option<String>) -> Self {
        let config = load_sdk_config(context).await;
        Self::new(aws_sdk_lambda::Client::new(&config), role_arn)
    }
}

fn block_on<F: Future>(future: F) -> F::Output {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}

fn service_error(error: impl std::error::Error) -> DeployError {
    DeployError::Service(DisplayErrorContext(error).to_string())
}

impl Deployer for LambdaDeployer {
    fn exists(&self, name: &str) -> Result<bool, DeployError> {
        let client = self.client.clone();
        let function_name = name.to_string();

        block_on(async move {
            match client.get_function().function_name(function_name).send().await {
                Ok(_) => Ok(true),
                Err(error)
                    if error
                        .as_service_error()
                        .is_some_and(|service| service.is_resource_not_found_exception()) =>
                {
                    Ok(false)
                }
                Err(error) => Err(service_error(error)),
            }
        })
    }

    fn create(
        &self,
        name: &str,
        bundle: &[u8],
        config: &FunctionConfig,
    ) -> Result<(), DeployError> {
        config.validate()?;
        if self.exists(name)? {
            return Err(DeployError::AlreadyExists(name.to_string()));
        }
        let role = self.role_arn.clone().ok_or(ConfigError::MissingRole)?;

        let client = self.client.clone();
        let function_name = name.to_string();
        let variables: HashMap<String, String> =
            function_environment(name, VERSION).into_iter().collect();
        let code = bundle.to_vec();
        let config = config.clone();

        block_on(async move {
            let mut attempt = 1;
            loop {
                let outcome = client
                    .create_function()
                    .function_name(&function_name)
                    .runtime(Runtime::Providedal2023)
                    .handler(AGENT_HANDLER)
                    .role(&role)
                    .code(FunctionCode::builder().zip_file(Blob::new(code.clone())).build())
                    .environment(
                        Environment::builder()
                            .set_variables(Some(variables.clone()))
                            .build(),
                    )
                    .tags(CREATOR_TAG, CREATOR)
                    .set_memory_size(config.memory_mb.map(|memory| memory as i32))
                    .set_timeout(config.timeout_secs.map(|timeout| timeout as i32))
                    .set_layers((!config.layers.is_empty()).then(|| config.layers.clone()))
                    .send()
                    .await;

                match outcome {
                    Ok(_) => {
                        tracing::info!(
                            component = "deploy",
                            function_name = %function_name,
                            "function_created"
                        );
                        return Ok(());
                    }
                    // A freshly created role is not assumable for a few seconds.
                    Err(error)
                        if attempt < ROLE_PROPAGATION_ATTEMPTS
                            && error
                                .as_service_error()
                                .is_some_and(|service| service.is_invalid_parameter_value_exception()) =>
                    {
                        tracing::warn!(
                            component = "deploy",
                            function_name = %function_name,
                            attempt,
                            error = %DisplayErrorContext(&error),
                            "create_rejected_retrying"
                        );
                        attempt += 1;
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                    Err(error) => return Err(service_error(error)),
                }
            }
        })
    }

    fn update(
        &self,
        name: &str,
        bundle: &[u8],
        config: &FunctionConfig,
    ) -> Result<(), DeployError> {
        config.validate()?;
        if !self.exists(name)? {
            return Err(DeployError::NotFound(name.to_string()));
        }

        let client = self.client.clone();
        let function_name = name.to_string();
        let code = bundle.to_vec();
        let config = config.clone();

        block_on(async move {
            client
                .update_function_code()
                .function_name(&function_name)
                .zip_file(Blob::new(code))
                .send()
                .await
                .map_err(service_error)?;
            tracing::info!(component = "deploy", function_name = %function_name, "code_updated");

            if config.is_empty() {
                return Ok(());
            }

            let mut attempt = 1;
            loop {
                let outcome = client
                    .update_function_configuration()
                    .function_name(&function_name)
                    .set_memory_size(config.memory_mb.map(|memory| memory as i32))
                    .set_timeout(config.timeout_secs.map(|timeout| timeout as i32))
                    .set_layers((!config.layers.is_empty()).then(|| config.layers.clone()))
                    .send()
                    .await;

                match outcome {
                    Ok(_) => {
                        tracing::info!(
                            component = "deploy",
                            function_name = %function_name,
                            "configuration_updated"
                        );
                        return Ok(());
                    }
                    // The code update must settle before configuration can change.
                    Err(error)
                        if attempt < UPDATE_CONFLICT_ATTEMPTS
                            && error
                                .as_service_error()
                                .is_some_and(|service| service.is_resource_conflict_exception()) =>
                    {
                        attempt += 1;
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                    Err(error) => return Err(service_error(error)),
                }
            }
        })
    }

    fn delete(&self, name: &str) -> Result<(), DeployError> {
        let client = self.client.clone();
        let function_name = name.to_string();

        block_on(async move {
            match client
                .delete_function()
                .function_name(&function_name)
                .send()
                .await
            {
                Ok(_) => {
                    tracing::info!(
                        component = "deploy",
                        function_name = %function_name,
                        "function_deleted"
                    );
                    Ok(())
                }
                Err(error)
                    if error
                        .as_service_error()
                        .is_some_and(|service| service.is_resource_not_found_exception()) =>
                {
                    Err(DeployError::NotFound(function_name))
                }
                Err(error) => Err(service_error(error)),
            }
        })
    }

    fn list(&self) -> Result<Vec<FunctionSummary>, DeployError> {
        let client = self.client.clone();

        block_on(async move {
            let mut summaries = Vec::new();
            let mut marker: Option<String> = None;
            loop {
                let page = client
                    .list_functions()
                    .set_marker(marker.take())
                    .send()
                    .await
                    .map_err(service_error)?;

                summaries.extend(page.functions().iter().filter_map(summarize));

                match page.next_marker() {
                    Some(next) => marker = Some(next.to_string()),
                    None => break,
                }
            }
            Ok(summaries)
        })
    }
}

fn summarize(function: &FunctionConfiguration) -> Option<FunctionSummary> {
    let environment = function
        .environment()
        .and_then(|environment| environment.variables())?;
    if !is_lambdapool_function(environment) {
        return None;
    }

    Some(FunctionSummary {
        name: function.function_name()?.to_string(),
        size_bytes: u64::try_from(function.code_size()).unwrap_or(0),
        last_updated: function.last_modified().and_then(parse_last_modified),
        memory_mb: function.memory_size().and_then(|memory| u32::try_from(memory).ok()),
        timeout_secs: function.timeout().and_then(|timeout| u32::try_from(timeout).ok()),
    })
}
