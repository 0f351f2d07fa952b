use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use lambdapool::adapters::deploy::LambdaDeployer;
use lambdapool::telemetry::init_tracing;
use lambdapool::{CallArgs, ConnectionContext, LambdaPool};
use lambdapool_core::context::{ENV_ENDPOINT_URL, ENV_READ_TIMEOUT_SECS, ENV_REGION};
use lambdapool_core::deploy::{Deployer, FunctionConfig, FunctionSummary};
use lambdapool_core::listing::{format_size, humanize_time};
use serde::Serialize;
use serde_json::Value;

#[derive(Parser)]
#[command(
    name = "lambdapool",
    version,
    about = "Deploy the lambdapool agent and run calls against it",
    long_about = "Manage functions running the lambdapool agent and dispatch calls\n\
                  to them from a bounded pool of local workers."
)]
struct Cli {
    /// Region hosting the function; falls back to AWS_REGION / AWS_DEFAULT_REGION
    #[arg(long, global = true)]
    region: Option<String>,
    /// Override the service endpoint, e.g. a local emulator
    #[arg(long, global = true)]
    endpoint_url: Option<String>,
    /// Per-call read timeout in seconds
    #[arg(long, global = true)]
    read_timeout: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a function from a packaged agent bundle
    Create {
        name: String,
        #[command(flatten)]
        deploy: DeployArgs,
        /// Execution role ARN assumed by the function
        #[arg(long, env = "LAMBDAPOOL_ROLE_ARN")]
        role: Option<String>,
    },
    /// Replace the code (and optionally the sizing) of an existing function
    Update {
        name: String,
        #[command(flatten)]
        deploy: DeployArgs,
    },
    /// Delete a function
    Delete { name: String },
    /// List functions created by lambdapool
    List {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Call a remote function and print its result as JSON
    Invoke {
        /// Deployed function name or ARN
        name: String,
        /// Remote function path, `module.function`
        function: String,
        /// Positional arguments as a JSON array
        #[arg(long, default_value = "[]")]
        args: String,
        /// Keyword arguments as a JSON object
        #[arg(long, default_value = "{}")]
        kwargs: String,
        /// Treat each element of --args as the single argument of its own call;
        /// --kwargs is passed to every call
        #[arg(long)]
        map: bool,
        #[arg(long, default_value_t = 1)]
        workers: usize,
    },
}

#[derive(Args)]
struct DeployArgs {
    /// Zip produced by `cargo run -p xtask -- package-agent`
    #[arg(long, default_value = "dist/lambdapool_agent.zip")]
    bundle: PathBuf,
    /// Memory in MB, a multiple of 64 between 128 and 10240
    #[arg(long)]
    memory: Option<u32>,
    /// Function timeout in seconds, at most 900
    #[arg(long)]
    timeout: Option<u32>,
    /// Layer ARN to attach; repeatable
    #[arg(long = "layer")]
    layers: Vec<String>,
}

impl DeployArgs {
    fn config(&self) -> FunctionConfig {
        FunctionConfig {
            memory_mb: self.memory,
            timeout_secs: self.timeout,
            layers: self.layers.clone(),
        }
    }

    fn read_bundle(&self) -> Result<Vec<u8>, String> {
        fs::read(&self.bundle)
            .map_err(|error| format!("failed to read bundle {}: {error}", self.bundle.display()))
    }
}

#[derive(Serialize)]
struct ListedFunction {
    name: String,
    size_bytes: u64,
    last_updated: Option<String>,
    memory_mb: Option<u32>,
    timeout_secs: Option<u32>,
}

impl From<&FunctionSummary> for ListedFunction {
    fn from(summary: &FunctionSummary) -> Self {
        Self {
            name: summary.name.clone(),
            size_bytes: summary.size_bytes,
            last_updated: summary.last_updated.map(|stamp| stamp.to_rfc3339()),
            memory_mb: summary.memory_mb,
            timeout_secs: summary.timeout_secs,
        }
    }
}

impl Cli {
    /// Context for `target`: command-line flags first, then the environment.
    fn context(&self, target: &str) -> Result<ConnectionContext, String> {
        ConnectionContext::from_lookup(target, |key| match key {
            ENV_REGION if self.region.is_some() => self.region.clone(),
            ENV_ENDPOINT_URL if self.endpoint_url.is_some() => self.endpoint_url.clone(),
            ENV_READ_TIMEOUT_SECS if self.read_timeout.is_some() => {
                self.read_timeout.map(|seconds| seconds.to_string())
            }
            _ => std::env::var(key).ok(),
        })
        .map_err(|error| error.to_string())
    }
}

async fn deployer(cli: &Cli, name: &str, role: Option<String>) -> Result<LambdaDeployer, String> {
    let context = cli.context(name)?;
    Ok(LambdaDeployer::from_context(&context, role).await)
}

async fn run(cli: &Cli) -> Result<(), String> {
    match &cli.command {
        Commands::Create { name, deploy, role } => {
            let bundle = deploy.read_bundle()?;
            let deployer = deployer(cli, name, role.clone()).await?;
            deployer
                .create(name, &bundle, &deploy.config())
                .map_err(|error| error.to_string())?;
            println!("created {name}");
        }
        Commands::Update { name, deploy } => {
            let bundle = deploy.read_bundle()?;
            let deployer = deployer(cli, name, None).await?;
            deployer
                .update(name, &bundle, &deploy.config())
                .map_err(|error| error.to_string())?;
            println!("updated {name}");
        }
        Commands::Delete { name } => {
            let deployer = deployer(cli, name, None).await?;
            deployer.delete(name).map_err(|error| error.to_string())?;
            println!("deleted {name}");
        }
        Commands::List { json } => {
            // Listing is account wide; the target only satisfies the context.
            let deployer = deployer(cli, "*", None).await?;
            let functions = deployer.list().map_err(|error| error.to_string())?;
            if *json {
                let rows: Vec<ListedFunction> = functions.iter().map(ListedFunction::from).collect();
                let rendered = serde_json::to_string_pretty(&rows)
                    .map_err(|error| format!("failed to render listing: {error}"))?;
                println!("{rendered}");
            } else {
                print_table(&functions);
            }
        }
        Commands::Invoke {
            name,
            function,
            args,
            kwargs,
            map,
            workers,
        } => {
            let positional: Vec<Value> = serde_json::from_str(args)
                .map_err(|error| format!("--args must be a JSON array: {error}"))?;
            let keywords: serde_json::Map<String, Value> = serde_json::from_str(kwargs)
                .map_err(|error| format!("--kwargs must be a JSON object: {error}"))?;
            let context = cli.context(name)?;
            let workers = *workers;
            let map = *map;
            let function = function.clone();

            let result = tokio::task::block_in_place(move || {
                let pool = LambdaPool::lambda(workers, context).map_err(|error| error.to_string())?;
                let outcome = if map {
                    pool.starmap(&function, mapped_calls(positional, &keywords))
                        .map(Value::Array)
                } else {
                    let call = with_keywords(CallArgs::positional(positional), &keywords);
                    pool.apply(&function, call)
                };
                pool.shutdown();
                outcome.map_err(|error| error.to_string())
            })?;

            let rendered = serde_json::to_string_pretty(&result)
                .map_err(|error| format!("failed to render result: {error}"))?;
            println!("{rendered}");
        }
    }
    Ok(())
}

fn with_keywords(call: CallArgs, keywords: &serde_json::Map<String, Value>) -> CallArgs {
    keywords
        .iter()
        .fold(call, |call, (key, value)| call.kwarg(key.clone(), value.clone()))
}

/// One call per element, each carrying the shared keyword arguments.
fn mapped_calls(inputs: Vec<Value>, keywords: &serde_json::Map<String, Value>) -> Vec<CallArgs> {
    inputs
        .into_iter()
        .map(|input| with_keywords(CallArgs::new().arg(input), keywords))
        .collect()
}

fn print_table(functions: &[FunctionSummary]) {
    if functions.is_empty() {
        println!("no lambdapool functions found");
        return;
    }

    let now = Utc::now().naive_utc();
    println!(
        "{:<40} {:>10} {:>8} {:>8}  {}",
        "FUNCTION", "SIZE", "MEMORY", "TIMEOUT", "UPDATED"
    );
    for function in functions {
        println!(
            "{:<40} {:>10} {:>8} {:>8}  {}",
            function.name,
            format_size(function.size_bytes),
            function
                .memory_mb
                .map(|memory| format!("{memory} MB"))
                .unwrap_or_else(|| "-".to_string()),
            function
                .timeout_secs
                .map(|timeout| format!("{timeout}s"))
                .unwrap_or_else(|| "-".to_string()),
            function
                .last_updated
                .map(|stamp| humanize_time(stamp.naive_utc(), now))
                .unwrap_or_else(|| "-".to_string()),
        );
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing("warn", false);
    let cli = Cli::parse();

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}
