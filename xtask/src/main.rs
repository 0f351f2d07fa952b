use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{exit, Command, ExitStatus};

use clap::{Parser, Subcommand, ValueEnum};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the lambdapool workspace",
    long_about = "A unified CLI for packaging the lambdapool agent and running\n\
                  CI checks in the lambdapool workspace."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the agent binary and package it as a Lambda custom-runtime zip
    PackageAgent {
        /// Compilation target triple for the agent binary
        #[arg(long, default_value = "x86_64-unknown-linux-gnu")]
        target: String,
        /// Build profile used for the binary
        #[arg(value_enum, long, default_value_t = BuildProfile::Release)]
        profile: BuildProfile,
        /// Directory receiving `lambdapool_agent.zip`
        #[arg(long, default_value = "dist")]
        out_dir: String,
    },
    /// Run CI checks (fmt, clippy, tests, agent build)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting, clippy, and tests
    Check,
    /// Build the agent binary for the host
    Agent,
    /// Run check + agent
    All,
}

#[derive(Clone, Copy, ValueEnum)]
enum BuildProfile {
    Debug,
    Release,
}

impl BuildProfile {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }

    fn as_cargo_flag(self) -> Option<&'static str> {
        match self {
            Self::Debug => None,
            Self::Release => Some("--release"),
        }
    }
}

const AGENT_PACKAGE: &str = "lambdapool";
const AGENT_BIN: &str = "lambdapool_agent";
const AGENT_ZIP: &str = "lambdapool_agent.zip";

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn cargo(args: &[&str]) -> ExitStatus {
    eprintln!("+ cargo {}", args.join(" "));
    Command::new("cargo")
        .args(args)
        .status()
        .expect("failed to execute cargo")
}

fn run_cargo(args: &[&str]) {
    let status = cargo(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn package_agent(target: &str, profile: BuildProfile, out_dir: &str) {
    ensure_rust_target_installed(target);
    ensure_c_linker_available(target);

    step("Build agent binary");

    let mut cargo_args = vec![
        "build",
        "-p",
        AGENT_PACKAGE,
        "--target",
        target,
        "--bin",
        AGENT_BIN,
    ];
    if let Some(flag) = profile.as_cargo_flag() {
        cargo_args.push(flag);
    }
    run_cargo(&cargo_args);

    step("Package agent zip");
    let target_dir = Path::new("target").join(target).join(profile.dir_name());
    let dist_dir = Path::new(out_dir);
    fs::create_dir_all(dist_dir).expect("failed to create dist directory");

    let zip_path = dist_dir.join(AGENT_ZIP);
    if let Err(message) =
        package_lambda_zip(&target_dir.join(binary_name(AGENT_BIN, target)), &zip_path)
    {
        eprintln!("error: {message}");
        exit(1);
    }

    eprintln!(
        "\nPackaged artifact:\n- {}\nDeploy it with `lambdapool create <name> --bundle {}`",
        zip_path.display(),
        zip_path.display()
    );
}

fn ensure_rust_target_installed(target: &str) {
    let output = Command::new("rustup")
        .args(["target", "list", "--installed"])
        .output();

    let output = match output {
        Ok(value) => value,
        Err(error) => {
            eprintln!(
                "warning: failed to run `rustup target list --installed` ({error}); continuing without target preflight"
            );
            return;
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "failed to list installed rust targets; run `rustup target list --installed` manually. details: {}",
            stderr.trim()
        );
    }

    let installed = String::from_utf8_lossy(&output.stdout);
    if !installed.lines().any(|line| line.trim() == target) {
        panic!(
            "required rust target `{target}` is not installed. install it with `rustup target add {target}` and re-run `cargo run -p xtask -- package-agent`"
        );
    }
}

fn ensure_c_linker_available(target: &str) {
    if !cfg!(windows) || !target.ends_with("unknown-linux-gnu") {
        return;
    }

    let env_override_keys = [
        format!("CC_{}", target.replace('-', "_")),
        format!("CC_{target}"),
        "TARGET_CC".to_string(),
        "CC".to_string(),
    ];

    for key in env_override_keys {
        if let Ok(value) = std::env::var(&key) {
            let candidate = value.trim();
            if !candidate.is_empty() && tool_works(candidate) {
                return;
            }
        }
    }

    let canonical = "x86_64-linux-gnu-gcc";
    if tool_works(canonical) {
        return;
    }

    panic!(
        "missing C cross-linker for target `{target}`. install `{canonical}` (or set CC_x86_64_unknown_linux_gnu) before running `cargo run -p xtask -- package-agent`."
    );
}

fn tool_works(program: &str) -> bool {
    let mut parts = program.split_whitespace();
    let Some(bin) = parts.next() else {
        return false;
    };
    let args: Vec<&str> = parts.collect();

    Command::new(bin)
        .args(&args)
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn binary_name(bin_name: &str, target: &str) -> String {
    if target.contains("windows") {
        format!("{bin_name}.exe")
    } else {
        bin_name.to_string()
    }
}

/// Writes `binary_path` into `zip_path` as the executable `bootstrap` entry
/// the custom runtime expects.
fn package_lambda_zip(binary_path: &Path, zip_path: &Path) -> Result<(), String> {
    if !binary_path.exists() {
        return Err(format!(
            "expected agent binary at '{}'",
            binary_path.display()
        ));
    }

    let binary = fs::read(binary_path)
        .map_err(|error| format!("failed to read agent binary: {error}"))?;
    let file = fs::File::create(zip_path)
        .map_err(|error| format!("failed to create {}: {error}", zip_path.display()))?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);
    zip.start_file("bootstrap", options)
        .map_err(|error| format!("failed to start bootstrap entry: {error}"))?;
    zip.write_all(&binary)
        .map_err(|error| format!("failed to write bootstrap entry: {error}"))?;
    zip.finish()
        .map_err(|error| format!("failed to finish agent zip: {error}"))?;
    Ok(())
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);

    step("Test lambdapool_core");
    run_cargo(&["test", "-p", "lambdapool_core"]);

    step("Test lambdapool");
    run_cargo(&["test", "-p", "lambdapool"]);

    step("Test xtask");
    run_cargo(&["test", "-p", "xtask"]);
}

fn ci_agent() {
    step("Build agent for host");
    run_cargo(&["build", "-p", AGENT_PACKAGE, "--bin", AGENT_BIN]);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::PackageAgent {
            target,
            profile,
            out_dir,
        } => {
            package_agent(&target, profile, &out_dir);
        }
        Commands::Ci { job } => {
            match job {
                CiJob::Check => ci_check(),
                CiJob::Agent => ci_agent(),
                CiJob::All => {
                    ci_check();
                    ci_agent();
                }
            }
            eprintln!("\nCI job passed.");
        }
    }
}
