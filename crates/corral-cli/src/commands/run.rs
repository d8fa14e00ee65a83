//! `corral run`: create a container from a bundle and run a command in it.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::Args;
use corral_common::config::{Config, RuntimeConfig};
use corral_common::constants::DEFAULT_PATH;
use corral_runtime::container::Container;
use corral_runtime::process::ProcessSpec;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Container identifier.
    pub id: String,

    /// Bundle directory containing `config.json`.
    #[arg(short, long, default_value = ".")]
    pub bundle: PathBuf,

    /// Working directory inside the container.
    #[arg(long, default_value = "/")]
    pub cwd: String,

    /// Environment variable for the command, as `KEY=value`.
    #[arg(short, long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Return once the command is running instead of waiting for it.
    #[arg(short, long)]
    pub detach: bool,

    /// Command and arguments to run.
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `run` command.
///
/// Without `--detach` the exit code of the container command is returned
/// and the container is deleted once it exits.
///
/// # Errors
///
/// Returns an error if the bundle is invalid or the container fails to
/// start.
pub fn execute(runtime: &RuntimeConfig, args: RunArgs) -> anyhow::Result<ExitCode> {
    let config = load_config(&args.bundle)?;
    let mut container = Container::create(runtime, &args.id, config)
        .with_context(|| format!("failed to create container {}", args.id))?;

    let process = ProcessSpec {
        args: args.command,
        env: with_default_path(args.env),
        cwd: args.cwd,
    };
    if let Err(e) = container.start(&process) {
        if let Err(cleanup) = container.destroy() {
            tracing::warn!(id = %args.id, error = %cleanup, "failed to clean up container");
        }
        return Err(e).with_context(|| format!("failed to start container {}", args.id));
    }

    if args.detach {
        tracing::info!(id = %args.id, "container running detached");
        return Ok(ExitCode::SUCCESS);
    }

    let code = container.wait()?;
    container
        .destroy()
        .with_context(|| format!("failed to delete container {}", args.id))?;
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX)))
}

fn load_config(bundle: &Path) -> anyhow::Result<Config> {
    Config::load(bundle).with_context(|| format!("invalid bundle {}", bundle.display()))
}

fn with_default_path(mut env: Vec<String>) -> Vec<String> {
    if !env.iter().any(|kv| kv.starts_with("PATH=")) {
        env.push(format!("PATH={DEFAULT_PATH}"));
    }
    env
}
