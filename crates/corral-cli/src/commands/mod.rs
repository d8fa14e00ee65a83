//! CLI command definitions and dispatch.

pub mod delete;
pub mod init;
pub mod kill;
pub mod run;
pub mod state;
pub mod stats;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use corral_common::config::RuntimeConfig;
use corral_common::constants::{DEFAULT_ROOT, ROOT_ENV};

/// corral: minimal Linux container runtime.
#[derive(Parser, Debug)]
#[command(name = "corral", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding container state.
    #[arg(long, global = true, env = ROOT_ENV, default_value = DEFAULT_ROOT)]
    pub root: PathBuf,

    /// Cgroup hierarchy root; discovered from the mount table when unset.
    #[arg(long, global = true)]
    pub cgroup_root: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Cli {
    fn runtime(&self) -> RuntimeConfig {
        RuntimeConfig {
            root: self.root.clone(),
            cgroup_root: self.cgroup_root.clone(),
        }
    }
}

/// Log line format.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a container from a bundle and run a command in it.
    Run(run::RunArgs),
    /// Print the state of a container as JSON.
    State(state::StateArgs),
    /// Send a signal to a container.
    Kill(kill::KillArgs),
    /// Delete a stopped container.
    Delete(delete::DeleteArgs),
    /// Print cgroup accounting of a container as JSON.
    Stats(stats::StatsArgs),
    /// Container init; started by the runtime, not by users.
    #[command(hide = true)]
    Init,
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    let runtime = cli.runtime();
    match cli.command {
        Command::Run(args) => run::execute(&runtime, args),
        Command::State(args) => state::execute(&runtime, &args).map(|()| ExitCode::SUCCESS),
        Command::Kill(args) => kill::execute(&runtime, &args).map(|()| ExitCode::SUCCESS),
        Command::Delete(args) => delete::execute(&runtime, &args).map(|()| ExitCode::SUCCESS),
        Command::Stats(args) => stats::execute(&runtime, &args).map(|()| ExitCode::SUCCESS),
        Command::Init => init::execute(),
    }
}
