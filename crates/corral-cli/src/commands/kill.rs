//! `corral kill`: send a signal to a container.

use std::str::FromStr;

use anyhow::Context;
use clap::Args;
use corral_common::config::RuntimeConfig;
use corral_runtime::container::Container;
use nix::sys::signal::Signal;

/// Arguments for the `kill` command.
#[derive(Args, Debug)]
pub struct KillArgs {
    /// Container identifier.
    pub id: String,

    /// Signal name (`TERM`, `SIGKILL`) or number.
    #[arg(default_value = "SIGTERM")]
    pub signal: String,

    /// Signal every process in the container, not only its init.
    #[arg(short, long)]
    pub all: bool,
}

/// Executes the `kill` command.
///
/// # Errors
///
/// Returns an error if the signal is unknown, the container cannot be
/// loaded, or delivery fails.
pub fn execute(runtime: &RuntimeConfig, args: &KillArgs) -> anyhow::Result<()> {
    let signal = parse_signal(&args.signal)?;
    let container = Container::load(runtime, &args.id)?;
    container.signal(signal, args.all)?;
    Ok(())
}

fn parse_signal(raw: &str) -> anyhow::Result<Signal> {
    if let Ok(number) = raw.parse::<i32>() {
        return Signal::try_from(number).with_context(|| format!("unknown signal {raw}"));
    }
    let upper = raw.to_ascii_uppercase();
    let name = if upper.starts_with("SIG") { upper } else { format!("SIG{upper}") };
    Signal::from_str(&name).with_context(|| format!("unknown signal {raw}"))
}
