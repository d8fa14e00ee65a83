//! `corral stats`: print cgroup accounting as JSON.

use clap::Args;
use corral_common::config::RuntimeConfig;
use corral_runtime::container::Container;

use crate::output;

/// Arguments for the `stats` command.
#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Container identifier.
    pub id: String,
}

/// Executes the `stats` command.
///
/// # Errors
///
/// Returns an error if the container cannot be loaded or its accounting
/// cannot be read.
pub fn execute(runtime: &RuntimeConfig, args: &StatsArgs) -> anyhow::Result<()> {
    let container = Container::load(runtime, &args.id)?;
    output::print_json(&container.stats()?)
}
