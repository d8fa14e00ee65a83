//! `corral delete`: remove a stopped container.

use clap::Args;
use corral_common::config::RuntimeConfig;
use corral_runtime::container::Container;

/// Arguments for the `delete` command.
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Container identifier.
    pub id: String,
}

/// Executes the `delete` command.
///
/// # Errors
///
/// Returns an error if the container cannot be loaded, is still running,
/// or cannot be removed.
pub fn execute(runtime: &RuntimeConfig, args: &DeleteArgs) -> anyhow::Result<()> {
    let container = Container::load(runtime, &args.id)?;
    container.destroy()?;
    Ok(())
}
