//! `corral state`: print a container's state as JSON.

use clap::Args;
use corral_common::config::RuntimeConfig;
use corral_common::types::Status;
use corral_runtime::container::Container;
use corral_runtime::state::State;
use serde::Serialize;

use crate::output;

/// Arguments for the `state` command.
#[derive(Args, Debug)]
pub struct StateArgs {
    /// Container identifier.
    pub id: String,
}

/// Persisted state plus the status derived right now.
#[derive(Serialize)]
struct StateOutput {
    status: Status,
    #[serde(flatten)]
    state: State,
}

/// Executes the `state` command.
///
/// # Errors
///
/// Returns an error if the container cannot be loaded.
pub fn execute(runtime: &RuntimeConfig, args: &StateArgs) -> anyhow::Result<()> {
    let container = Container::load(runtime, &args.id)?;
    output::print_json(&StateOutput {
        status: container.status(),
        state: container.state(),
    })
}
