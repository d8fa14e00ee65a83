//! `corral init`: the container init, re-executed by `corral run`.

use std::process::ExitCode;

/// Executes the `init` command. Returns only if the bootstrap failed.
///
/// # Errors
///
/// Fails outright on platforms without namespaces.
#[cfg(target_os = "linux")]
pub fn execute() -> anyhow::Result<ExitCode> {
    use corral_runtime::init::{self, NoopHooks};

    let code = init::run(&NoopHooks);
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

/// Executes the `init` command. Returns only if the bootstrap failed.
///
/// # Errors
///
/// Fails outright on platforms without namespaces.
#[cfg(not(target_os = "linux"))]
pub fn execute() -> anyhow::Result<ExitCode> {
    anyhow::bail!("Linux required for native container operations")
}
