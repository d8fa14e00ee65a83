//! Output helpers for CLI commands.

use serde::Serialize;

/// Renders a value as indented JSON.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn to_json(value: &impl Serialize) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Writes a value to stdout as indented JSON.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
#[allow(clippy::print_stdout)]
pub fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", to_json(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_json_is_indented() {
        let json = to_json(&serde_json::json!({"status": "running"})).expect("json");
        assert_eq!(json, "{\n  \"status\": \"running\"\n}");
    }
}
