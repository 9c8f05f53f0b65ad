//! Validate a device: log in and run its probe.

use std::fmt::Write as _;
use std::path::Path;

use devmon_core::Validation;

use crate::cli::OutputFormat;
use crate::error::CliError;
use crate::util::{build_poller, runtime};

/// Validate command handler
pub fn cmd_validate(
    config_path: Option<&Path>,
    profile: &str,
    format: OutputFormat,
    timeout: Option<u64>,
    quiet: bool,
) -> Result<(), CliError> {
    let poller = build_poller(config_path, profile, timeout)?;
    let validation = runtime()?.block_on(poller.validate())?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&validation)
                .map_err(|e| CliError::Output(format!("Failed to serialize to JSON: {e}")))?;
            println!("{json}");
        }
        OutputFormat::Table if !quiet => println!("{}", format_validation(&validation)),
        OutputFormat::Table => {}
    }
    Ok(())
}

/// One-line human summary of a validation
#[must_use]
pub fn format_validation(validation: &Validation) -> String {
    let mut line = format!(
        "✓ {} reachable over {} ({} login, {}ms)",
        validation.device,
        validation.transport,
        validation.strategy,
        validation.elapsed.as_millis()
    );
    if let Some(prompt) = &validation.prompt {
        let _ = write!(line, " prompt {prompt:?}");
    }
    line
}
