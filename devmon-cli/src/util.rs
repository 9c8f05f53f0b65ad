//! Helpers shared by the command handlers

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use devmon_core::{ConfigManager, ConfigParameters, ParameterProvider, Poller};

use crate::error::CliError;

/// Config manager rooted at `--config`, or the default devmon directory
/// from CLI args.
pub fn create_config_manager(config_path: Option<&Path>) -> Result<ConfigManager, CliError> {
    match config_path {
        Some(path) => Ok(ConfigManager::with_config_dir(path.to_path_buf())),
        None => ConfigManager::new()
            .map_err(|e| CliError::Config(format!("no configuration directory: {e}"))),
    }
}

/// Loads a profile and wires the poller for it.
///
/// `timeout` (seconds) overrides the connect timeout and every collection
/// operation's timeout.
pub fn build_poller(
    config_path: Option<&Path>,
    profile: &str,
    timeout: Option<u64>,
) -> Result<Poller, CliError> {
    let config_manager = create_config_manager(config_path)?;
    let mut config = config_manager.load_device(profile)?;
    if let Some(secs) = timeout {
        config.target.connect_timeout_secs = secs;
    }

    let parameters = ConfigParameters::new(config.clone()).resolve()?;
    let mut plan = config.profile(&parameters);
    if let Some(secs) = timeout {
        plan = plan.with_timeout(Duration::from_secs(secs));
    }
    let credentials = parameters.credentials();
    let connector = config.connector(parameters);
    tracing::debug!(
        device = %config.name,
        transport = %config.target.transport,
        strategy = config.auth.name(),
        "Poller ready"
    );

    Ok(Poller::new(
        config.name.clone(),
        Arc::new(connector),
        Arc::new(plan),
        credentials,
    )
    .with_concurrency(config.options.concurrency))
}

/// Creates the runtime a command's cycle runs on
pub fn runtime() -> Result<tokio::runtime::Runtime, CliError> {
    tokio::runtime::Runtime::new().map_err(CliError::Io)
}
