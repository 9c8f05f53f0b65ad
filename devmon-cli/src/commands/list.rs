//! List device profiles.

use std::path::Path;

use crate::error::CliError;
use crate::util::create_config_manager;

/// List command handler
pub fn cmd_list(config_path: Option<&Path>) -> Result<(), CliError> {
    let config_manager = create_config_manager(config_path)?;
    let devices = config_manager.list_devices()?;

    if devices.is_empty() {
        println!(
            "No device profiles found in {}",
            config_manager.profiles_dir().display()
        );
        return Ok(());
    }
    for device in devices {
        println!("{device}");
    }
    Ok(())
}
