//! One module per subcommand

mod list;
mod poll;
mod validate;

use std::path::Path;

use crate::cli::Commands;
use crate::error::CliError;

/// Runs the selected subcommand
pub fn dispatch(config_path: Option<&Path>, command: Commands, quiet: bool) -> Result<(), CliError> {
    match command {
        Commands::Validate {
            profile,
            format,
            timeout,
        } => validate::cmd_validate(config_path, &profile, format, timeout, quiet),
        Commands::Poll {
            profile,
            format,
            timeout,
        } => poll::cmd_poll(config_path, &profile, format, timeout),
        Commands::List => list::cmd_list(config_path),
    }
}
