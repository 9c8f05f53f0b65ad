//! `devmon` CLI - validate and poll monitored devices
//!
//! Loads a TOML device profile, logs in over the configured transport,
//! runs the collection plan and prints readings and tables.

mod cli;
mod commands;
mod error;
mod util;

use clap::Parser;
use cli::Cli;
use devmon_core::{TracingConfig, init_tracing};

fn main() {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    if let Err(e) = init_tracing(&TracingConfig::for_cli(cli.verbose, cli.quiet)) {
        eprintln!("Warning: logging disabled: {e}");
    }

    let result = commands::dispatch(config_path, cli.command, cli.quiet);

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(e.exit_code());
    }
}
