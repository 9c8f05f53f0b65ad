//! Command-line surface of the `devmon` binary

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// `devmon` command-line interface for device monitoring probes
#[derive(Parser)]
#[command(name = "devmon")]
#[command(author, version, about = "Validate and poll monitored devices")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory holding `devices/*.toml` profiles
    #[arg(short, long, global = true, env = "DEVMON_CONFIG_DIR")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors; report output is unaffected
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Log in and run the device's probe operation
    #[command(about = "Check that a device is reachable and accepts the credentials")]
    Validate {
        /// Profile name (under `devices/`) or path to a profile file
        #[arg(short, long)]
        profile: String,

        /// Output format
        #[arg(short, long, default_value = "table", value_enum)]
        format: OutputFormat,

        /// Per-operation and connect timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Run one polling cycle and print what was collected
    #[command(about = "Collect readings and tables from a device")]
    Poll {
        /// Profile name (under `devices/`) or path to a profile file
        #[arg(short, long)]
        profile: String,

        /// Output format
        #[arg(short, long, default_value = "table", value_enum)]
        format: OutputFormat,

        /// Per-operation and connect timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// List the device profiles in the configuration directory
    #[command(about = "List configured device profiles")]
    List,
}

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Aligned text columns
    Table,
    /// The full report as JSON
    Json,
}
