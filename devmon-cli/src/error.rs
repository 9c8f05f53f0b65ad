//! CLI error types and exit codes.

use devmon_core::{ClassifiedError, ConfigError, ErrorClassification};

/// Exit codes for CLI operations
pub mod exit_codes {
    /// Unclassified failure, including output errors
    pub const GENERAL_ERROR: i32 = 1;
    /// Missing or invalid profile (clap also uses 2 for usage errors)
    pub const CONFIG_ERROR: i32 = 2;
    /// The device rejected the credentials
    pub const AUTHENTICATION_ERROR: i32 = 3;
    /// The device or resource could not be reached
    pub const RESOURCE_UNAVAILABLE: i32 = 4;
    /// The device answered with an unusable payload
    pub const PARSING_ERROR: i32 = 5;
}

/// CLI error type
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A validation or polling cycle failed
    #[error("{0}")]
    Cycle(#[from] ClassifiedError),

    /// Results could not be written
    #[error("Output error: {0}")]
    Output(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl CliError {
    /// Returns the exit code for this error.
    ///
    /// Cycle failures map their classification to a distinct code so that
    /// schedulers can react without parsing messages.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => exit_codes::CONFIG_ERROR,
            Self::Cycle(e) => match e.classification {
                ErrorClassification::AuthenticationError => exit_codes::AUTHENTICATION_ERROR,
                ErrorClassification::ResourceUnavailable => exit_codes::RESOURCE_UNAVAILABLE,
                ErrorClassification::ParsingError => exit_codes::PARSING_ERROR,
                ErrorClassification::GenericError => exit_codes::GENERAL_ERROR,
            },
            Self::Output(_) | Self::Io(_) => exit_codes::GENERAL_ERROR,
        }
    }
}
