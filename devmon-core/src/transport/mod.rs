//! Transport clients
//!
//! One implementation per transport family:
//!
//! - [`HttpTransport`] - request/response over HTTP(S) with an optional cookie jar
//! - [`ShellTransport`] - persistent interactive shell (telnet-style TCP or `ssh -tt`)
//! - [`CommandTransport`] - structured remote command via the system `ssh` client
//! - [`TerminalTransport`] - line-oriented terminal for menu-driven systems
//!
//! Each is opened from its own configuration, answers [`Operation`]s through
//! the object-safe [`Transport`] trait and is closed at the end of the cycle.

pub mod ansi;
mod command;
mod http;
mod shell;
mod stream;
mod terminal;

#[cfg(test)]
pub(crate) mod fixtures;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use command::{CommandConfig, CommandLauncher, CommandTransport};
pub use http::{HttpConfig, HttpScheme, HttpTransport};
pub use shell::{ShellConfig, ShellLauncher, ShellTransport};
pub use stream::connect_tcp;
pub use terminal::{TerminalConfig, TerminalTransport};

use crate::classify::{ClassifiedError, FailureSignal};
use crate::operation::{Operation, RawResult};

/// Transport family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Request/response (HTTP-like)
    Http,
    /// Interactive shell channel
    Shell,
    /// Structured remote command
    Command,
    /// Line-oriented terminal session
    Terminal,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Shell => write!(f, "shell"),
            Self::Command => write!(f, "command"),
            Self::Terminal => write!(f, "terminal"),
        }
    }
}

/// Errors raised while opening a transport or sending an operation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Host unreachable or name resolution failed
    #[error("Host unreachable: {0}")]
    Unreachable(String),

    /// The remote host refused the connection
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// The attempt did not complete in time
    #[error("Timed out after {after_ms}ms ({received} bytes received)")]
    Timeout {
        /// Elapsed milliseconds
        after_ms: u64,
        /// Bytes received before the deadline
        received: usize,
    },

    /// The terminator never appeared within the resend ceiling
    #[error("Terminator not found after {attempts} attempts")]
    TerminatorNotFound {
        /// Attempts made
        attempts: u32,
    },

    /// The remote side rejected the credentials
    #[error("Credentials rejected: {0}")]
    CredentialRejected(String),

    /// A remote command could not be started or its channel failed
    #[error("Remote command failed (exit {exit_code}): {stderr}")]
    CommandFailed {
        /// Exit status
        exit_code: i32,
        /// Captured standard error
        stderr: String,
    },

    /// The channel was closed by the remote side
    #[error("Channel closed")]
    Closed,

    /// The transport cannot carry this kind of operation
    #[error("{transport} transport cannot send {target} operations")]
    UnsupportedTarget {
        /// Transport family
        transport: TransportKind,
        /// Operation target kind
        target: &'static str,
    },

    /// Invalid transport or operation configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error on an established channel
    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// The failure signal the classifier consumes
    #[must_use]
    pub const fn signal(&self) -> FailureSignal {
        match self {
            Self::Unreachable(_) | Self::ConnectionRefused(_) => FailureSignal::Unreachable,
            Self::Timeout { received, .. } => FailureSignal::Timeout {
                partial_data: *received > 0,
            },
            Self::TerminatorNotFound { .. } => FailureSignal::TerminatorNotFound,
            Self::CredentialRejected(_) => FailureSignal::CredentialRejected,
            Self::CommandFailed { exit_code, .. } => FailureSignal::ExitCode(*exit_code),
            Self::Closed | Self::Io(_) => FailureSignal::Io,
            Self::UnsupportedTarget { .. } | Self::InvalidConfig(_) => FailureSignal::Unexpected,
        }
    }

    /// Classifies the error
    #[must_use]
    pub fn classified(&self, operation: &str) -> ClassifiedError {
        ClassifiedError::from_signal(&self.signal(), format!("{operation}: {self}"))
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// An open channel to a device
///
/// `send` takes `&self`: request/response transports may serve concurrent
/// fan-out, while channel-based transports serialize internally so that only
/// one operation is in flight per channel.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport family
    fn kind(&self) -> TransportKind;

    /// Sends one operation and returns the raw result.
    ///
    /// Per-attempt timeouts are enforced by the caller; implementations
    /// additionally honor [`Operation::timeout`] for pattern waits.
    async fn send(&self, operation: &Operation) -> TransportResult<RawResult>;

    /// Releases the channel. Idempotent.
    async fn close(&self);
}

/// Target kind name for error messages
pub(crate) const fn target_name(operation: &Operation) -> &'static str {
    use crate::operation::Target;
    match operation.target {
        Target::Http(_) => "http",
        Target::Shell(_) => "shell",
        Target::Command(_) => "command",
        Target::Terminal(_) => "terminal",
    }
}
