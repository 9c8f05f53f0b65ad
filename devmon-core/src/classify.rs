//! Failure classification
//!
//! Every layer of the engine reduces a raw failure to a [`FailureSignal`] and
//! asks [`classify`] which of the four outcomes the caller has to react to.
//! Classification is terminal for the current cycle; retries are exhausted by
//! the executor before this function is consulted.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The four outcomes a polling cycle can fail with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClassification {
    /// Credential rejected or expired
    AuthenticationError,
    /// Target unreachable, not found, or timed out with no usable data
    ResourceUnavailable,
    /// Payload present but structurally unusable
    ParsingError,
    /// Any other transport or unexpected failure
    GenericError,
}

impl std::fmt::Display for ErrorClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AuthenticationError => write!(f, "authentication error"),
            Self::ResourceUnavailable => write!(f, "resource unavailable"),
            Self::ParsingError => write!(f, "parsing error"),
            Self::GenericError => write!(f, "generic error"),
        }
    }
}

/// Raw failure signal extracted from a transport, session or parse boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureSignal {
    /// Protocol status code (HTTP-like)
    Status(u16),
    /// The remote side explicitly rejected the credentials
    CredentialRejected,
    /// A remote command finished with this exit status
    ExitCode(i32),
    /// The attempt timed out
    Timeout {
        /// Whether any output was received before the deadline
        partial_data: bool,
    },
    /// Host unreachable, connection refused or name resolution failure
    Unreachable,
    /// The addressed resource does not exist
    NotFound,
    /// Payload could not be parsed at the top level
    MalformedPayload,
    /// An interactive terminator never appeared within the attempt ceiling
    TerminatorNotFound,
    /// The success predicate rejected an otherwise complete response
    PredicateFailed,
    /// Local I/O failure on an established channel
    Io,
    /// Anything else, including caught panics
    Unexpected,
}

/// Maps a failure signal to its classification.
///
/// Rules apply in priority order: authentication, then unavailability,
/// then malformed payloads; everything else is a generic error.
#[must_use]
pub const fn classify(signal: &FailureSignal) -> ErrorClassification {
    if is_authentication(signal) {
        ErrorClassification::AuthenticationError
    } else if is_unavailable(signal) {
        ErrorClassification::ResourceUnavailable
    } else if matches!(signal, FailureSignal::MalformedPayload) {
        ErrorClassification::ParsingError
    } else {
        ErrorClassification::GenericError
    }
}

const fn is_authentication(signal: &FailureSignal) -> bool {
    matches!(
        signal,
        FailureSignal::CredentialRejected | FailureSignal::Status(401 | 403 | 407)
    )
}

const fn is_unavailable(signal: &FailureSignal) -> bool {
    matches!(
        signal,
        FailureSignal::Unreachable
            | FailureSignal::NotFound
            | FailureSignal::Timeout {
                partial_data: false
            }
            | FailureSignal::Status(404 | 410 | 502 | 503 | 504)
            // ssh reserves 255 for connection-level failures
            | FailureSignal::ExitCode(255)
    )
}

/// A terminal failure of a cycle: one classification plus context
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{classification}: {message}")]
pub struct ClassifiedError {
    /// The outcome the caller reacts to
    pub classification: ErrorClassification,
    /// Human-readable context (never contains credentials)
    pub message: String,
}

impl ClassifiedError {
    /// Creates a classified error
    #[must_use]
    pub fn new(classification: ErrorClassification, message: impl Into<String>) -> Self {
        Self {
            classification,
            message: message.into(),
        }
    }

    /// Classifies a signal and attaches a message
    #[must_use]
    pub fn from_signal(signal: &FailureSignal, message: impl Into<String>) -> Self {
        Self::new(classify(signal), message)
    }

    /// Shorthand for [`ErrorClassification::AuthenticationError`]
    #[must_use]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorClassification::AuthenticationError, message)
    }

    /// Shorthand for [`ErrorClassification::ResourceUnavailable`]
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorClassification::ResourceUnavailable, message)
    }

    /// Shorthand for [`ErrorClassification::ParsingError`]
    #[must_use]
    pub fn parsing(message: impl Into<String>) -> Self {
        Self::new(ErrorClassification::ParsingError, message)
    }

    /// Shorthand for [`ErrorClassification::GenericError`]
    #[must_use]
    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(ErrorClassification::GenericError, message)
    }

    /// Returns true for [`ErrorClassification::AuthenticationError`]
    #[must_use]
    pub fn is_authentication(&self) -> bool {
        self.classification == ErrorClassification::AuthenticationError
    }
}
