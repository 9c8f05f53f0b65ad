//! Retry bookkeeping for operation attempts
//!
//! An operation with a retry budget of N gets at most N+1 attempts. Each
//! failed attempt (transport error, elapsed deadline or a response that does
//! not satisfy the success predicate) is recorded; once the budget is spent
//! the last failure is classified.

use std::time::Duration;

use crate::classify::{ClassifiedError, FailureSignal};
use crate::operation::{Backoff, Operation, RawResult};
use crate::transport::TransportError;

/// Why a single attempt did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// The transport reported an error
    Transport(TransportError),
    /// A response arrived but the success predicate rejected it
    Rejected(RawResult),
    /// The attempt outlived its deadline
    Elapsed {
        /// Milliseconds allowed
        after_ms: u64,
    },
}

impl AttemptFailure {
    /// The failure signal the classifier consumes
    #[must_use]
    pub fn signal(&self) -> FailureSignal {
        match self {
            Self::Transport(e) => e.signal(),
            Self::Rejected(result) => {
                if let Some(status) = result.status {
                    FailureSignal::Status(status)
                } else if let Some(code) = result.exit_code {
                    FailureSignal::ExitCode(code)
                } else {
                    FailureSignal::PredicateFailed
                }
            }
            Self::Elapsed { .. } => FailureSignal::Timeout {
                partial_data: false,
            },
        }
    }

    /// Errors no retry can fix
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::Transport(
                TransportError::InvalidConfig(_) | TransportError::UnsupportedTarget { .. }
            )
        )
    }

    fn describe(&self) -> String {
        match self {
            Self::Transport(e) => e.to_string(),
            Self::Rejected(result) => match (result.status, result.exit_code) {
                (Some(status), _) => format!("unexpected status {status}"),
                (None, Some(code)) => format!("unexpected exit code {code}"),
                (None, None) => "response did not match the success condition".to_string(),
            },
            Self::Elapsed { after_ms } => format!("no response within {after_ms}ms"),
        }
    }
}

/// Attempt counter for one operation
#[derive(Debug, Clone)]
pub struct RetryState {
    /// Attempts made so far
    attempts: u32,
    /// Attempts permitted
    max_attempts: u32,
    /// Delay between attempts
    backoff: Backoff,
    /// Last failure, if any
    last_failure: Option<AttemptFailure>,
}

impl RetryState {
    /// Creates a state from the operation's retry budget and backoff
    #[must_use]
    pub const fn for_operation(operation: &Operation) -> Self {
        Self {
            attempts: 0,
            max_attempts: operation.max_attempts(),
            backoff: operation.backoff,
            last_failure: None,
        }
    }

    /// Number of the attempt about to be made (1-indexed, for display)
    #[must_use]
    pub const fn attempt_number(&self) -> u32 {
        self.attempts + 1
    }

    /// Attempts made so far
    #[must_use]
    pub const fn attempts_made(&self) -> u32 {
        self.attempts
    }

    /// Total attempts permitted
    #[must_use]
    pub const fn total_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt may be made
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Delay before the next attempt
    #[must_use]
    pub const fn next_delay(&self) -> Duration {
        self.backoff.delay()
    }

    /// Records a failed attempt.
    ///
    /// Returns `true` if another attempt will be made, `false` if the budget
    /// is exhausted or the failure is permanent.
    pub fn record_failure(&mut self, failure: AttemptFailure) -> bool {
        self.attempts += 1;
        let permanent = failure.is_permanent();
        self.last_failure = Some(failure);
        !permanent && self.should_retry()
    }

    /// Records a successful attempt
    pub fn record_success(&mut self) {
        self.attempts += 1;
        self.last_failure = None;
    }

    /// The last recorded failure
    #[must_use]
    pub const fn last_failure(&self) -> Option<&AttemptFailure> {
        self.last_failure.as_ref()
    }

    /// Classifies the last failure
    #[must_use]
    pub fn into_classified(self, operation: &str) -> ClassifiedError {
        match self.last_failure {
            Some(failure) => ClassifiedError::from_signal(
                &failure.signal(),
                format!(
                    "{operation}: {} (after {} of {} attempts)",
                    failure.describe(),
                    self.attempts,
                    self.max_attempts
                ),
            ),
            None => ClassifiedError::generic(format!("{operation}: no attempt was made")),
        }
    }
}
