//! Property tests for the attempt budget

use devmon_core::executor::{AttemptFailure, RetryState};
use devmon_core::{
    Backoff, ErrorClassification, FailureSignal, Operation, RawResult, TransportError, classify,
};
use proptest::prelude::*;
use std::time::Duration;

fn operation(retries: u32, delay_ms: u64) -> Operation {
    Operation::command("probe", "uptime")
        .with_retries(retries)
        .with_backoff(Backoff::Fixed(delay_ms))
}

fn failure_strategy() -> impl Strategy<Value = AttemptFailure> {
    prop_oneof![
        (400u16..600).prop_map(|status| AttemptFailure::Rejected(
            RawResult::from_body("").with_status(status)
        )),
        Just(AttemptFailure::Transport(TransportError::Unreachable(
            "192.0.2.1".into()
        ))),
        (1u64..10_000).prop_map(|after_ms| AttemptFailure::Elapsed { after_ms }),
    ]
}

proptest! {
    /// Property: N retries allow exactly N+1 attempts of retryable failures
    #[test]
    fn budget_is_retries_plus_one(
        retries in 0u32..20,
        failures in proptest::collection::vec(failure_strategy(), 25),
    ) {
        let mut state = RetryState::for_operation(&operation(retries, 0));
        let mut made = 0u32;
        for failure in failures {
            made += 1;
            if !state.record_failure(failure) {
                break;
            }
        }

        prop_assert_eq!(made, retries + 1);
        prop_assert_eq!(state.attempts_made(), retries + 1);
        prop_assert!(!state.should_retry());
    }

    /// Property: The fixed backoff delay is returned unchanged
    #[test]
    fn fixed_backoff_is_constant(retries in 0u32..10, delay_ms in 0u64..60_000) {
        let mut state = RetryState::for_operation(&operation(retries, delay_ms));
        for _ in 0..retries {
            prop_assert_eq!(state.next_delay(), Duration::from_millis(delay_ms));
            state.record_failure(AttemptFailure::Elapsed { after_ms: 10 });
        }
    }

    /// Property: Permanent failures stop retrying regardless of budget
    #[test]
    fn invalid_config_is_never_retried(retries in 0u32..20) {
        let mut state = RetryState::for_operation(&operation(retries, 0));
        let again = state.record_failure(AttemptFailure::Transport(
            TransportError::InvalidConfig("bad pattern".into()),
        ));

        prop_assert!(!again);
        prop_assert_eq!(state.attempts_made(), 1);
    }

    /// Property: An exhausted budget of timeouts is an unavailable resource
    #[test]
    fn exhausted_timeouts_are_unavailable(retries in 0u32..5) {
        let mut state = RetryState::for_operation(&operation(retries, 0));
        while state.record_failure(AttemptFailure::Elapsed { after_ms: 5 }) {}

        prop_assert_eq!(
            state.into_classified("probe").classification,
            ErrorClassification::ResourceUnavailable
        );
    }

    /// Property: A rejected status is classified like the bare status signal
    #[test]
    fn rejected_status_matches_classifier(status in 100u16..600) {
        let mut state = RetryState::for_operation(&operation(0, 0));
        state.record_failure(AttemptFailure::Rejected(
            RawResult::from_body("").with_status(status),
        ));

        prop_assert_eq!(
            state.into_classified("probe").classification,
            classify(&FailureSignal::Status(status))
        );
    }
}
