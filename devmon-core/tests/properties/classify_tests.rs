//! Property tests for failure classification

use devmon_core::{ClassifiedError, ErrorClassification, FailureSignal, classify};
use proptest::prelude::*;

const AUTH_STATUSES: [u16; 3] = [401, 403, 407];
const UNAVAILABLE_STATUSES: [u16; 5] = [404, 410, 502, 503, 504];

fn signal_strategy() -> impl Strategy<Value = FailureSignal> {
    prop_oneof![
        (100u16..600).prop_map(FailureSignal::Status),
        Just(FailureSignal::CredentialRejected),
        any::<i32>().prop_map(FailureSignal::ExitCode),
        any::<bool>().prop_map(|partial_data| FailureSignal::Timeout { partial_data }),
        Just(FailureSignal::Unreachable),
        Just(FailureSignal::NotFound),
        Just(FailureSignal::MalformedPayload),
        Just(FailureSignal::TerminatorNotFound),
        Just(FailureSignal::PredicateFailed),
        Just(FailureSignal::Io),
        Just(FailureSignal::Unexpected),
    ]
}

proptest! {
    /// Property: Status codes map by table, everything unlisted is generic
    #[test]
    fn status_classification(status in 100u16..600) {
        let expected = if AUTH_STATUSES.contains(&status) {
            ErrorClassification::AuthenticationError
        } else if UNAVAILABLE_STATUSES.contains(&status) {
            ErrorClassification::ResourceUnavailable
        } else {
            ErrorClassification::GenericError
        };
        prop_assert_eq!(classify(&FailureSignal::Status(status)), expected);
    }

    /// Property: Only exit status 255 marks an unreachable command target
    #[test]
    fn exit_code_classification(code in any::<i32>()) {
        let expected = if code == 255 {
            ErrorClassification::ResourceUnavailable
        } else {
            ErrorClassification::GenericError
        };
        prop_assert_eq!(classify(&FailureSignal::ExitCode(code)), expected);
    }

    /// Property: Only malformed payloads are parsing errors
    #[test]
    fn parsing_is_reserved_for_malformed_payloads(signal in signal_strategy()) {
        let is_parsing = classify(&signal) == ErrorClassification::ParsingError;
        prop_assert_eq!(is_parsing, signal == FailureSignal::MalformedPayload);
    }

    /// Property: A classified error keeps its signal's classification
    #[test]
    fn classified_error_carries_classification(signal in signal_strategy(), message in ".{0,40}") {
        let err = ClassifiedError::from_signal(&signal, message.clone());
        prop_assert_eq!(err.classification, classify(&signal));
        prop_assert_eq!(err.message, message);
    }
}

#[test]
fn timeouts_depend_on_partial_data() {
    assert_eq!(
        classify(&FailureSignal::Timeout {
            partial_data: false
        }),
        ErrorClassification::ResourceUnavailable
    );
    assert_eq!(
        classify(&FailureSignal::Timeout { partial_data: true }),
        ErrorClassification::GenericError
    );
}
