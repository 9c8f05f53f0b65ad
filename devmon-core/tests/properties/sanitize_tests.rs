//! Property tests for record id sanitizing and collision handling

use devmon_core::report::{MAX_ID_LEN, is_valid_id, with_suffix};
use devmon_core::{CollisionPolicy, FieldValue, Table, sanitize_id};
use proptest::prelude::*;
use std::collections::HashSet;

proptest! {
    /// Property: Any label sanitizes to a valid id
    #[test]
    fn sanitized_ids_are_valid(label in any::<String>()) {
        let id = sanitize_id(&label);
        prop_assert!(is_valid_id(&id), "invalid id {id:?} from {label:?}");
        prop_assert!(id.len() <= MAX_ID_LEN);
    }

    /// Property: Sanitizing twice equals sanitizing once
    #[test]
    fn sanitize_is_idempotent(label in any::<String>()) {
        let once = sanitize_id(&label);
        prop_assert_eq!(sanitize_id(&once), once);
    }

    /// Property: Labels that are already valid ids pass through unchanged
    #[test]
    fn valid_ids_are_untouched(id in "[a-z0-9_.-]{1,50}") {
        prop_assert_eq!(sanitize_id(&id), id);
    }

    /// Property: Suffixed ids stay within the length limit
    #[test]
    fn suffix_fits(base in "[a-z0-9_.-]{1,50}", n in 2usize..100_000) {
        let id = with_suffix(&base, n);
        prop_assert!(id.len() <= MAX_ID_LEN);
        let expected_suffix = format!("_{n}");
        prop_assert!(id.ends_with(&expected_suffix));
        prop_assert!(is_valid_id(&id));
    }

    /// Property: Colliding labels still produce one row each with distinct ids
    #[test]
    fn suffix_policy_keeps_every_row(labels in proptest::collection::vec("[A-Za-z ]{0,8}", 1..40)) {
        let mut table = Table::new("ports", vec!["value".to_string()])
            .with_policy(CollisionPolicy::Suffix);
        let mut seen = HashSet::new();

        for label in &labels {
            let id = table
                .insert_record(label, vec![FieldValue::Text(label.clone())])
                .unwrap();
            prop_assert!(is_valid_id(&id));
            prop_assert!(seen.insert(id));
        }
        prop_assert_eq!(table.len(), labels.len());
    }
}
