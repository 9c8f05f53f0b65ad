//! Property tests for payload normalization

use devmon_core::normalize::TEXT_SENTINEL;
use devmon_core::{Encoding, FieldKind, FieldSpec, FieldValue, Normalizer};
use proptest::prelude::*;
use serde_json::json;

fn items_normalizer() -> Normalizer {
    Normalizer::new(
        Encoding::Json {
            items: Some("items".into()),
        },
        vec![
            FieldSpec::text("id").required(),
            FieldSpec::text("status"),
            FieldSpec::number("load"),
        ],
    )
}

proptest! {
    /// Property: Integers survive parse and display unchanged
    #[test]
    fn integer_numbers_display_without_fraction(n in -1_000_000_000i64..1_000_000_000) {
        let value = FieldValue::parse(&n.to_string(), FieldKind::Number).unwrap();
        prop_assert_eq!(value.to_string(), n.to_string());
    }

    /// Property: Percent signs are ignored when reading numbers
    #[test]
    fn percent_suffix_is_stripped(n in 0u32..=100) {
        let value = FieldValue::parse(&format!("{n}%"), FieldKind::Number).unwrap();
        prop_assert_eq!(value, FieldValue::Number(f64::from(n)));
    }

    /// Property: Records missing the required field are dropped, the rest are
    /// kept with sentinels for missing optional fields
    #[test]
    fn required_and_optional_fields(
        rows in proptest::collection::vec(
            (any::<bool>(), proptest::option::of("[a-z]{1,6}"), proptest::option::of(0u32..1000)),
            0..30,
        )
    ) {
        let items: Vec<serde_json::Value> = rows
            .iter()
            .enumerate()
            .map(|(i, (has_id, status, load))| {
                let mut item = serde_json::Map::new();
                if *has_id {
                    item.insert("id".into(), json!(format!("port{i}")));
                }
                if let Some(status) = status {
                    item.insert("status".into(), json!(status));
                }
                if let Some(load) = load {
                    item.insert("load".into(), json!(load));
                }
                serde_json::Value::Object(item)
            })
            .collect();
        let body = json!({ "items": items }).to_string();

        let records = items_normalizer().normalize_text(&body).unwrap();

        let kept: Vec<_> = rows.iter().filter(|(has_id, _, _)| *has_id).collect();
        prop_assert_eq!(records.len(), kept.len());
        for (record, (_, status, load)) in records.iter().zip(kept) {
            let expected_status = status.clone().unwrap_or_else(|| TEXT_SENTINEL.to_string());
            prop_assert_eq!(record.get("status"), Some(&FieldValue::Text(expected_status)));
            let expected_load = f64::from(load.unwrap_or(0));
            prop_assert_eq!(record.get("load"), Some(&FieldValue::Number(expected_load)));
        }
    }

    /// Property: Arbitrary text never panics the column parser
    #[test]
    fn column_parser_is_total(body in ".{0,200}") {
        let normalizer = Normalizer::new(
            Encoding::Columns {
                pattern: r"^(?P<name>\S+)\s+(?P<value>\d+)$".into(),
                skip_header: 0,
            },
            Vec::new(),
        );
        let _ = normalizer.normalize_text(&body);
    }
}
