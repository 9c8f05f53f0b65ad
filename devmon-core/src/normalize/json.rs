//! JSON payloads

use serde_json::Value;

use super::{NormalizeError, NormalizeResult, RawRecord};

/// Parses a JSON body into raw records.
///
/// With an `items` pointer the pointed-at value must be an array; without
/// one, a top-level array yields one record per element and any other value
/// yields a single record.
pub(super) fn parse(body: &str, items: Option<&str>) -> NormalizeResult<Vec<RawRecord>> {
    let document: Value =
        serde_json::from_str(body).map_err(|e| NormalizeError::InvalidDocument {
            format: "json",
            reason: e.to_string(),
        })?;

    let records = match items {
        Some(pointer) => {
            let pointer = normalize_pointer(pointer);
            match document.pointer(&pointer) {
                Some(Value::Array(items)) => items.clone(),
                _ => return Err(NormalizeError::NotAnArray(pointer)),
            }
        }
        None => match document {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        },
    };

    if records.is_empty() {
        tracing::debug!("JSON record array is empty");
    }
    Ok(records.into_iter().map(RawRecord::Json).collect())
}

fn normalize_pointer(pointer: &str) -> String {
    if pointer.is_empty() || pointer.starts_with('/') {
        pointer.to_string()
    } else {
        format!("/{pointer}")
    }
}

/// Looks `key` up in a record: a JSON pointer, a plain key or a dotted path
pub(super) fn lookup(value: &Value, key: &str) -> Option<String> {
    let found = if key.starts_with('/') {
        value.pointer(key)
    } else if let Some(direct) = value.get(key) {
        Some(direct)
    } else {
        key.split('.')
            .try_fold(value, |current, part| match current {
                Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => current.get(part),
            })
    };
    found.and_then(scalar_text)
}

/// Top-level scalar members of an object, in document order
pub(super) fn scalar_entries(value: &Value) -> Vec<(String, String)> {
    match value {
        Value::Object(map) => map
            .iter()
            .filter_map(|(k, v)| scalar_text(v).map(|text| (k.clone(), text)))
            .collect(),
        other => scalar_text(other)
            .map(|text| vec![("value".to_string(), text)])
            .unwrap_or_default(),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_items_pointer_without_slash() {
        let records = parse(r#"{"data":{"ports":[{"n":1},{"n":2}]}}"#, Some("data/ports")).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_pointer_to_object_is_not_an_array() {
        let err = parse(r#"{"items":{"id":"a"}}"#, Some("/items")).unwrap_err();
        assert_eq!(err, NormalizeError::NotAnArray("/items".into()));
        let err = parse(r#"{"other":[]}"#, Some("items")).unwrap_err();
        assert!(matches!(err, NormalizeError::NotAnArray(_)));
    }

    #[test]
    fn test_invalid_document() {
        let err = parse("<html>login</html>", None).unwrap_err();
        assert!(matches!(err, NormalizeError::InvalidDocument { format: "json", .. }));
    }

    #[test]
    fn test_lookup_forms() {
        let value = json!({
            "name": "eth0",
            "stats": {"rx": 10, "up": true},
            "addrs": [{"ip": "10.0.0.1"}]
        });
        assert_eq!(lookup(&value, "name").as_deref(), Some("eth0"));
        assert_eq!(lookup(&value, "/stats/rx").as_deref(), Some("10"));
        assert_eq!(lookup(&value, "stats.up").as_deref(), Some("true"));
        assert_eq!(lookup(&value, "addrs.0.ip").as_deref(), Some("10.0.0.1"));
        assert_eq!(lookup(&value, "stats"), None);
        assert_eq!(lookup(&value, "missing"), None);
    }
}
