//! XML / XHTML payloads
//!
//! Every element matching the record path becomes one record. Fields are
//! keyed by their path below the record element: `name`, `stats/rx`,
//! `@id` for the record's own attributes, `stats/@unit` for a child's.
//! The record element's own text is stored under `.`. Repeated child
//! elements are joined with `", "`.

use std::collections::{BTreeMap, BTreeSet};

use quick_xml::Reader;
use quick_xml::events::{BytesRef, BytesStart, Event};

use super::{NormalizeError, NormalizeResult, RawRecord};

struct OpenRecord {
    depth: usize,
    fields: BTreeMap<String, String>,
    repeated: BTreeSet<String>,
    /// Untrimmed text of elements still open, keyed like `fields`
    text: BTreeMap<String, String>,
}

impl OpenRecord {
    /// Moves the trimmed text of a closed element into its field
    fn commit(&mut self, key: &str) {
        let Some(raw) = self.text.remove(key) else {
            return;
        };
        let value = raw.trim();
        if value.is_empty() {
            return;
        }
        let entry = self.fields.entry(key.to_string()).or_default();
        if self.repeated.remove(key) && !entry.is_empty() {
            entry.push_str(", ");
        }
        entry.push_str(value);
    }
}

pub(super) fn parse(body: &str, record_path: &str) -> NormalizeResult<Vec<RawRecord>> {
    let anchored = record_path.starts_with('/');
    let segments: Vec<&str> = record_path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(NormalizeError::InvalidPattern(format!(
            "empty record path '{record_path}'"
        )));
    }

    // Text is trimmed once per element when it closes, not per event, so
    // spaces next to entity references survive
    let mut reader = Reader::from_str(body);

    let mut stack: Vec<String> = Vec::new();
    let mut current: Option<OpenRecord> = None;
    let mut records = Vec::new();
    let mut saw_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                saw_root = true;
                stack.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                open_element(&e, &stack, &segments, anchored, &mut current);
            }
            Ok(Event::Empty(e)) => {
                saw_root = true;
                stack.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                open_element(&e, &stack, &segments, anchored, &mut current);
                close_element(&stack, &mut current, &mut records);
                stack.pop();
            }
            Ok(Event::Text(e)) => {
                append_text(&stack, &mut current, &String::from_utf8_lossy(&e));
            }
            Ok(Event::CData(e)) => {
                append_text(&stack, &mut current, &String::from_utf8_lossy(&e));
            }
            Ok(Event::GeneralRef(e)) => {
                if let Some(text) = resolve_reference(&e) {
                    append_text(&stack, &mut current, &text);
                }
            }
            Ok(Event::End(_)) => {
                close_element(&stack, &mut current, &mut records);
                stack.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(NormalizeError::InvalidDocument {
                    format: "markup",
                    reason: e.to_string(),
                });
            }
            _ => {}
        }
    }

    if !saw_root {
        return Err(NormalizeError::InvalidDocument {
            format: "markup",
            reason: "no root element".to_string(),
        });
    }
    if !stack.is_empty() {
        return Err(NormalizeError::InvalidDocument {
            format: "markup",
            reason: format!("unclosed element <{}>", stack.join("/")),
        });
    }
    if records.is_empty() {
        return Err(NormalizeError::NoRecords(format!(
            "no <{record_path}> elements"
        )));
    }

    Ok(records)
}

fn matches_path(stack: &[String], segments: &[&str], anchored: bool) -> bool {
    if anchored && stack.len() != segments.len() {
        return false;
    }
    stack.len() >= segments.len()
        && stack[stack.len() - segments.len()..]
            .iter()
            .zip(segments)
            .all(|(name, segment)| name.as_str() == *segment)
}

fn attributes(e: &BytesStart<'_>) -> Vec<(String, String)> {
    e.attributes()
        .flatten()
        .map(|attr| {
            (
                String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                String::from_utf8_lossy(&attr.value).into_owned(),
            )
        })
        .collect()
}

fn open_element(
    e: &BytesStart<'_>,
    stack: &[String],
    segments: &[&str],
    anchored: bool,
    current: &mut Option<OpenRecord>,
) {
    match current {
        Some(record) => {
            let key = stack[record.depth + 1..].join("/");
            if record.fields.contains_key(&key) {
                record.repeated.insert(key.clone());
            } else {
                record.fields.insert(key.clone(), String::new());
            }
            for (name, value) in attributes(e) {
                record.fields.insert(format!("{key}/@{name}"), value);
            }
        }
        None if matches_path(stack, segments, anchored) => {
            let fields = attributes(e)
                .into_iter()
                .map(|(name, value)| (format!("@{name}"), value))
                .collect();
            *current = Some(OpenRecord {
                depth: stack.len() - 1,
                fields,
                repeated: BTreeSet::new(),
                text: BTreeMap::new(),
            });
        }
        None => {}
    }
}

fn append_text(stack: &[String], current: &mut Option<OpenRecord>, text: &str) {
    let Some(record) = current else {
        return;
    };
    if stack.len() <= record.depth {
        return;
    }
    let key = if stack.len() == record.depth + 1 {
        ".".to_string()
    } else {
        stack[record.depth + 1..].join("/")
    };
    record.text.entry(key).or_default().push_str(text);
}

fn close_element(
    stack: &[String],
    current: &mut Option<OpenRecord>,
    records: &mut Vec<RawRecord>,
) {
    let Some(record) = current else {
        return;
    };
    if stack.len() > record.depth + 1 {
        record.commit(&stack[record.depth + 1..].join("/"));
    } else if let Some(mut record) = current.take() {
        record.commit(".");
        records.push(RawRecord::Map(record.fields));
    }
}

fn resolve_reference(e: &BytesRef<'_>) -> Option<String> {
    if let Ok(Some(ch)) = e.resolve_char_ref() {
        return Some(ch.to_string());
    }
    let resolved = match String::from_utf8_lossy(e).as_ref() {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => " ",
        _ => return None,
    };
    Some(resolved.to_string())
}
