//! Line-oriented text payloads: key/value sections and regex columns

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use super::{BlockDelimiter, NormalizeError, NormalizeResult, RawRecord};
use crate::transport::ansi::strip_control_sequences;

static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\r?\n").expect("BLANK_LINES is a valid regex pattern"));

pub(super) fn parse_key_value(
    body: &str,
    delimiter: &BlockDelimiter,
    separator: &str,
) -> NormalizeResult<Vec<RawRecord>> {
    let body = strip_control_sequences(body);
    let sections: Vec<String> = match delimiter {
        BlockDelimiter::BlankLine => BLANK_LINES.split(&body).map(str::to_string).collect(),
        BlockDelimiter::Marker(pattern) => {
            let marker = Regex::new(pattern)
                .map_err(|e| NormalizeError::InvalidPattern(format!("{pattern}: {e}")))?;
            split_on_markers(&body, &marker)
        }
    };
    parse_sections(&sections, separator)
}

fn split_on_markers(body: &str, marker: &Regex) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current = String::new();
    for line in body.lines() {
        if marker.is_match(line) {
            sections.push(std::mem::take(&mut current));
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    sections.push(current);
    sections
}

pub(super) fn parse_sections(
    sections: &[String],
    separator: &str,
) -> NormalizeResult<Vec<RawRecord>> {
    if separator.is_empty() {
        return Err(NormalizeError::InvalidPattern(
            "empty key/value separator".to_string(),
        ));
    }

    let records: Vec<RawRecord> = sections
        .iter()
        .filter_map(|section| {
            let pairs: BTreeMap<String, String> = section
                .lines()
                .filter_map(|line| line.split_once(separator))
                .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
                .filter(|(key, _)| !key.is_empty())
                .collect();
            (!pairs.is_empty()).then_some(RawRecord::Map(pairs))
        })
        .collect();

    if records.is_empty() {
        return Err(NormalizeError::NoRecords(format!(
            "no '{separator}'-separated sections"
        )));
    }
    Ok(records)
}

pub(super) fn parse_columns(
    body: &str,
    pattern: &str,
    skip_header: usize,
) -> NormalizeResult<Vec<RawRecord>> {
    let regex =
        Regex::new(pattern).map_err(|e| NormalizeError::InvalidPattern(format!("{pattern}: {e}")))?;
    let names: Vec<&str> = regex.capture_names().flatten().collect();
    if names.is_empty() {
        return Err(NormalizeError::InvalidPattern(format!(
            "{pattern}: no named capture groups"
        )));
    }

    let body = strip_control_sequences(body);
    let records: Vec<RawRecord> = body
        .lines()
        .skip(skip_header)
        .filter_map(|line| regex.captures(line.trim_end()))
        .map(|caps| {
            RawRecord::Map(
                names
                    .iter()
                    .filter_map(|name| {
                        caps.name(name)
                            .map(|m| ((*name).to_string(), m.as_str().trim().to_string()))
                    })
                    .collect(),
            )
        })
        .collect();

    if records.is_empty() {
        return Err(NormalizeError::NoRecords(format!(
            "no lines match {pattern}"
        )));
    }
    Ok(records)
}
