//! Output normalization
//!
//! Turns a raw response into a list of [`NormalizedRecord`]s. Each payload
//! shape has its own parser ([`Encoding`]); the declared [`FieldSpec`]s are
//! then projected onto every raw record. Parsing is strict per payload (an
//! unrecognized document fails the whole operation) and tolerant per record
//! (missing optional fields take a default).

mod json;
mod markup;
mod text;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classify::ClassifiedError;
use crate::operation::RawResult;
use crate::tracing::span_names;

/// Placeholder for missing text fields
pub const TEXT_SENTINEL: &str = "N/A";

/// Errors raised while parsing a payload
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    /// The payload is not a well-formed document of the declared shape
    #[error("Invalid {format} document: {reason}")]
    InvalidDocument {
        /// Declared payload format
        format: &'static str,
        /// Parser message
        reason: String,
    },

    /// The record pointer does not resolve to an array
    #[error("JSON pointer {0} does not resolve to an array")]
    NotAnArray(String),

    /// No records, sections or lines matched
    #[error("No records found: {0}")]
    NoRecords(String),

    /// A configured pattern does not compile
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

impl NormalizeError {
    /// Classifies the error; a bad pattern is a configuration problem, every
    /// other failure is a parsing error
    #[must_use]
    pub fn classified(&self, operation: &str) -> ClassifiedError {
        match self {
            Self::InvalidPattern(_) => ClassifiedError::generic(format!("{operation}: {self}")),
            _ => ClassifiedError::parsing(format!("{operation}: {self}")),
        }
    }
}

/// Result type for normalization
pub type NormalizeResult<T> = Result<T, NormalizeError>;

/// Records kept from one payload and how many were dropped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    /// Records with every required field
    pub records: Vec<NormalizedRecord>,
    /// Records dropped for a missing or invalid required field
    pub skipped: usize,
}

/// Declared type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Free text
    #[default]
    Text,
    /// Numeric value
    Number,
    /// Point in time
    DateTime,
}

/// A typed field value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Text
    Text(String),
    /// Number
    Number(f64),
    /// Timestamp (UTC)
    DateTime(DateTime<Utc>),
    /// No value
    Absent,
}

impl FieldValue {
    /// The kind's placeholder for a missing value
    #[must_use]
    pub fn sentinel(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Text => Self::Text(TEXT_SENTINEL.to_string()),
            FieldKind::Number => Self::Number(0.0),
            FieldKind::DateTime => Self::Absent,
        }
    }

    /// Parses `raw` as `kind`; `None` if it does not parse
    #[must_use]
    pub fn parse(raw: &str, kind: FieldKind) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        match kind {
            FieldKind::Text => Some(Self::Text(raw.to_string())),
            FieldKind::Number => parse_number(raw).map(Self::Number),
            FieldKind::DateTime => parse_datetime(raw).map(Self::DateTime),
        }
    }

    /// Text content, if this is a text value
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric content, if this is a number
    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            #[allow(clippy::cast_possible_truncation)]
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Self::Number(n) => write!(f, "{n}"),
            Self::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Self::Absent => Ok(()),
        }
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.strip_suffix('%').unwrap_or(raw).trim();
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

/// How one output field is read from a raw record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Output field name
    pub name: String,
    /// Source key in the raw record (defaults to `name`). JSON records
    /// accept a pointer (`/a/b`) or a dotted path (`a.b`); markup records
    /// accept `child`, `child/sub` or `@attr`.
    #[serde(default)]
    pub source: Option<String>,
    /// Declared type
    #[serde(default)]
    pub kind: FieldKind,
    /// Records without this field are skipped
    #[serde(default)]
    pub required: bool,
    /// Value used when the field is missing or does not parse
    #[serde(default)]
    pub default: Option<String>,
}

impl FieldSpec {
    /// Creates an optional field of `kind`
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            source: None,
            kind,
            required: false,
            default: None,
        }
    }

    /// Creates an optional text field
    #[must_use]
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    /// Creates an optional numeric field
    #[must_use]
    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Number)
    }

    /// Creates an optional timestamp field
    #[must_use]
    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::DateTime)
    }

    /// Marks the field as required
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Reads the field from a different source key
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the fallback value
    #[must_use]
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Source key in the raw record
    #[must_use]
    pub fn source_key(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.name)
    }

    /// Resolves the field from its raw text.
    ///
    /// Returns `None` only for a required field that is missing or does not
    /// parse.
    #[must_use]
    pub fn resolve(&self, raw: Option<&str>) -> Option<FieldValue> {
        if let Some(value) = raw.and_then(|r| FieldValue::parse(r, self.kind)) {
            return Some(value);
        }
        if self.required {
            return None;
        }
        Some(
            self.default
                .as_deref()
                .and_then(|d| FieldValue::parse(d, self.kind))
                .unwrap_or_else(|| FieldValue::sentinel(self.kind)),
        )
    }
}

/// Delimiter between key/value sections
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "pattern", rename_all = "snake_case")]
pub enum BlockDelimiter {
    /// One or more blank lines
    #[default]
    BlankLine,
    /// Lines matching the regex (the marker line itself is dropped)
    Marker(String),
}

/// Payload shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum Encoding {
    /// JSON document
    Json {
        /// Pointer to the record array; the document itself when absent
        #[serde(default)]
        items: Option<String>,
    },
    /// XML document
    Markup {
        /// Slash-separated element path of each record, e.g. `ports/port`
        record_path: String,
    },
    /// Sections of `key<separator>value` lines
    KeyValueBlocks {
        /// Section delimiter
        #[serde(default)]
        delimiter: BlockDelimiter,
        /// Key/value separator
        #[serde(default = "default_separator")]
        separator: String,
    },
    /// One record per line matching a regex with named groups
    Columns {
        /// Regex with named capture groups
        pattern: String,
        /// Leading lines to ignore
        #[serde(default)]
        skip_header: usize,
    },
}

fn default_separator() -> String {
    ":".to_string()
}

impl Encoding {
    /// Format name for logs and errors
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Json { .. } => "json",
            Self::Markup { .. } => "markup",
            Self::KeyValueBlocks { .. } => "key_value_blocks",
            Self::Columns { .. } => "columns",
        }
    }
}

/// A record as parsed, before field projection
#[derive(Debug, Clone)]
pub(crate) enum RawRecord {
    /// A JSON value (usually an object)
    Json(serde_json::Value),
    /// Flat key to text map
    Map(BTreeMap<String, String>),
}

impl RawRecord {
    fn lookup(&self, key: &str) -> Option<String> {
        match self {
            Self::Json(value) => json::lookup(value, key),
            Self::Map(map) => map.get(key).cloned(),
        }
    }

    fn entries(&self) -> Vec<(String, String)> {
        match self {
            Self::Json(value) => json::scalar_entries(value),
            Self::Map(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }
}

/// One normalized record: ordered field name to value
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct NormalizedRecord {
    fields: Vec<(String, FieldValue)>,
}

impl NormalizedRecord {
    /// Creates an empty record
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field, replacing an earlier one with the same name
    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        let name = name.into();
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.fields.push((name, value));
        }
    }

    /// Value of a field
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Field names in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    /// Fields in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of fields
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Parser for one payload shape plus its field declarations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Normalizer {
    /// Payload shape
    #[serde(flatten)]
    pub encoding: Encoding,
    /// Declared fields; when empty every scalar becomes a text field
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

impl Normalizer {
    /// Creates a normalizer
    #[must_use]
    pub const fn new(encoding: Encoding, fields: Vec<FieldSpec>) -> Self {
        Self { encoding, fields }
    }

    /// Normalizes a raw result.
    ///
    /// Shell results already split into blocks are used as key/value
    /// sections directly.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload does not have the declared shape or
    /// contains no records.
    pub fn normalize(&self, result: &RawResult) -> NormalizeResult<Vec<NormalizedRecord>> {
        self.normalize_counted(result).map(|n| n.records)
    }

    /// Like [`Self::normalize`], also counting records dropped for a missing
    /// or invalid required field
    ///
    /// # Errors
    ///
    /// Same as [`Self::normalize`].
    pub fn normalize_counted(&self, result: &RawResult) -> NormalizeResult<Normalized> {
        let span = tracing::debug_span!(span_names::NORMALIZE_PARSE, format = self.encoding.name());
        let _enter = span.enter();

        let raw = match &self.encoding {
            Encoding::Json { items } => json::parse(&result.body, items.as_deref())?,
            Encoding::Markup { record_path } => markup::parse(&result.body, record_path)?,
            Encoding::KeyValueBlocks { separator, .. } if !result.blocks.is_empty() => {
                text::parse_sections(&result.blocks, separator)?
            }
            Encoding::KeyValueBlocks {
                delimiter,
                separator,
            } => text::parse_key_value(&result.body, delimiter, separator)?,
            Encoding::Columns {
                pattern,
                skip_header,
            } => text::parse_columns(&result.body, pattern, *skip_header)?,
        };

        let records = self.project(&raw);
        let skipped = raw.len() - records.len();
        tracing::debug!(parsed = raw.len(), kept = records.len(), "Payload normalized");
        Ok(Normalized { records, skipped })
    }

    /// Normalizes a bare body
    ///
    /// # Errors
    ///
    /// Same as [`Self::normalize`].
    pub fn normalize_text(&self, body: &str) -> NormalizeResult<Vec<NormalizedRecord>> {
        self.normalize(&RawResult::from_body(body))
    }

    fn project(&self, raw: &[RawRecord]) -> Vec<NormalizedRecord> {
        let mut records = Vec::with_capacity(raw.len());

        'records: for (index, raw_record) in raw.iter().enumerate() {
            let mut record = NormalizedRecord::new();

            if self.fields.is_empty() {
                for (key, value) in raw_record.entries() {
                    record.insert(key, FieldValue::Text(value));
                }
                records.push(record);
                continue;
            }

            for spec in &self.fields {
                let source = raw_record.lookup(spec.source_key());
                match spec.resolve(source.as_deref()) {
                    Some(value) => record.insert(spec.name.clone(), value),
                    None => {
                        tracing::warn!(
                            index,
                            field = %spec.name,
                            "Record skipped: required field missing or invalid"
                        );
                        continue 'records;
                    }
                }
            }
            records.push(record);
        }

        records
    }
}
