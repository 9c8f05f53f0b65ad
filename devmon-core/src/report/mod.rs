//! Result reporting
//!
//! A polling cycle produces scalar [`Reading`]s and [`Table`]s of
//! records. Both are gathered by a [`Reporter`] and handed to the
//! [`MonitoringSink`] as one [`PollReport`] once every operation has
//! resolved.

mod sanitize;

pub use sanitize::{MAX_ID_LEN, UNNAMED_ID, is_valid_id, sanitize_id, with_suffix};

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::classify::ClassifiedError;
use crate::normalize::FieldValue;

/// Upper bound on `_N` suffixes tried for one colliding id
const MAX_SUFFIX: usize = 10_000;

/// Errors raised while building a report
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReportError {
    /// A record id is already present and collisions are rejected
    #[error("Duplicate id '{id}' in {table}")]
    DuplicateId {
        /// Table id (or `readings`)
        table: String,
        /// Colliding id
        id: String,
    },

    /// Row width does not match the table's columns
    #[error("Row '{id}' in {table} has {actual} values, expected {expected}")]
    ArityMismatch {
        /// Table id
        table: String,
        /// Row id
        id: String,
        /// Column count
        expected: usize,
        /// Values supplied
        actual: usize,
    },

    /// No free suffix left for a colliding id
    #[error("No free id for '{id}' in {table}")]
    IdSpaceExhausted {
        /// Table id
        table: String,
        /// Base id
        id: String,
    },

    /// The sink refused the report
    #[error("Monitoring sink error: {0}")]
    Sink(String),
}

impl ReportError {
    /// Report errors are never caused by the device
    #[must_use]
    pub fn classified(&self) -> ClassifiedError {
        ClassifiedError::generic(self.to_string())
    }
}

/// Result type for reporting
pub type ReportResult<T> = Result<T, ReportError>;

/// What happens when a record id is already taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Fail the insert
    Reject,
    /// Append `_2`, `_3`, ... until the id is free
    #[default]
    Suffix,
}

/// How a reading's value should be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingKind {
    /// Point-in-time level
    #[default]
    Gauge,
    /// Monotonic counter
    Counter,
    /// Textual state
    State,
}

/// A scalar measurement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    /// Sanitized id
    pub id: String,
    /// Display label
    pub label: String,
    /// Value
    pub value: FieldValue,
    /// Unit, if any
    pub unit: Option<String>,
    /// Interpretation
    pub kind: ReadingKind,
}

impl Reading {
    /// Creates a gauge reading; the id is derived from the label
    #[must_use]
    pub fn new(label: impl Into<String>, value: FieldValue) -> Self {
        let label = label.into();
        Self {
            id: sanitize_id(&label),
            label,
            value,
            unit: None,
            kind: ReadingKind::Gauge,
        }
    }

    /// Sets the unit
    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Sets the kind
    #[must_use]
    pub const fn with_kind(mut self, kind: ReadingKind) -> Self {
        self.kind = kind;
        self
    }
}

/// One row of a table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
    /// Unique id within the table
    pub record_id: String,
    /// Values, one per column
    pub values: Vec<FieldValue>,
}

/// A table of records with unique ids
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    id: String,
    columns: Vec<String>,
    rows: Vec<TableRow>,
    #[serde(skip)]
    policy: CollisionPolicy,
    #[serde(skip)]
    taken: HashSet<String>,
}

impl Table {
    /// Creates an empty table
    #[must_use]
    pub fn new(id: &str, columns: Vec<String>) -> Self {
        Self {
            id: sanitize_id(id),
            columns,
            rows: Vec::new(),
            policy: CollisionPolicy::default(),
            taken: HashSet::new(),
        }
    }

    /// Sets the collision policy
    #[must_use]
    pub const fn with_policy(mut self, policy: CollisionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Table id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Column names
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows in insertion order
    #[must_use]
    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row by id
    #[must_use]
    pub fn row(&self, record_id: &str) -> Option<&TableRow> {
        self.rows.iter().find(|r| r.record_id == record_id)
    }

    /// Inserts a row and returns the id it was stored under.
    ///
    /// The id is sanitized first. Existing rows are never overwritten.
    pub fn insert_record(&mut self, id: &str, values: Vec<FieldValue>) -> ReportResult<String> {
        let base = sanitize_id(id);
        if values.len() != self.columns.len() {
            return Err(ReportError::ArityMismatch {
                table: self.id.clone(),
                id: base,
                expected: self.columns.len(),
                actual: values.len(),
            });
        }

        let record_id = self.free_id(base)?;
        self.taken.insert(record_id.clone());
        self.rows.push(TableRow {
            record_id: record_id.clone(),
            values,
        });
        Ok(record_id)
    }

    fn free_id(&self, base: String) -> ReportResult<String> {
        if !self.taken.contains(&base) {
            return Ok(base);
        }
        match self.policy {
            CollisionPolicy::Reject => Err(ReportError::DuplicateId {
                table: self.id.clone(),
                id: base,
            }),
            CollisionPolicy::Suffix => (2..=MAX_SUFFIX)
                .map(|n| with_suffix(&base, n))
                .find(|candidate| !self.taken.contains(candidate))
                .ok_or_else(|| ReportError::IdSpaceExhausted {
                    table: self.id.clone(),
                    id: base.clone(),
                }),
        }
    }
}

/// A single emitted record
#[derive(Debug, Clone, PartialEq)]
pub enum MonitoringRecord {
    /// Scalar reading
    Reading(Reading),
    /// Table row
    TableRow {
        /// Table id
        table_id: String,
        /// Row id
        record_id: String,
        /// Row values
        values: Vec<FieldValue>,
    },
}

/// Receiver of a cycle's results
pub trait MonitoringSink: Send {
    /// Adds a scalar reading
    fn add_reading(&mut self, reading: Reading) -> ReportResult<()>;

    /// Adds a complete table
    fn add_table(&mut self, table: Table) -> ReportResult<()>;
}

/// Sink that keeps everything in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    /// Readings received
    pub readings: Vec<Reading>,
    /// Tables received
    pub tables: Vec<Table>,
}

impl MemorySink {
    /// Creates an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total readings plus table rows
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.readings.len() + self.tables.iter().map(Table::len).sum::<usize>()
    }
}

impl MonitoringSink for MemorySink {
    fn add_reading(&mut self, reading: Reading) -> ReportResult<()> {
        self.readings.push(reading);
        Ok(())
    }

    fn add_table(&mut self, table: Table) -> ReportResult<()> {
        self.tables.push(table);
        Ok(())
    }
}

/// Everything a cycle produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollReport {
    /// Cycle id
    pub run_id: Uuid,
    /// Device name
    pub device: String,
    /// Cycle start
    pub started_at: DateTime<Utc>,
    /// Cycle end
    pub finished_at: DateTime<Utc>,
    /// Scalar readings
    pub readings: Vec<Reading>,
    /// Tables
    pub tables: Vec<Table>,
    /// Source records dropped by the normalizer for a missing required field
    pub skipped_records: usize,
}

impl PollReport {
    /// Total readings plus table rows
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.readings.len() + self.tables.iter().map(Table::len).sum::<usize>()
    }

    /// Flattens the report into individual records
    #[must_use]
    pub fn records(&self) -> Vec<MonitoringRecord> {
        let readings = self.readings.iter().cloned().map(MonitoringRecord::Reading);
        let rows = self.tables.iter().flat_map(|table| {
            table.rows().iter().map(|row| MonitoringRecord::TableRow {
                table_id: table.id().to_string(),
                record_id: row.record_id.clone(),
                values: row.values.clone(),
            })
        });
        readings.chain(rows).collect()
    }

    /// Hands the whole report to `sink`
    pub fn deliver(self, sink: &mut dyn MonitoringSink) -> ReportResult<()> {
        let count = self.record_count();
        for reading in self.readings {
            sink.add_reading(reading)?;
        }
        for table in self.tables {
            sink.add_table(table)?;
        }
        tracing::debug!(run_id = %self.run_id, records = count, "Report delivered");
        Ok(())
    }
}

/// Collects readings and tables for one cycle
#[derive(Debug)]
pub struct Reporter {
    device: String,
    run_id: Uuid,
    started_at: DateTime<Utc>,
    readings: Vec<Reading>,
    reading_ids: HashSet<String>,
    tables: Vec<Table>,
    skipped_records: usize,
}

impl Reporter {
    /// Starts a report for `device`
    #[must_use]
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            readings: Vec::new(),
            reading_ids: HashSet::new(),
            tables: Vec::new(),
            skipped_records: 0,
        }
    }

    /// Cycle id
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Adds a reading; reading ids are unique per cycle
    pub fn add_reading(&mut self, reading: Reading) -> ReportResult<()> {
        if !self.reading_ids.insert(reading.id.clone()) {
            return Err(ReportError::DuplicateId {
                table: "readings".to_string(),
                id: reading.id,
            });
        }
        self.readings.push(reading);
        Ok(())
    }

    /// Adds a table; table ids are unique per cycle
    pub fn add_table(&mut self, table: Table) -> ReportResult<()> {
        if self.tables.iter().any(|t| t.id() == table.id()) {
            return Err(ReportError::DuplicateId {
                table: "tables".to_string(),
                id: table.id().to_string(),
            });
        }
        self.tables.push(table);
        Ok(())
    }

    /// Counts source records the normalizer dropped
    pub fn note_skipped(&mut self, count: usize) {
        if count > 0 {
            tracing::warn!(count, device = %self.device, "Source records skipped");
        }
        self.skipped_records += count;
    }

    /// Closes the cycle
    #[must_use]
    pub fn finish(self) -> PollReport {
        PollReport {
            run_id: self.run_id,
            device: self.device,
            started_at: self.started_at,
            finished_at: Utc::now(),
            readings: self.readings,
            tables: self.tables,
            skipped_records: self.skipped_records,
        }
    }
}
