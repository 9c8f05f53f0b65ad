//! Declarative collection plan
//!
//! A profile discovers records with one operation, optionally enriches each
//! record with a detail operation (fanned out, `${field}` references filled
//! from the record), and turns the result into a table and readings.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::classify::ClassifiedError;
use crate::executor::Executor;
use crate::normalize::{FieldValue, Normalized, NormalizedRecord, Normalizer};
use crate::operation::Operation;
use crate::poller::DeviceProfile;
use crate::report::{CollisionPolicy, Reading, ReadingKind, Reporter, Table, UNNAMED_ID};
use crate::session::AuthStrategy;
use crate::variables::Variables;

/// An operation and the parser for its output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// What to run
    pub operation: Operation,
    /// How to read the answer
    pub normalize: Normalizer,
}

impl Stage {
    async fn run(
        &self,
        executor: &Executor,
        vars: &Variables,
    ) -> Result<Normalized, ClassifiedError> {
        let operation = self.operation.render(vars);
        let raw = executor.run_one(&operation).await?;
        self.normalize
            .normalize_counted(&raw)
            .map_err(|e| e.classified(&operation.name))
    }
}

/// `[table]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Table id
    pub id: String,
    /// Record field whose value becomes the row id
    pub key: String,
    /// Columns, in order
    pub columns: Vec<String>,
    /// Handling of duplicate row ids
    #[serde(default)]
    pub collision: CollisionPolicy,
}

/// How a reading is computed from records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum ReadingSource {
    /// Number of records
    Count,
    /// Sum of a numeric field
    Sum {
        /// Field name
        field: String,
    },
    /// Largest value of a numeric field
    Max {
        /// Field name
        field: String,
    },
    /// Smallest value of a numeric field
    Min {
        /// Field name
        field: String,
    },
    /// A field of the first record
    First {
        /// Field name
        field: String,
    },
}

impl ReadingSource {
    /// Computes the value over `records`
    #[must_use]
    pub fn compute(&self, records: &[NormalizedRecord]) -> FieldValue {
        let numbers = |field: &str| {
            records
                .iter()
                .filter_map(|r| r.get(field).and_then(FieldValue::as_number))
                .collect::<Vec<_>>()
        };
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Count => FieldValue::Number(records.len() as f64),
            Self::Sum { field } => FieldValue::Number(numbers(field).iter().sum()),
            Self::Max { field } => numbers(field)
                .into_iter()
                .reduce(f64::max)
                .map_or(FieldValue::Absent, FieldValue::Number),
            Self::Min { field } => numbers(field)
                .into_iter()
                .reduce(f64::min)
                .map_or(FieldValue::Absent, FieldValue::Number),
            Self::First { field } => records
                .first()
                .and_then(|r| r.get(field))
                .cloned()
                .unwrap_or(FieldValue::Absent),
        }
    }
}

/// `[[readings]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingConfig {
    /// Display label; the id is derived from it
    pub label: String,
    /// Unit
    #[serde(default)]
    pub unit: Option<String>,
    /// Interpretation
    #[serde(default)]
    pub kind: ReadingKind,
    /// Computation
    pub source: ReadingSource,
    /// Own operation; discovered records are used when absent
    #[serde(default)]
    pub query: Option<Stage>,
}

impl ReadingConfig {
    fn reading(&self, records: &[NormalizedRecord]) -> Reading {
        let mut reading =
            Reading::new(self.label.clone(), self.source.compute(records)).with_kind(self.kind);
        if let Some(unit) = &self.unit {
            reading = reading.with_unit(unit.clone());
        }
        reading
    }
}

/// Collection plan built from a device profile
#[derive(Debug, Clone)]
pub struct ProfileConfig {
    /// Login strategy
    pub auth: AuthStrategy,
    /// Validation probe
    pub probe: Operation,
    /// Record discovery
    pub discover: Option<Stage>,
    /// Per-record enrichment
    pub detail: Option<Stage>,
    /// Scalar readings
    pub readings: Vec<ReadingConfig>,
    /// Table output
    pub table: Option<TableConfig>,
    /// Device variables (`${address}` and options)
    pub variables: Variables,
}

impl ProfileConfig {
    /// Overrides the timeout of every collection operation
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let apply = |op: &mut Operation| op.timeout_ms = timeout_ms(timeout);
        apply(&mut self.probe);
        for stage in [&mut self.discover, &mut self.detail].into_iter().flatten() {
            apply(&mut stage.operation);
        }
        for query in self.readings.iter_mut().filter_map(|r| r.query.as_mut()) {
            apply(&mut query.operation);
        }
        self
    }

    async fn enrich(
        &self,
        detail: &Stage,
        executor: &Executor,
        records: &mut [NormalizedRecord],
        reporter: &mut Reporter,
    ) -> Result<(), ClassifiedError> {
        let operations = records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let mut op = detail
                    .operation
                    .render(&self.variables.merged(&record_variables(record)));
                op.name = format!("{}#{index}", detail.operation.name);
                op
            })
            .collect();

        // Every sibling has resolved; the first failure in record order decides the cycle
        let outcomes = executor.run_batch(operations).await;
        for (record, outcome) in records.iter_mut().zip(outcomes) {
            let raw = outcome?;
            let details = detail
                .normalize
                .normalize_counted(&raw)
                .map_err(|e| e.classified(&detail.operation.name))?;
            reporter.note_skipped(details.skipped);
            match details.records.into_iter().next() {
                Some(first) => merge(record, first),
                None => fill_defaults(record, &detail.normalize),
            }
        }
        Ok(())
    }

    async fn add_readings(
        &self,
        executor: &Executor,
        reporter: &mut Reporter,
        discovered: &[NormalizedRecord],
    ) -> Result<(), ClassifiedError> {
        let operations = self
            .readings
            .iter()
            .filter_map(|r| r.query.as_ref())
            .map(|q| q.operation.render(&self.variables))
            .collect();
        let mut outcomes = executor.run_batch(operations).await.into_iter();

        for config in &self.readings {
            let reading = match &config.query {
                None => config.reading(discovered),
                Some(query) => {
                    let raw = outcomes.next().ok_or_else(|| {
                        ClassifiedError::generic(format!("{}: no outcome", config.label))
                    })??;
                    let parsed = query
                        .normalize
                        .normalize_counted(&raw)
                        .map_err(|e| e.classified(&query.operation.name))?;
                    reporter.note_skipped(parsed.skipped);
                    config.reading(&parsed.records)
                }
            };
            reporter.add_reading(reading).map_err(|e| e.classified())?;
        }
        Ok(())
    }

    fn build_table(
        config: &TableConfig,
        records: &[NormalizedRecord],
    ) -> Result<Table, ClassifiedError> {
        let mut table =
            Table::new(&config.id, config.columns.clone()).with_policy(config.collision);
        for record in records {
            let id = record
                .get(&config.key)
                .map(ToString::to_string)
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| UNNAMED_ID.to_string());
            let values = config
                .columns
                .iter()
                .map(|column| record.get(column).cloned().unwrap_or(FieldValue::Absent))
                .collect();
            table
                .insert_record(&id, values)
                .map_err(|e| e.classified())?;
        }
        Ok(table)
    }
}

#[async_trait]
impl DeviceProfile for ProfileConfig {
    fn auth(&self) -> AuthStrategy {
        self.auth.clone()
    }

    fn probe(&self) -> Operation {
        self.probe.render(&self.variables)
    }

    async fn collect(
        &self,
        executor: &Executor,
        reporter: &mut Reporter,
    ) -> Result<(), ClassifiedError> {
        let discovered = match &self.discover {
            Some(stage) => stage.run(executor, &self.variables).await?,
            None => Normalized::default(),
        };
        reporter.note_skipped(discovered.skipped);
        let mut records = discovered.records;
        tracing::debug!(record_count = records.len(), "Records discovered");

        if let Some(detail) = &self.detail {
            self.enrich(detail, executor, &mut records, reporter).await?;
        }

        self.add_readings(executor, reporter, &records).await?;

        if let Some(config) = &self.table {
            let table = Self::build_table(config, &records)?;
            reporter.add_table(table).map_err(|e| e.classified())?;
        }
        Ok(())
    }
}

fn timeout_ms(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

fn record_variables(record: &NormalizedRecord) -> Variables {
    let mut vars = Variables::new();
    for (name, value) in record.iter() {
        vars.set(name, value.to_string());
    }
    vars
}

fn merge(record: &mut NormalizedRecord, detail: NormalizedRecord) {
    for (name, value) in detail.iter() {
        record.insert(name, value.clone());
    }
}

fn fill_defaults(record: &mut NormalizedRecord, normalizer: &Normalizer) {
    for spec in &normalizer.fields {
        if record.get(&spec.name).is_none() {
            let value = spec
                .resolve(None)
                .unwrap_or_else(|| FieldValue::sentinel(spec.kind));
            record.insert(spec.name.clone(), value);
        }
    }
}
