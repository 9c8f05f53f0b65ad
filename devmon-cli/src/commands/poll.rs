//! Run one polling cycle and print the report.

use std::fmt::Write as _;
use std::path::Path;

use devmon_core::{PollReport, Table};

use crate::cli::OutputFormat;
use crate::error::CliError;
use crate::util::{build_poller, runtime};

/// Poll command handler
pub fn cmd_poll(
    config_path: Option<&Path>,
    profile: &str,
    format: OutputFormat,
    timeout: Option<u64>,
) -> Result<(), CliError> {
    let poller = build_poller(config_path, profile, timeout)?;
    let report = runtime()?.block_on(poller.poll())?;

    match format {
        OutputFormat::Table => println!("{}", format_report(&report)),
        OutputFormat::Json => println!("{}", format_json(&report)?),
    }
    Ok(())
}

/// Format a report as JSON
pub fn format_json(report: &PollReport) -> Result<String, CliError> {
    serde_json::to_string_pretty(report)
        .map_err(|e| CliError::Output(format!("Failed to serialize to JSON: {e}")))
}

/// Format a report as aligned text: readings first, then each table
#[must_use]
pub fn format_report(report: &PollReport) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "{} ({} records, run {})",
        report.device,
        report.record_count(),
        report.run_id
    );
    if report.skipped_records > 0 {
        let _ = writeln!(
            output,
            "warning: {} source records skipped (required field missing)",
            report.skipped_records
        );
    }

    if !report.readings.is_empty() {
        let id_width = report
            .readings
            .iter()
            .map(|r| r.id.len())
            .max()
            .unwrap_or(2)
            .max(2);
        let _ = writeln!(output);
        let _ = writeln!(output, "{:<id_width$}  VALUE", "ID");
        let _ = writeln!(output, "{:-<id_width$}  -----", "");
        for reading in &report.readings {
            let unit = reading.unit.as_deref().unwrap_or("");
            let _ = writeln!(
                output,
                "{:<id_width$}  {}{unit}",
                reading.id, reading.value
            );
        }
    }

    for table in &report.tables {
        let _ = writeln!(output);
        format_table(&mut output, table);
    }

    output.trim_end().to_string()
}

fn format_table(output: &mut String, table: &Table) {
    let _ = writeln!(output, "[{}]", table.id());

    let mut headers = vec!["ID".to_string()];
    headers.extend(table.columns().iter().map(|c| c.to_uppercase()));
    let rows: Vec<Vec<String>> = table
        .rows()
        .iter()
        .map(|row| {
            std::iter::once(row.record_id.clone())
                .chain(row.values.iter().map(ToString::to_string))
                .collect()
        })
        .collect();

    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, header)| {
            rows.iter()
                .filter_map(|row| row.get(i))
                .map(String::len)
                .chain(std::iter::once(header.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    write_row(output, &headers, &widths);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    write_row(output, &rule, &widths);
    for row in &rows {
        write_row(output, row, &widths);
    }
}

fn write_row(output: &mut String, cells: &[String], widths: &[usize]) {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join("  ");
    let _ = writeln!(output, "{}", line.trim_end());
}
