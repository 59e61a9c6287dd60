// Final presentation step: aggregated and allocated results become a plain
// `Report` of named columns and cells, with ratios rendered as percentages.
use crate::allocation::{AllocationReport, FreightSpec};
use crate::reports::AggregatedReport;
use crate::types::{Cell, Report};
use crate::util::format_percent;
use chrono::{Datelike, NaiveDate};

/// Cell text for a value that cannot be computed (division by zero).
pub const UNDEFINED_MARKER: &str = "#DIV/0!";

const PERCENT_DECIMALS: usize = 2;

pub fn format_ratio(ratio: Option<f64>) -> Cell {
    match ratio {
        Some(r) if r.is_finite() => Cell::Text(format_percent(r, PERCENT_DECIMALS)),
        _ => Cell::text(UNDEFINED_MARKER),
    }
}

pub fn format_aggregated(report: &AggregatedReport, name: &str, sheet_name: &str) -> Report {
    let columns: Vec<String> = report
        .key_labels
        .iter()
        .chain(&report.value_columns)
        .chain(&report.ratio_columns)
        .cloned()
        .collect();
    let rows: Vec<Vec<Cell>> = report
        .rows_with_total()
        .map(|row| {
            row.key
                .iter()
                .map(|k| if k.is_empty() { Cell::Empty } else { Cell::text(k.as_str()) })
                .chain(row.values.iter().map(|v| Cell::Number(*v)))
                .chain(row.ratios.iter().map(|r| format_ratio(*r)))
                .collect()
        })
        .collect();
    Report {
        name: name.to_string(),
        sheet_name: sheet_name.to_string(),
        columns,
        rows,
    }
}

/// Qualifying source rows followed by the ton-distance, group totals and the
/// allocated share.
pub fn format_allocation(report: &AllocationReport, spec: &FreightSpec, name: &str, sheet_name: &str) -> Report {
    let mut columns: Vec<String> = report.source.columns().to_vec();
    columns.extend(
        [spec.ton_distance, spec.group_ton_distance, spec.group_cost, spec.allocated]
            .iter()
            .map(|c| c.to_string()),
    );
    let rows: Vec<Vec<Cell>> = report
        .rows
        .iter()
        .map(|row| {
            let mut cells: Vec<Cell> = report.source.records()[row.source_row]
                .values()
                .iter()
                .map(Cell::from)
                .collect();
            cells.push(Cell::Number(row.ton_distance));
            cells.push(Cell::Number(row.group_ton_distance));
            cells.push(row.group_cost.map(Cell::Number).unwrap_or(Cell::Empty));
            cells.push(match row.allocated.amount() {
                Some(v) => Cell::Number(v),
                None => Cell::text(UNDEFINED_MARKER),
            });
            cells
        })
        .collect();
    Report {
        name: name.to_string(),
        sheet_name: sheet_name.to_string(),
        columns,
        rows,
    }
}

/// Replace characters that are not allowed in file names.
pub fn sanitize_file_stem(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() {
        "report".to_string()
    } else {
        cleaned
    }
}

/// `MMDD_<name>.<extension>` for the given date.
pub fn suggested_filename(name: &str, date: NaiveDate, extension: &str) -> String {
    format!(
        "{:02}{:02}_{}.{}",
        date.month(),
        date.day(),
        sanitize_file_stem(name),
        extension
    )
}
