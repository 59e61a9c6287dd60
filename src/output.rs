use crate::error::OutputError;
use crate::types::{Cell, Report};
use rust_xlsxwriter::{Format, Workbook};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tabled::{builder::Builder, settings::Style};

/// Serialize the report as a single-sheet workbook in memory.
pub fn xlsx_bytes(report: &Report) -> Result<Vec<u8>, OutputError> {
    let mut workbook = build_workbook(report)?;
    Ok(workbook.save_to_buffer()?)
}

pub fn write_xlsx(path: &Path, report: &Report) -> Result<(), OutputError> {
    let mut workbook = build_workbook(report)?;
    workbook.save(path)?;
    Ok(())
}

fn build_workbook(report: &Report) -> Result<Workbook, OutputError> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(&report.sheet_name)?;

    for (col, name) in report.columns.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, name, &header)?;
    }
    for (r, row) in report.rows.iter().enumerate() {
        let r = r as u32 + 1;
        for (col, cell) in row.iter().enumerate() {
            let col = col as u16;
            match cell {
                Cell::Empty => {}
                Cell::Number(n) => {
                    worksheet.write_number(r, col, *n)?;
                }
                Cell::Text(s) => {
                    worksheet.write_string(r, col, s)?;
                }
            }
        }
    }
    Ok(workbook)
}

pub fn write_csv(path: &Path, report: &Report) -> Result<(), OutputError> {
    let file = std::fs::File::create(path)?;
    write_csv_to(file, report)
}

/// CSV with a UTF-8 BOM so spreadsheet applications pick the right encoding.
pub fn write_csv_to<W: Write>(mut writer: W, report: &Report) -> Result<(), OutputError> {
    writer.write_all(b"\xEF\xBB\xBF")?;
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(&report.columns)?;
    for row in &report.rows {
        wtr.write_record(row.iter().map(|c| c.to_string()))?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), OutputError> {
    let s = serde_json::to_string_pretty(value)?;
    std::fs::write(path, s)?;
    Ok(())
}

/// Markdown table of the first `max_rows` rows, restricted to `columns` when
/// given. Unknown column names are skipped.
pub fn preview_table(report: &Report, max_rows: usize, columns: Option<&[&str]>) -> String {
    let picked: Vec<usize> = match columns {
        Some(names) => names.iter().filter_map(|n| report.column_index(n)).collect(),
        None => (0..report.columns.len()).collect(),
    };
    if report.rows.is_empty() || picked.is_empty() {
        return "(no rows)".to_string();
    }
    let mut builder = Builder::default();
    builder.push_record(picked.iter().map(|&i| report.columns[i].clone()));
    for row in report.rows.iter().take(max_rows) {
        builder.push_record(
            picked
                .iter()
                .map(|&i| row.get(i).map(Cell::to_string).unwrap_or_default()),
        );
    }
    builder.build().with(Style::markdown()).to_string()
}
