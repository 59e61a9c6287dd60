use crate::error::IngestError;
use crate::types::{Dataset, Value};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use csv::ReaderBuilder;
use encoding_rs::{GBK, UTF_8};
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Where a dataset came from, for diagnostic display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceFormat {
    Utf8Text,
    GbkText,
    Spreadsheet,
}

impl SourceFormat {
    pub fn label(&self) -> &'static str {
        match self {
            SourceFormat::Utf8Text => "text/utf-8",
            SourceFormat::GbkText => "text/gbk",
            SourceFormat::Spreadsheet => "spreadsheet",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Delimited,
    Spreadsheet,
}

fn file_kind(filename: &str) -> Result<FileKind, IngestError> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "csv" => Ok(FileKind::Delimited),
        "xlsx" | "xlsm" | "xls" => Ok(FileKind::Spreadsheet),
        _ => Err(IngestError::UnsupportedFormat(ext)),
    }
}

/// Resolve raw uploaded bytes into a dataset.
///
/// The filename extension picks the reader; nothing is read for an unknown
/// extension. Delimited text is decoded as UTF-8 (BOM stripped) and then GBK.
/// `sheet` selects a worksheet by name for spreadsheets; `None` takes the
/// first sheet.
pub fn resolve(
    bytes: &[u8],
    filename: &str,
    sheet: Option<&str>,
) -> Result<(Dataset, SourceFormat), IngestError> {
    match file_kind(filename)? {
        FileKind::Delimited => {
            let (text, format) = decode_text(bytes)?;
            let dataset = parse_delimited(&text)?;
            debug!(filename, source = %format, rows = dataset.len(), "decoded delimited input");
            Ok((dataset, format))
        }
        FileKind::Spreadsheet => {
            let dataset = read_spreadsheet(bytes, sheet)?;
            debug!(filename, rows = dataset.len(), "read spreadsheet input");
            Ok((dataset, SourceFormat::Spreadsheet))
        }
    }
}

/// Decode delimited-text bytes, trying UTF-8 before GBK.
pub fn decode_text(bytes: &[u8]) -> Result<(Cow<'_, str>, SourceFormat), IngestError> {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    if let Some(text) = UTF_8.decode_without_bom_handling_and_without_replacement(body) {
        return Ok((text, SourceFormat::Utf8Text));
    }
    debug!("input is not valid UTF-8, retrying as GBK");
    GBK.decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| (text, SourceFormat::GbkText))
        .ok_or(IngestError::EncodingUnresolved)
}

fn parse_delimited(text: &str) -> Result<Dataset, IngestError> {
    let mut rdr = ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers: Vec<String> = rdr
        .headers()
        .map_err(malformed_delimited)?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result.map_err(malformed_delimited)?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        rows.push(
            record
                .iter()
                .map(|f| {
                    if f.trim().is_empty() {
                        Value::Missing
                    } else {
                        Value::text(f)
                    }
                })
                .collect(),
        );
    }
    Ok(Dataset::new(headers, rows))
}

fn malformed_delimited(e: csv::Error) -> IngestError {
    IngestError::MalformedDelimited(e.to_string())
}

fn read_spreadsheet(bytes: &[u8], sheet: Option<&str>) -> Result<Dataset, IngestError> {
    let malformed = |e: calamine::Error| IngestError::MalformedSpreadsheet(e.to_string());
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec())).map_err(malformed)?;

    let sheet_names = workbook.sheet_names();
    let name = match sheet {
        Some(wanted) => sheet_names
            .iter()
            .find(|n| n.as_str() == wanted)
            .cloned()
            .ok_or_else(|| {
                IngestError::MalformedSpreadsheet(format!("sheet not found: {}", wanted))
            })?,
        None => sheet_names.first().cloned().ok_or_else(|| {
            IngestError::MalformedSpreadsheet("workbook contains no sheets".to_string())
        })?,
    };
    let range = workbook.worksheet_range(&name).map_err(malformed)?;

    let mut rows_iter = range.rows();
    let Some(header_row) = rows_iter.next() else {
        return Ok(Dataset::new(Vec::new(), Vec::new()));
    };
    let headers: Vec<String> = header_row
        .iter()
        .enumerate()
        .map(|(i, cell)| match cell_to_value(cell).as_key() {
            h if h.is_empty() => format!("Unnamed: {}", i),
            h => h,
        })
        .collect();

    let rows: Vec<Vec<Value>> = rows_iter
        .map(|row| row.iter().map(cell_to_value).collect::<Vec<_>>())
        .filter(|row| !row.iter().all(Value::is_missing))
        .collect();
    Ok(Dataset::new(headers, rows))
}

fn cell_to_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Missing,
        Data::String(s) if s.trim().is_empty() => Value::Missing,
        Data::String(s) => Value::Text(s.clone()),
        Data::Float(f) => Value::Number(*f),
        Data::Int(i) => Value::Number(*i as f64),
        Data::Bool(b) => Value::Bool(*b),
        Data::Error(_) => Value::Missing,
        Data::DateTime(dt) => Value::Number(dt.as_f64()),
        Data::DateTimeIso(s) => Value::Text(s.clone()),
        Data::DurationIso(s) => Value::Text(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestErrorKind;
    use rust_xlsxwriter::Workbook;

    const CSV: &str = "商品,数量\nA,3\nB,5\n";

    #[test]
    fn bom_is_stripped_and_matches_plain_utf8() {
        let mut with_bom = UTF8_BOM.to_vec();
        with_bom.extend_from_slice(CSV.as_bytes());
        let (a, fa) = resolve(&with_bom, "data.csv", None).unwrap();
        let (b, fb) = resolve(CSV.as_bytes(), "data.csv", None).unwrap();
        assert_eq!(a, b);
        assert_eq!(fa, SourceFormat::Utf8Text);
        assert_eq!(fb, SourceFormat::Utf8Text);
        assert_eq!(a.columns(), &["商品", "数量"]);
    }

    #[test]
    fn gbk_fallback_decodes_chinese_headers() {
        let (encoded, _, _) = GBK.encode(CSV);
        assert!(std::str::from_utf8(&encoded).is_err());
        let (ds, format) = resolve(&encoded, "DATA.CSV", None).unwrap();
        assert_eq!(format, SourceFormat::GbkText);
        assert_eq!(format.label(), "text/gbk");
        assert_eq!(ds.value(1, "商品"), &Value::text("B"));
    }

    #[test]
    fn undecodable_bytes_are_rejected() {
        let err = decode_text(&[0x41, 0xFF, 0xFF, 0x42]).unwrap_err();
        assert_eq!(err.kind(), IngestErrorKind::EncodingUnresolved);
    }

    #[test]
    fn csv_reader_failure_is_not_an_encoding_error() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated record");
        let err = malformed_delimited(csv::Error::from(io));
        assert_eq!(err.kind(), IngestErrorKind::MalformedDelimited);
        assert!(err.to_string().starts_with("delimited text could not be parsed as CSV"));
    }

    #[test]
    fn unknown_extension_is_rejected_before_reading() {
        let err = resolve(b"irrelevant", "report.pdf", None).unwrap_err();
        assert_eq!(err, IngestError::UnsupportedFormat("pdf".to_string()));
        let err = resolve(b"", "no_extension", None).unwrap_err();
        assert_eq!(err.kind(), IngestErrorKind::UnsupportedFormat);
    }

    #[test]
    fn garbage_spreadsheet_is_malformed() {
        let err = resolve(b"not a zip", "book.xlsx", None).unwrap_err();
        assert_eq!(err.kind(), IngestErrorKind::MalformedSpreadsheet);
    }

    #[test]
    fn reads_named_sheet_from_workbook() {
        let mut wb = Workbook::new();
        wb.add_worksheet().set_name("封面").unwrap();
        let ws = wb.add_worksheet();
        ws.set_name("明细费用").unwrap();
        ws.write_string(0, 0, "运费组").unwrap();
        ws.write_string(0, 1, "客户吨位").unwrap();
        ws.write_string(1, 0, "G1").unwrap();
        ws.write_number(1, 1, 4.0).unwrap();
        let bytes = wb.save_to_buffer().unwrap();

        let (ds, format) = resolve(&bytes, "freight.xlsx", Some("明细费用")).unwrap();
        assert_eq!(format, SourceFormat::Spreadsheet);
        assert_eq!(ds.len(), 1);
        assert_eq!(ds.value(0, "客户吨位"), &Value::Number(4.0));

        let err = resolve(&bytes, "freight.xlsx", Some("不存在")).unwrap_err();
        assert_eq!(err.kind(), IngestErrorKind::MalformedSpreadsheet);
    }

    #[test]
    fn blank_cells_become_missing() {
        let (ds, _) = resolve("a,b\n1,\n".as_bytes(), "x.csv", None).unwrap();
        assert!(ds.value(0, "b").is_missing());
    }
}
