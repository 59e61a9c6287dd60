use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;

/// Terminal failures of ingestion and validation. Any of these aborts the
/// invocation; no partial report is produced.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestError {
    #[error("input could not be decoded as UTF-8 or GBK text")]
    EncodingUnresolved,

    #[error("delimited text could not be parsed as CSV: {0}")]
    MalformedDelimited(String),

    #[error("spreadsheet could not be read: {0}")]
    MalformedSpreadsheet(String),

    #[error("unsupported file format {0:?}, expected .csv, .xlsx, .xlsm or .xls")]
    UnsupportedFormat(String),

    #[error("missing required columns: {}", join_columns(.0))]
    MissingColumns(BTreeSet<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IngestErrorKind {
    EncodingUnresolved,
    MalformedDelimited,
    MalformedSpreadsheet,
    UnsupportedFormat,
    MissingColumns,
}

impl IngestError {
    pub fn kind(&self) -> IngestErrorKind {
        match self {
            IngestError::EncodingUnresolved => IngestErrorKind::EncodingUnresolved,
            IngestError::MalformedDelimited(_) => IngestErrorKind::MalformedDelimited,
            IngestError::MalformedSpreadsheet(_) => IngestErrorKind::MalformedSpreadsheet,
            IngestError::UnsupportedFormat(_) => IngestErrorKind::UnsupportedFormat,
            IngestError::MissingColumns(_) => IngestErrorKind::MissingColumns,
        }
    }
}

fn join_columns(cols: &BTreeSet<String>) -> String {
    cols.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

/// Failures of the rendering collaborator.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XLSX write error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON write error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_columns_message_enumerates_the_set() {
        let err = IngestError::MissingColumns(["数量".to_string(), "品牌".to_string()].into());
        assert_eq!(err.kind(), IngestErrorKind::MissingColumns);
        assert_eq!(err.to_string(), "missing required columns: 品牌, 数量");
    }
}
