use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::util::{format_plain, parse_f64_safe};

/// A single cell value as it came out of ingestion.
///
/// Delimited text is kept as `Text`; only the spreadsheet reader produces
/// typed `Number`/`Bool` cells. Numeric interpretation happens on demand via
/// [`Value::as_f64`] so that codes like `"007"` survive as group keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    Missing,
    Text(String),
    Number(f64),
    Bool(bool),
}

static MISSING: Value = Value::Missing;

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn is_missing(&self) -> bool {
        match self {
            Value::Missing => true,
            Value::Text(s) => s.trim().is_empty(),
            Value::Number(n) => n.is_nan(),
            Value::Bool(_) => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) if n.is_finite() => Some(*n),
            Value::Text(s) => parse_f64_safe(Some(s.as_str())),
            _ => None,
        }
    }

    /// Text used when the value acts as a group key or pivot header.
    /// Missing values collapse to the empty string and still form a bucket.
    pub fn as_key(&self) -> String {
        match self {
            Value::Missing => String::new(),
            Value::Text(s) => s.trim().to_string(),
            Value::Number(n) if n.is_nan() => String::new(),
            Value::Number(n) => format_plain(*n),
            Value::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        }
    }

    /// Spreadsheet-style truthiness used for qualifying flags: missing, blank,
    /// zero and `false` are all falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Missing => false,
            Value::Bool(b) => *b,
            Value::Number(n) => !n.is_nan() && *n != 0.0,
            Value::Text(s) => {
                let s = s.trim();
                if s.is_empty() || s.eq_ignore_ascii_case("false") {
                    return false;
                }
                !matches!(parse_f64_safe(Some(s)), Some(n) if n == 0.0)
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_key())
    }
}

/// One input row, positionally aligned with its dataset's columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    values: Vec<Value>,
}

impl Record {
    pub fn get(&self, idx: usize) -> &Value {
        self.values.get(idx).unwrap_or(&MISSING)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// Ordered records plus the column names actually present.
///
/// Every record carries exactly one value per column; short rows are padded
/// with `Missing` and long rows truncated when the dataset is built. Derivations
/// never mutate a dataset in place, see [`Dataset::with_column`].
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    records: Vec<Record>,
}

impl Dataset {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let columns = dedupe_columns(columns);
        let width = columns.len();
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect();
        let records = rows
            .into_iter()
            .map(|mut values| {
                values.resize(width, Value::Missing);
                Record { values }
            })
            .collect();
        Dataset { columns, index, records }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_set(&self) -> BTreeSet<&str> {
        self.columns.iter().map(String::as_str).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Value of `column` in row `row`; `Missing` when either is out of range.
    pub fn value(&self, row: usize, column: &str) -> &Value {
        match (self.records.get(row), self.column_index(column)) {
            (Some(r), Some(c)) => r.get(c),
            _ => &MISSING,
        }
    }

    /// Returns a new dataset with `name` set to `values`, replacing an existing
    /// column of the same name or appending a new one.
    pub fn with_column(&self, name: &str, values: Vec<Value>) -> Dataset {
        let mut columns = self.columns.clone();
        let slot = match self.column_index(name) {
            Some(i) => i,
            None => {
                columns.push(name.to_string());
                columns.len() - 1
            }
        };
        let mut values = values.into_iter();
        let rows = self
            .records
            .iter()
            .map(|r| {
                let mut row = r.values.clone();
                row.resize(columns.len(), Value::Missing);
                row[slot] = values.next().unwrap_or(Value::Missing);
                row
            })
            .collect();
        Dataset::new(columns, rows)
    }
}

// Repeated header names get a `.N` suffix so every column stays addressable.
fn dedupe_columns(columns: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    columns
        .into_iter()
        .map(|c| {
            let n = seen.entry(c.clone()).or_insert(0);
            let name = if *n == 0 { c } else { format!("{}.{}", c, n) };
            *n += 1;
            name
        })
        .collect()
}

/// A presentation cell in a finished report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    pub fn text(s: impl Into<String>) -> Self {
        Cell::Text(s.into())
    }
}

impl From<&Value> for Cell {
    fn from(v: &Value) -> Self {
        match v {
            Value::Missing => Cell::Empty,
            Value::Text(s) if s.is_empty() => Cell::Empty,
            Value::Text(s) => Cell::Text(s.clone()),
            Value::Number(n) if n.is_nan() => Cell::Empty,
            Value::Number(n) => Cell::Number(*n),
            Value::Bool(_) => Cell::Text(v.as_key()),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Empty => Ok(()),
            Cell::Text(s) => f.write_str(s),
            Cell::Number(n) => f.write_str(&format_plain(*n)),
        }
    }
}

/// The finished tabular report handed to the rendering collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub name: String,
    pub sheet_name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Report {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&Cell> {
        let c = self.column_index(column)?;
        self.rows.get(row)?.get(c)
    }
}
