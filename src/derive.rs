// Columns computed from raw fields before grouping.
use crate::types::{Dataset, Value};
use once_cell::sync::Lazy;
use regex::Regex;

// A dash-like separator followed by a number: `0-150`, `100–200`, `50—80.5`.
static RANGE_UPPER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-–—]\s*(\d+(?:\.\d+)?)").expect("valid range regex"));

/// First `separator`-delimited segment of a description, trimmed like every
/// other group key; empty when absent.
pub fn category_prefix(value: &Value, separator: char) -> String {
    let text = value.as_key();
    text.split(separator).next().unwrap_or_default().trim().to_string()
}

/// Trailing numeric bound of a textual range such as `"100-200km"`.
pub fn range_upper_bound(value: &Value) -> Option<f64> {
    let text = match value {
        Value::Text(s) => s.as_str(),
        _ => return None,
    };
    RANGE_UPPER
        .captures_iter(text)
        .last()
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Adds `target` holding the category prefix of `source`. Rows without a
/// description get an empty category instead of being dropped.
pub fn with_category_prefix(dataset: &Dataset, source: &str, separator: char, target: &str) -> Dataset {
    let values = (0..dataset.len())
        .map(|row| Value::Text(category_prefix(dataset.value(row, source), separator)))
        .collect();
    dataset.with_column(target, values)
}

/// Adds `target` holding the range upper bound of `source`, `Missing` where
/// no bound can be read. Returns the number of rows left without a bound.
pub fn with_range_upper_bound(dataset: &Dataset, source: &str, target: &str) -> (Dataset, usize) {
    let mut failures = 0usize;
    let values = (0..dataset.len())
        .map(|row| match range_upper_bound(dataset.value(row, source)) {
            Some(v) => Value::Number(v),
            None => {
                failures += 1;
                Value::Missing
            }
        })
        .collect();
    (dataset.with_column(target, values), failures)
}
