use crate::error::IngestError;
use crate::types::Dataset;
use std::collections::BTreeSet;

/// Exactly the required columns the dataset lacks.
pub fn missing_columns(dataset: &Dataset, required: &[&str]) -> BTreeSet<String> {
    let present = dataset.column_set();
    required
        .iter()
        .filter(|c| !present.contains(*c))
        .map(|c| c.to_string())
        .collect()
}

pub fn validate(dataset: &Dataset, required: &[&str]) -> Result<(), IngestError> {
    let missing = missing_columns(dataset, required);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(IngestError::MissingColumns(missing))
    }
}
