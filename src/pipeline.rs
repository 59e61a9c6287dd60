//! One invocation: bytes in, formatted report out.
//!
//! resolve → validate → derive → aggregate | allocate → format. Ingestion and
//! validation failures abort with an [`IngestError`]; per-row problems are
//! collected in [`Diagnostics`] and never abort.
use crate::allocation::{allocate, FreightSpec};
use crate::derive::with_category_prefix;
use crate::error::IngestError;
use crate::format::{format_aggregated, format_allocation, suggested_filename};
use crate::loader::{resolve, SourceFormat};
use crate::reports::{aggregate, ReportKind};
use crate::schema::validate;
use crate::types::{Dataset, Report};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

/// Default minimum daily processing volume, in tonnes.
pub const DAILY_PRODUCTION_MIN: f64 = 50.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ReportOptions {
    /// Worksheet to read from spreadsheet input; falls back to the report
    /// kind's default sheet, then to the first sheet.
    pub sheet: Option<String>,
    pub min_daily_production: f64,
}

impl Default for ReportOptions {
    fn default() -> Self {
        ReportOptions {
            sheet: None,
            min_daily_production: DAILY_PRODUCTION_MIN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductionCheck {
    pub total_volume: f64,
    pub minimum: f64,
    pub met: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    pub skipped_values: usize,
    pub excluded_rows: usize,
    pub unbounded_distance_rows: usize,
    pub degenerate_groups: Vec<String>,
    pub uncosted_groups: Vec<String>,
    pub inconsistent_cost_groups: Vec<String>,
    pub production: Option<ProductionCheck>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedReport {
    pub kind: ReportKind,
    pub source_format: SourceFormat,
    pub input_rows: usize,
    pub report: Report,
    pub diagnostics: Diagnostics,
}

impl GeneratedReport {
    pub fn suggested_filename(&self, date: NaiveDate, extension: &str) -> String {
        suggested_filename(&self.report.name, date, extension)
    }
}

pub fn generate(
    kind: ReportKind,
    bytes: &[u8],
    filename: &str,
    options: &ReportOptions,
) -> Result<GeneratedReport, IngestError> {
    let sheet = options.sheet.as_deref().or(kind.default_input_sheet());
    let (dataset, source_format) = resolve(bytes, filename, sheet)?;
    info!(kind = %kind, source = %source_format, rows = dataset.len(), "input loaded");

    validate(&dataset, kind.required_columns())?;
    let (report, diagnostics) = build(kind, &dataset, options);

    info!(kind = %kind, rows = report.rows.len(), "report generated");
    Ok(GeneratedReport {
        kind,
        source_format,
        input_rows: dataset.len(),
        report,
        diagnostics,
    })
}

/// Build the report for an already validated dataset.
pub fn build(kind: ReportKind, dataset: &Dataset, options: &ReportOptions) -> (Report, Diagnostics) {
    let mut diagnostics = Diagnostics::default();
    let report = match kind.aggregation() {
        None => {
            let spec = FreightSpec::default();
            let allocation = allocate(dataset, &spec);
            diagnostics.excluded_rows = allocation.excluded.len();
            diagnostics.unbounded_distance_rows = allocation.unbounded_distance_rows;
            diagnostics.degenerate_groups = allocation.degenerate_groups.clone();
            diagnostics.uncosted_groups = allocation.uncosted_groups.clone();
            diagnostics.inconsistent_cost_groups = allocation.inconsistent_cost_groups.clone();
            format_allocation(&allocation, &spec, kind.report_name(), kind.sheet_name())
        }
        Some(spec) => {
            let derived;
            let dataset = if kind == ReportKind::GrossProfit {
                derived = with_category_prefix(dataset, "商品描述", '-', "末级分类");
                &derived
            } else {
                dataset
            };
            let aggregated = aggregate(dataset, &spec);
            diagnostics.skipped_values = aggregated.skipped_values;
            if kind == ReportKind::MachineLoss {
                let total_volume = aggregated
                    .value_index("加工量")
                    .map(|i| aggregated.total.values[i])
                    .unwrap_or(0.0);
                let check = ProductionCheck {
                    total_volume,
                    minimum: options.min_daily_production,
                    met: total_volume >= options.min_daily_production,
                };
                if !check.met {
                    warn!(
                        total_volume,
                        minimum = options.min_daily_production,
                        "total processing volume below daily minimum"
                    );
                }
                diagnostics.production = Some(check);
            }
            format_aggregated(&aggregated, kind.report_name(), kind.sheet_name())
        }
    };
    (report, diagnostics)
}
