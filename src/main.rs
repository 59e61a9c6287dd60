// Entry point and high-level CLI flow.
//
// Reads one input file, builds the requested report, writes it next to the
// other outputs as `MMDD_<name>.xlsx` (or `.csv`) and prints a short preview.
// Whether a failed invocation ends the process is decided here, not in the
// library.
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use shipment_report::loader::SourceFormat;
use shipment_report::pipeline::Diagnostics;
use shipment_report::util::{format_int, format_number};
use shipment_report::{generate, output, ReportKind, ReportOptions};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Xlsx,
    Csv,
}

impl OutputFormat {
    fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Xlsx => "xlsx",
            OutputFormat::Csv => "csv",
        }
    }
}

#[derive(Parser)]
#[command(name = "shipment_report")]
#[command(about = "Build sales, gross-profit, machine-loss and freight reports from shipment exports", long_about = None)]
struct Cli {
    /// Report to build: sales, gross-profit, machine-loss or freight
    kind: ReportKind,

    /// Input file (.csv, .xlsx, .xlsm or .xls)
    input: PathBuf,

    /// Worksheet to read from spreadsheet input
    #[arg(long)]
    sheet: Option<String>,

    /// Directory the report is written to
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Output file format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Xlsx)]
    format: OutputFormat,

    /// Number of rows shown in the console preview
    #[arg(short, long, default_value_t = 10)]
    preview: usize,

    /// Minimum total daily processing volume (tonnes) for machine-loss reports
    #[arg(long, default_value_t = shipment_report::pipeline::DAILY_PRODUCTION_MIN)]
    min_production: f64,

    /// Optional path for a JSON run summary
    #[arg(long)]
    summary: Option<PathBuf>,
}

#[derive(Serialize)]
struct RunSummary<'a> {
    kind: ReportKind,
    source_format: SourceFormat,
    input_rows: usize,
    output_rows: usize,
    output_file: String,
    generated_at: DateTime<Local>,
    diagnostics: &'a Diagnostics,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let filename = cli
        .input
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let bytes = std::fs::read(&cli.input)
        .with_context(|| format!("failed to read {}", cli.input.display()))?;

    let options = ReportOptions {
        sheet: cli.sheet.clone(),
        min_daily_production: cli.min_production,
    };
    let generated = match generate(cli.kind, &bytes, &filename, &options) {
        Ok(g) => g,
        Err(e) => {
            error!(kind = ?e.kind(), "{}", e);
            return Err(e).with_context(|| format!("could not build {} report", cli.kind));
        }
    };

    println!(
        "Processing dataset... ({} rows loaded, source: {})",
        format_int(generated.input_rows as u64),
        generated.source_format
    );
    let diag = &generated.diagnostics;
    if diag.skipped_values > 0 {
        println!(
            "Note: {} non-numeric values ignored in summed columns.",
            format_int(diag.skipped_values as u64)
        );
    }
    if diag.excluded_rows > 0 {
        println!(
            "Note: {} rows excluded from freight allocation.",
            format_int(diag.excluded_rows as u64)
        );
    }
    if diag.unbounded_distance_rows > 0 {
        println!(
            "Note: {} rows have no readable distance range.",
            format_int(diag.unbounded_distance_rows as u64)
        );
    }
    if let Some(check) = &diag.production {
        if check.met {
            println!(
                "Total processing volume {} t meets the daily minimum ({} t).",
                format_number(check.total_volume, 2),
                format_number(check.minimum, 0)
            );
        } else {
            warn!(
                "Total processing volume {} t is below the daily minimum ({} t)",
                format_number(check.total_volume, 2),
                format_number(check.minimum, 0)
            );
        }
    }
    println!();
    println!(
        "{}",
        output::preview_table(&generated.report, cli.preview, generated.kind.preview_columns())
    );

    std::fs::create_dir_all(&cli.out_dir)
        .with_context(|| format!("failed to create {}", cli.out_dir.display()))?;
    let today = Local::now().date_naive();
    let out_path = cli
        .out_dir
        .join(generated.suggested_filename(today, cli.format.extension()));
    match cli.format {
        OutputFormat::Xlsx => output::write_xlsx(&out_path, &generated.report)?,
        OutputFormat::Csv => output::write_csv(&out_path, &generated.report)?,
    }
    info!(path = %out_path.display(), rows = generated.report.rows.len(), "report written");
    println!("(Full table exported to {})", out_path.display());

    if let Some(path) = &cli.summary {
        let summary = RunSummary {
            kind: generated.kind,
            source_format: generated.source_format,
            input_rows: generated.input_rows,
            output_rows: generated.report.rows.len(),
            output_file: out_path.display().to_string(),
            generated_at: Local::now(),
            diagnostics: &generated.diagnostics,
        };
        output::write_json(path, &summary)?;
        info!(path = %path.display(), "summary written");
    }
    Ok(())
}
