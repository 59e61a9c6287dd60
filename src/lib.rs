//! Batch reports over shipment and sales exports.
//!
//! Raw CSV or spreadsheet bytes are resolved into a [`types::Dataset`],
//! validated against the report kind's required columns, then either pivoted
//! and summed ([`reports`]) or used to split freight costs ([`allocation`]),
//! and finally shaped into a [`types::Report`] for writing.
pub mod allocation;
pub mod derive;
pub mod error;
pub mod format;
pub mod loader;
pub mod output;
pub mod pipeline;
pub mod reports;
pub mod schema;
pub mod types;
pub mod util;

pub use error::{IngestError, IngestErrorKind, OutputError};
pub use pipeline::{generate, GeneratedReport, ReportOptions};
pub use reports::ReportKind;
