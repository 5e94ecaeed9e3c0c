//! Bulk ingestion: CSV rows → normalized entries → committed batches.

pub mod error;
pub mod loader;
pub mod source;

pub use error::IngestError;
pub use loader::{BatchLoader, IngestReport, IngestRun};
pub use source::{csv_rows, csv_rows_from_path};
