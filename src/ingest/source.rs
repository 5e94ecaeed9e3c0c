//! CSV row source for bulk ingestion.
//!
//! Header-driven: columns are matched by name, unknown columns are ignored
//! and missing ones read as empty text.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{DeserializeRecordsIntoIter, ReaderBuilder, Trim};

use super::error::IngestError;
use crate::models::RawDrugRow;

/// Lazily deserialize drug rows from any reader.
pub fn csv_rows<R: Read>(reader: R) -> DeserializeRecordsIntoIter<R, RawDrugRow> {
    ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::Headers)
        .from_reader(reader)
        .into_deserialize()
}

/// Open a CSV file of drug rows.
pub fn csv_rows_from_path(path: &Path) -> Result<DeserializeRecordsIntoIter<File, RawDrugRow>, IngestError> {
    let file = File::open(path)?;
    Ok(csv_rows(file))
}
