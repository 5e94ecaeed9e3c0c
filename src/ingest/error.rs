//! Ingestion error types.

use std::convert::Infallible;

use thiserror::Error;

use crate::index::IndexError;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Batches before `batch` are committed; nothing after it was attempted.
    #[error("Batch {batch} rejected after {committed} committed batches: {source}")]
    BatchRejected {
        batch: usize,
        committed: usize,
        source: IndexError,
    },

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<Infallible> for IngestError {
    fn from(e: Infallible) -> Self {
        match e {}
    }
}
