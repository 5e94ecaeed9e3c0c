//! BatchLoader: read → normalize/expand → flush.
//!
//! Rows are buffered into windows of `batch_size`. Each window is expanded
//! on a bounded worker pool with an order-preserving collect, then committed
//! by the calling thread as one `put_columns` call. The store never sees
//! concurrent writes from a loader.

use std::path::Path;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use uuid::Uuid;

use super::error::IngestError;
use super::source::{csv_rows, csv_rows_from_path};
use crate::config::IndexConfig;
use crate::index::{ColumnBatch, CrossProductExpander, FormulationStore, MalformedRowWarning};
use crate::models::{IndexEntry, RawDrugRow};
use crate::normalize::{clean_text, TermNormalizer};

/// State of one ingestion run, owned by the caller.
#[derive(Debug, Clone)]
pub struct IngestRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub rows_read: usize,
    pub rows_skipped: usize,
    pub entries_written: usize,
    pub batches_committed: usize,
    pub skipped: Vec<MalformedRowWarning>,
}

impl IngestRun {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            rows_read: 0,
            rows_skipped: 0,
            entries_written: 0,
            batches_committed: 0,
            skipped: Vec::new(),
        }
    }

    pub fn finish(self) -> IngestReport {
        IngestReport {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            rows_read: self.rows_read,
            rows_skipped: self.rows_skipped,
            entries_written: self.entries_written,
            batches_committed: self.batches_committed,
            skipped: self.skipped,
        }
    }
}

impl Default for IngestRun {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub rows_read: usize,
    pub rows_skipped: usize,
    /// Entries handed to the store after in-batch dedup. Re-ingesting the
    /// same rows writes the same entries again without growing the index.
    pub entries_written: usize,
    pub batches_committed: usize,
    pub skipped: Vec<MalformedRowWarning>,
}

/// Streams raw rows into a [`FormulationStore`].
pub struct BatchLoader<'a, S: FormulationStore> {
    store: &'a S,
    normalizer: TermNormalizer,
    batch_size: usize,
    delimiter: char,
    pool: ThreadPool,
}

impl<'a, S: FormulationStore> BatchLoader<'a, S> {
    pub fn new(
        store: &'a S,
        normalizer: TermNormalizer,
        config: &IndexConfig,
    ) -> Result<Self, IngestError> {
        config.validate().map_err(IngestError::Config)?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("formulary-normalize-{i}"))
            .build()
            .map_err(|e| IngestError::WorkerPool(e.to_string()))?;

        Ok(Self {
            store,
            normalizer,
            batch_size: config.batch_size,
            delimiter: config.term_delimiter,
            pool,
        })
    }

    /// Ingest an in-memory row stream.
    pub fn ingest_rows<I>(&self, rows: I, run: &mut IngestRun) -> Result<(), IngestError>
    where
        I: IntoIterator<Item = RawDrugRow>,
    {
        self.ingest_results(rows.into_iter().map(Ok::<_, std::convert::Infallible>), run)
    }

    /// Ingest rows from a CSV reader.
    pub fn ingest_reader<R: std::io::Read>(
        &self,
        reader: R,
        run: &mut IngestRun,
    ) -> Result<(), IngestError> {
        self.ingest_results(csv_rows(reader), run)
    }

    /// Ingest rows from a CSV file.
    pub fn ingest_csv(&self, path: &Path, run: &mut IngestRun) -> Result<(), IngestError> {
        tracing::info!(path = %path.display(), run_id = %run.run_id, "Ingesting CSV");
        self.ingest_results(csv_rows_from_path(path)?, run)
    }

    /// Drive the pipeline over a fallible row stream. A source error stops
    /// the run after the batches already committed.
    pub fn ingest_results<I, E>(&self, rows: I, run: &mut IngestRun) -> Result<(), IngestError>
    where
        I: IntoIterator<Item = Result<RawDrugRow, E>>,
        IngestError: From<E>,
    {
        let mut window: Vec<(usize, RawDrugRow)> = Vec::with_capacity(self.batch_size);
        for row in rows {
            let row = row?;
            window.push((run.rows_read, row));
            run.rows_read += 1;
            if window.len() == self.batch_size {
                self.flush(&mut window, run)?;
            }
        }
        self.flush(&mut window, run)?;

        tracing::info!(
            run_id = %run.run_id,
            rows = run.rows_read,
            skipped = run.rows_skipped,
            entries = run.entries_written,
            batches = run.batches_committed,
            "Ingestion complete"
        );
        Ok(())
    }

    fn flush(
        &self,
        window: &mut Vec<(usize, RawDrugRow)>,
        run: &mut IngestRun,
    ) -> Result<(), IngestError> {
        if window.is_empty() {
            return Ok(());
        }

        let expander = CrossProductExpander::new(&self.normalizer, self.delimiter);
        let expanded: Vec<_> = self.pool.install(|| {
            window
                .par_iter()
                .map(|(row_index, row)| (*row_index, expander.expand(row)))
                .collect()
        });

        let mut entries: Vec<IndexEntry> = Vec::new();
        for ((row_index, result), (_, row)) in expanded.into_iter().zip(window.iter()) {
            match result {
                Ok(mut row_entries) => entries.append(&mut row_entries),
                Err(reason) => {
                    let drug_code = clean_text(&row.drug_code);
                    tracing::warn!(row_index, drug_code = %drug_code, %reason, "Skipping malformed row");
                    run.rows_skipped += 1;
                    run.skipped.push(MalformedRowWarning {
                        row_index,
                        drug_code,
                        reason,
                    });
                }
            }
        }
        let rows = window.len();
        window.clear();

        if entries.is_empty() {
            return Ok(());
        }

        let batch = run.batches_committed;
        match self.store.put_columns(ColumnBatch::from_entries(&entries)) {
            Ok(written) => {
                run.entries_written += written;
                run.batches_committed += 1;
                tracing::info!(batch, rows, entries = written, "Committed batch");
                Ok(())
            }
            Err(e) => {
                tracing::error!(batch, rows, error = %e, "Batch rejected, prior batches intact");
                Err(IngestError::BatchRejected {
                    batch,
                    committed: run.batches_committed,
                    source: e,
                })
            }
        }
    }
}
