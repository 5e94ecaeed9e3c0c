//! Storage seam for the formulation index.
//!
//! The query layer and the batch loader only talk to `FormulationStore`;
//! `SqliteFormulationStore` is the shipped implementation.

use std::collections::BTreeSet;

use super::error::IndexError;
use super::store::ColumnBatch;
use crate::models::{IndexEntry, IndexStats};

/// Durable key → attribute mapping keyed by
/// (drug_code, atc_code, composition_term, excipient_term).
///
/// Writers are serialized; readers see either the state before a batch or
/// the state after it, never a partial batch. Returned entries are copies.
pub trait FormulationStore: Send + Sync {
    /// Commit a column batch as one unit. Integrity failures reject the
    /// whole batch; previously committed batches are untouched.
    fn put_columns(&self, batch: ColumnBatch) -> Result<usize, IndexError>;

    /// Insert or overwrite entries. Exact key repeats collapse to the last
    /// occurrence.
    fn put_batch(&self, entries: &[IndexEntry]) -> Result<usize, IndexError> {
        self.put_columns(ColumnBatch::from_entries(entries))
    }

    /// Remove every entry of `drug_code`, then write `batch`, as one unit.
    fn replace_drug(&self, drug_code: &str, batch: ColumnBatch) -> Result<usize, IndexError>;

    /// All entries sharing `drug_code`.
    fn get_by_key_prefix(&self, drug_code: &str) -> Result<Vec<IndexEntry>, IndexError>;

    /// All entries whose composition term is a member of `terms`.
    fn get_by_composition(&self, terms: &BTreeSet<String>) -> Result<Vec<IndexEntry>, IndexError>;

    /// All entries tagged with exactly `atc_code`.
    fn get_by_atc(&self, atc_code: &str) -> Result<Vec<IndexEntry>, IndexError>;

    /// All entries whose ATC code starts with `prefix`.
    fn get_by_atc_prefix(&self, prefix: &str) -> Result<Vec<IndexEntry>, IndexError>;

    /// Every entry, ordered by key.
    fn scan_all(&self) -> Result<Vec<IndexEntry>, IndexError>;

    /// Remove every entry of `drug_code` in one logical operation.
    /// Returns the number of physical entries removed.
    fn delete_by_drug_code(&self, drug_code: &str) -> Result<usize, IndexError>;

    /// Number of physical entries, not drugs.
    fn count(&self) -> Result<u64, IndexError>;

    fn stats(&self) -> Result<IndexStats, IndexError>;
}
