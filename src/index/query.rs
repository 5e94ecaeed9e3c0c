//! Query and aggregation facade over a [`FormulationStore`].
//!
//! Physical entries go in, logical `DrugRecord`s come out. Every query input
//! passes through the same normalizer used at ingestion, so callers may pass
//! raw ingredient names.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::error::IndexError;
use super::expand::{cross_product, CrossProductExpander};
use super::store::{ColumnBatch, SqliteFormulationStore};
use super::traits::FormulationStore;
use crate::config::IndexConfig;
use crate::ingest::BatchLoader;
use crate::models::{
    DrugRecord, DrugUpdate, ExclusionPolicy, IndexEntry, IndexStats, RawDrugRow, UpdatePolicy,
};
use crate::normalize::{clean_text, TermNormalizer};

/// The drug formulation index: a store plus the normalizer and policies
/// that shape what goes in and what comes back.
pub struct DrugIndex<S: FormulationStore = SqliteFormulationStore> {
    store: S,
    normalizer: TermNormalizer,
    config: IndexConfig,
}

impl DrugIndex<SqliteFormulationStore> {
    /// Open (or create) the file-backed index at `config.db_path`.
    pub fn open(config: &IndexConfig) -> Result<Self, IndexError> {
        let store = SqliteFormulationStore::open(&config.db_path)?;
        tracing::info!(path = %config.db_path.display(), "Opened formulation index");
        Ok(Self::with_store(store, config.clone()))
    }

    /// In-memory index, dropped with the value.
    pub fn open_in_memory(config: IndexConfig) -> Result<Self, IndexError> {
        Ok(Self::with_store(SqliteFormulationStore::open_in_memory()?, config))
    }
}

impl<S: FormulationStore> DrugIndex<S> {
    pub fn with_store(store: S, config: IndexConfig) -> Self {
        Self {
            store,
            normalizer: TermNormalizer::new(config.case_policy),
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn normalizer(&self) -> &TermNormalizer {
        &self.normalizer
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Batch loader configured from this index's batch size, worker count
    /// and delimiter.
    pub fn loader(&self) -> Result<BatchLoader<'_, S>, crate::ingest::IngestError> {
        BatchLoader::new(&self.store, self.normalizer, &self.config)
    }

    // ── Writes ────────────────────────────────────────────────

    /// Expand and store a single raw row. A malformed row stores nothing and
    /// returns 0.
    pub fn insert_drug(&self, row: &RawDrugRow) -> Result<usize, IndexError> {
        let expander = CrossProductExpander::new(&self.normalizer, self.config.term_delimiter);
        match expander.expand(row) {
            Ok(entries) => self.store.put_batch(&entries),
            Err(reason) => {
                tracing::warn!(drug_code = %row.drug_code, %reason, "Skipping malformed drug row");
                Ok(0)
            }
        }
    }

    /// Update a drug with the configured update policy.
    pub fn update_drug(
        &self,
        drug_code: &str,
        update: &DrugUpdate,
    ) -> Result<Option<DrugRecord>, IndexError> {
        self.update_drug_with(drug_code, update, self.config.update_policy)
    }

    /// Read the current record, apply `update`, and write the cross product of
    /// the resulting term sets.
    ///
    /// Under [`UpdatePolicy::Upsert`] entries for terms dropped by the update
    /// stay in the store; [`UpdatePolicy::Replace`] removes them in the same
    /// transaction. A drug has one ATC code under either policy: when the
    /// update changes it, an upsert carries the stale pairs over to the new
    /// code instead of leaving them under the old one. Returns `None` when
    /// the drug does not exist.
    pub fn update_drug_with(
        &self,
        drug_code: &str,
        update: &DrugUpdate,
        policy: UpdatePolicy,
    ) -> Result<Option<DrugRecord>, IndexError> {
        let drug_code = clean_text(drug_code);
        let stored = self.store.get_by_key_prefix(&drug_code)?;
        let Some(current) = DrugRecord::from_entries(&stored) else {
            return Ok(None);
        };

        let atc_code = match &update.atc_code {
            Some(atc) => self.normalizer.normalize(atc),
            None => current.atc_code.clone(),
        };
        if atc_code.is_empty() {
            return Err(IndexError::EmptyTermSet { field: "atc_code" });
        }

        let composition = match &update.composition {
            Some(terms) => self.normalizer.normalize_terms(terms),
            None => current.composition.iter().cloned().collect(),
        };
        if composition.is_empty() {
            return Err(IndexError::EmptyTermSet { field: "composition" });
        }
        let excipients = match &update.excipients {
            Some(terms) => self.normalizer.normalize_terms(terms),
            None => current.excipients.iter().cloned().collect(),
        };
        if excipients.is_empty() {
            return Err(IndexError::EmptyTermSet { field: "excipients" });
        }

        let mut attributes = current.attributes;
        update.apply_attributes(&mut attributes);
        attributes.map_in_place(clean_text);

        let attributes = Arc::new(attributes);
        let mut entries = cross_product(
            &drug_code,
            &atc_code,
            &composition,
            &excipients,
            Arc::clone(&attributes),
        );
        let moves_atc = stored.iter().any(|e| e.key.atc_code != atc_code);
        let written = match policy {
            UpdatePolicy::Upsert if !moves_atc => self.store.put_batch(&entries)?,
            UpdatePolicy::Upsert => {
                // Re-home existing pairs first so the new cross product wins
                // on overlapping keys.
                let mut carried: Vec<IndexEntry> = stored
                    .into_iter()
                    .map(|mut e| {
                        e.key.atc_code.clone_from(&atc_code);
                        e.attributes = Arc::clone(&attributes);
                        e
                    })
                    .collect();
                carried.append(&mut entries);
                self.store
                    .replace_drug(&drug_code, ColumnBatch::from_entries(&carried))?
            }
            UpdatePolicy::Replace => self
                .store
                .replace_drug(&drug_code, ColumnBatch::from_entries(&entries))?,
        };
        tracing::info!(
            drug_code = %drug_code,
            policy = %policy,
            entries = written,
            terms_changed = update.changes_terms(),
            "Updated drug"
        );

        self.search_drug(&drug_code)
    }

    /// Remove every entry of a drug. Returns the number of entries removed.
    pub fn delete_drug(&self, drug_code: &str) -> Result<usize, IndexError> {
        let removed = self.store.delete_by_drug_code(&clean_text(drug_code))?;
        tracing::info!(drug_code, entries = removed, "Deleted drug");
        Ok(removed)
    }

    // ── Reads ─────────────────────────────────────────────────

    /// Aggregated record for `drug_code`, or `None` if it has no entries.
    pub fn search_drug(&self, drug_code: &str) -> Result<Option<DrugRecord>, IndexError> {
        let entries = self.store.get_by_key_prefix(&clean_text(drug_code))?;
        Ok(DrugRecord::from_entries(&entries))
    }

    /// Drugs containing any of `required` compositions, filtered by the
    /// configured exclusion policy.
    pub fn search_by_composition_excluding_excipients<S1, S2>(
        &self,
        required: &[S1],
        forbidden: &[S2],
    ) -> Result<Vec<DrugRecord>, IndexError>
    where
        S1: AsRef<str>,
        S2: AsRef<str>,
    {
        self.search_by_composition_excluding_excipients_with(
            required,
            forbidden,
            self.config.exclusion_policy,
        )
    }

    /// Select entries whose composition term is any of `required`, then
    /// apply `policy` to the forbidden excipients:
    ///
    /// - [`ExclusionPolicy::RowSurvival`] drops individual entries with a
    ///   forbidden excipient; a drug appears if any matching entry survives,
    ///   reporting only the surviving excipients.
    /// - [`ExclusionPolicy::WholeDrugVeto`] drops a drug outright if any of
    ///   its matching entries carries a forbidden excipient.
    ///
    /// Reported composition is limited to the matched terms.
    pub fn search_by_composition_excluding_excipients_with<S1, S2>(
        &self,
        required: &[S1],
        forbidden: &[S2],
        policy: ExclusionPolicy,
    ) -> Result<Vec<DrugRecord>, IndexError>
    where
        S1: AsRef<str>,
        S2: AsRef<str>,
    {
        let required: BTreeSet<String> =
            self.normalizer.normalize_terms(required).into_iter().collect();
        let forbidden: BTreeSet<String> =
            self.normalizer.normalize_terms(forbidden).into_iter().collect();

        let matching = self.store.get_by_composition(&required)?;
        let matched = matching.len();

        let groups = group_by_drug(matching);
        let records: Vec<DrugRecord> = groups
            .into_values()
            .filter_map(|entries| match policy {
                ExclusionPolicy::RowSurvival => DrugRecord::from_entries(
                    entries
                        .iter()
                        .filter(|e| !forbidden.contains(&e.key.excipient_term)),
                ),
                ExclusionPolicy::WholeDrugVeto => {
                    if entries
                        .iter()
                        .any(|e| forbidden.contains(&e.key.excipient_term))
                    {
                        None
                    } else {
                        DrugRecord::from_entries(&entries)
                    }
                }
            })
            .collect();

        tracing::debug!(
            required = required.len(),
            forbidden = forbidden.len(),
            %policy,
            entries = matched,
            drugs = records.len(),
            "Composition search"
        );
        Ok(records)
    }

    /// Drugs tagged with exactly `atc_code`, optionally leaving one out.
    pub fn find_drugs_by_atc(
        &self,
        atc_code: &str,
        exclude_drug_code: Option<&str>,
    ) -> Result<Vec<DrugRecord>, IndexError> {
        let entries = self.store.get_by_atc(&self.normalizer.normalize(atc_code))?;
        Ok(aggregate_excluding(entries, exclude_drug_code))
    }

    /// Drugs in a therapeutic class: every ATC code starting with `prefix`.
    pub fn find_drugs_by_atc_prefix(
        &self,
        prefix: &str,
        exclude_drug_code: Option<&str>,
    ) -> Result<Vec<DrugRecord>, IndexError> {
        let prefix = self.normalizer.normalize(prefix);
        if prefix.is_empty() {
            return Ok(Vec::new());
        }
        let entries = self.store.get_by_atc_prefix(&prefix)?;
        Ok(aggregate_excluding(entries, exclude_drug_code))
    }

    /// Every drug, one record each, ordered by drug code.
    pub fn list_all(&self) -> Result<Vec<DrugRecord>, IndexError> {
        Ok(aggregate(self.store.scan_all()?))
    }

    /// Physical entry count (not a drug count).
    pub fn count(&self) -> Result<u64, IndexError> {
        self.store.count()
    }

    pub fn stats(&self) -> Result<IndexStats, IndexError> {
        self.store.stats()
    }
}

fn group_by_drug(entries: Vec<IndexEntry>) -> BTreeMap<String, Vec<IndexEntry>> {
    let mut groups: BTreeMap<String, Vec<IndexEntry>> = BTreeMap::new();
    for entry in entries {
        groups
            .entry(entry.key.drug_code.clone())
            .or_default()
            .push(entry);
    }
    groups
}

fn aggregate(entries: Vec<IndexEntry>) -> Vec<DrugRecord> {
    group_by_drug(entries)
        .into_values()
        .filter_map(|group| DrugRecord::from_entries(&group))
        .collect()
}

fn aggregate_excluding(entries: Vec<IndexEntry>, exclude: Option<&str>) -> Vec<DrugRecord> {
    let exclude = exclude.map(clean_text);
    aggregate(
        entries
            .into_iter()
            .filter(|e| exclude.as_deref() != Some(e.key.drug_code.as_str()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CasePolicy;

    fn index() -> DrugIndex {
        DrugIndex::open_in_memory(IndexConfig::default()).unwrap()
    }

    fn row(code: &str, atc: &str, comp: &str, exc: &str) -> RawDrugRow {
        RawDrugRow {
            drug_code: code.into(),
            atc_code: atc.into(),
            drug_name: format!("Drug {code}"),
            composition: comp.into(),
            excipients: exc.into(),
            ..Default::default()
        }
    }

    #[test]
    fn insert_then_search() {
        let idx = index();
        assert_eq!(idx.insert_drug(&row("001", "N02A", "A#B", "X#Y#Z")).unwrap(), 6);
        let record = idx.search_drug("001").unwrap().unwrap();
        assert_eq!(record.attributes.drug_name, "Drug 001");
        assert_eq!(record.composition.len(), 2);
        assert_eq!(record.excipients.len(), 3);
    }

    #[test]
    fn insert_malformed_row_stores_nothing() {
        let idx = index();
        assert_eq!(idx.insert_drug(&row("001", "N02A", "A", "")).unwrap(), 0);
        assert_eq!(idx.count().unwrap(), 0);
    }

    #[test]
    fn search_missing_drug_is_none() {
        assert!(index().search_drug("nope").unwrap().is_none());
    }

    #[test]
    fn query_inputs_are_normalized() {
        let idx = DrugIndex::open_in_memory(IndexConfig {
            case_policy: CasePolicy::Lower,
            ..Default::default()
        })
        .unwrap();
        idx.insert_drug(&row("001", "N02BE01", "Paracetamolo", "Amido di mais")).unwrap();

        let hits = idx
            .search_by_composition_excluding_excipients(&["PARACETAMOLO\u{a0}"], &[] as &[&str])
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(idx.find_drugs_by_atc("N02BE01", None).unwrap().len(), 1);
    }

    #[test]
    fn atc_prefix_finds_therapeutic_class() {
        let idx = index();
        idx.insert_drug(&row("001", "N02AA01", "A", "X")).unwrap();
        idx.insert_drug(&row("002", "N02BE01", "B", "X")).unwrap();
        idx.insert_drug(&row("003", "J01CA04", "C", "X")).unwrap();

        let codes: Vec<String> = idx
            .find_drugs_by_atc_prefix("N02", None)
            .unwrap()
            .into_iter()
            .map(|r| r.drug_code)
            .collect();
        assert_eq!(codes, vec!["001", "002"]);

        let without_one = idx.find_drugs_by_atc_prefix("N02", Some("001")).unwrap();
        assert_eq!(without_one.len(), 1);
        assert!(idx.find_drugs_by_atc_prefix("  ", None).unwrap().is_empty());
    }

    #[test]
    fn update_attributes_only_keeps_terms() {
        let idx = index();
        idx.insert_drug(&row("001", "N02A", "A#B", "X")).unwrap();

        let update = DrugUpdate {
            posology: Some(" 2 tablets daily ".into()),
            ..Default::default()
        };
        let record = idx.update_drug("001", &update).unwrap().unwrap();
        assert_eq!(record.attributes.posology, "2 tablets daily");
        assert_eq!(record.attributes.drug_name, "Drug 001");
        assert_eq!(idx.count().unwrap(), 2);
    }

    #[test]
    fn update_missing_drug_is_none() {
        let idx = index();
        assert!(idx.update_drug("404", &DrugUpdate::default()).unwrap().is_none());
    }

    #[test]
    fn update_to_empty_terms_is_rejected() {
        let idx = index();
        idx.insert_drug(&row("001", "N02A", "A", "X")).unwrap();
        let update = DrugUpdate {
            excipients: Some(vec![" ".into()]),
            ..Default::default()
        };
        let err = idx.update_drug("001", &update).unwrap_err();
        assert!(matches!(err, IndexError::EmptyTermSet { field: "excipients" }));
        assert_eq!(idx.count().unwrap(), 1);
    }

    #[test]
    fn delete_reports_removed_entries() {
        let idx = index();
        idx.insert_drug(&row("001", "N02A", "A#B", "X#Y")).unwrap();
        assert_eq!(idx.delete_drug("001").unwrap(), 4);
        assert!(idx.search_drug("001").unwrap().is_none());
    }

    #[test]
    fn stats_count_drugs_and_entries() {
        let idx = index();
        idx.insert_drug(&row("001", "N02A", "A#B", "X#Y")).unwrap();
        idx.insert_drug(&row("002", "N02A", "A", "X")).unwrap();
        let stats = idx.stats().unwrap();
        assert_eq!(stats.entries, 5);
        assert_eq!(stats.drugs, 2);
        assert_eq!(idx.list_all().unwrap().len(), 2);
    }
}
