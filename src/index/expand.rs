//! Cross-product expansion: one raw drug row → |composition| × |excipients|
//! index entries sharing the row's attribute payload.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::models::{DrugAttributes, IndexEntry, IndexKey, RawDrugRow};
use crate::normalize::{clean_text, TermNormalizer};

/// Why a raw row contributed no entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedReason {
    MissingDrugCode,
    MissingAtcCode,
    EmptyComposition,
    EmptyExcipients,
}

impl MalformedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingDrugCode => "missing_drug_code",
            Self::MissingAtcCode => "missing_atc_code",
            Self::EmptyComposition => "empty_composition",
            Self::EmptyExcipients => "empty_excipients",
        }
    }
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A skipped row. Not an error: the rest of the batch proceeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MalformedRowWarning {
    pub row_index: usize,
    pub drug_code: String,
    pub reason: MalformedReason,
}

/// Expands raw rows into physical index entries.
#[derive(Debug, Clone, Copy)]
pub struct CrossProductExpander<'a> {
    normalizer: &'a TermNormalizer,
    delimiter: char,
}

impl<'a> CrossProductExpander<'a> {
    pub fn new(normalizer: &'a TermNormalizer, delimiter: char) -> Self {
        Self { normalizer, delimiter }
    }

    /// Normalize a raw row and expand it. A row missing a key component
    /// yields the reason instead of entries.
    pub fn expand(&self, row: &RawDrugRow) -> Result<Vec<IndexEntry>, MalformedReason> {
        let drug_code = clean_text(&row.drug_code);
        if drug_code.is_empty() {
            return Err(MalformedReason::MissingDrugCode);
        }
        let atc_code = self.normalizer.normalize(&row.atc_code);
        if atc_code.is_empty() {
            return Err(MalformedReason::MissingAtcCode);
        }

        let composition = self.normalizer.split_terms(&row.composition, self.delimiter);
        if composition.is_empty() {
            return Err(MalformedReason::EmptyComposition);
        }
        let excipients = self.normalizer.split_terms(&row.excipients, self.delimiter);
        if excipients.is_empty() {
            return Err(MalformedReason::EmptyExcipients);
        }

        let mut attributes = row.attributes();
        attributes.map_in_place(clean_text);

        Ok(cross_product(
            &drug_code,
            &atc_code,
            &composition,
            &excipients,
            Arc::new(attributes),
        ))
    }
}

/// Pair every composition term with every excipient term.
///
/// Terms are expected to be normalized and distinct; an empty list on
/// either side yields no entries.
pub fn cross_product(
    drug_code: &str,
    atc_code: &str,
    composition: &[String],
    excipients: &[String],
    attributes: Arc<DrugAttributes>,
) -> Vec<IndexEntry> {
    let mut entries = Vec::with_capacity(composition.len() * excipients.len());
    for comp in composition {
        for exc in excipients {
            entries.push(IndexEntry {
                key: IndexKey {
                    drug_code: drug_code.to_string(),
                    atc_code: atc_code.to_string(),
                    composition_term: comp.clone(),
                    excipient_term: exc.clone(),
                },
                attributes: Arc::clone(&attributes),
            });
        }
    }
    entries
}
