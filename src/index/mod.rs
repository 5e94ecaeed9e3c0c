//! Drug formulation index.
//!
//! ```text
//! RawDrugRow → CrossProductExpander → ColumnBatch → FormulationStore → DrugIndex → DrugRecord
//! ```
//!
//! Each drug is stored as |composition| × |excipients| entries keyed by
//! (drug_code, atc_code, composition_term, excipient_term) and re-aggregated
//! at read time.

pub mod error;
pub mod expand;
pub mod query;
pub mod store;
pub mod traits;

#[cfg(test)]
mod scenario_tests;

pub use error::IndexError;
pub use expand::{cross_product, CrossProductExpander, MalformedReason, MalformedRowWarning};
pub use query::DrugIndex;
pub use store::{ColumnBatch, SqliteFormulationStore};
pub use traits::FormulationStore;
