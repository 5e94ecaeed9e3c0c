//! SQLite-backed formulation store.
//!
//! One table, `formulation_entries`, keyed by the 4-tuple
//! (drug_code, atc_code, composition_term, excipient_term), with a secondary
//! index on `composition_term` for value-set membership scans.
//!
//! Writes go through a single writer connection behind a mutex; each batch
//! is one transaction. File-backed stores run in WAL mode and give every
//! read its own read-only connection, so readers observe committed batch
//! boundaries only and never wait on the writer.

use std::collections::{BTreeSet, HashMap};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, params_from_iter, Connection, Row, Transaction};

use super::error::IndexError;
use super::traits::FormulationStore;
use crate::db::{open_database, open_memory_database, open_read_only};
use crate::models::{DrugAttributes, IndexEntry, IndexKey, IndexStats};

const SELECT_ENTRIES: &str = "SELECT drug_code, atc_code, composition_term, excipient_term,
        drug_name, drug_form, therapeutic_indications, posology, cross_reactivity,
        contraindications, special_warnings, drug_interactions, pregnancy_info,
        driving_effects, side_effects, over_dose, incompatibilities, leaflet_id
     FROM formulation_entries";

const ORDER_BY_KEY: &str = "ORDER BY drug_code, atc_code, composition_term, excipient_term";

const UPSERT_ENTRY: &str = "INSERT INTO formulation_entries
        (drug_code, atc_code, composition_term, excipient_term,
         drug_name, drug_form, therapeutic_indications, posology, cross_reactivity,
         contraindications, special_warnings, drug_interactions, pregnancy_info,
         driving_effects, side_effects, over_dose, incompatibilities, leaflet_id)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
     ON CONFLICT (drug_code, atc_code, composition_term, excipient_term) DO UPDATE SET
        drug_name = excluded.drug_name,
        drug_form = excluded.drug_form,
        therapeutic_indications = excluded.therapeutic_indications,
        posology = excluded.posology,
        cross_reactivity = excluded.cross_reactivity,
        contraindications = excluded.contraindications,
        special_warnings = excluded.special_warnings,
        drug_interactions = excluded.drug_interactions,
        pregnancy_info = excluded.pregnancy_info,
        driving_effects = excluded.driving_effects,
        side_effects = excluded.side_effects,
        over_dose = excluded.over_dose,
        incompatibilities = excluded.incompatibilities,
        leaflet_id = excluded.leaflet_id";

// Attributes are per drug: re-stamp every entry of the code, including
// entries this batch did not touch.
const PROPAGATE_ATTRIBUTES: &str = "UPDATE formulation_entries SET
        drug_name = ?2, drug_form = ?3, therapeutic_indications = ?4, posology = ?5,
        cross_reactivity = ?6, contraindications = ?7, special_warnings = ?8,
        drug_interactions = ?9, pregnancy_info = ?10, driving_effects = ?11,
        side_effects = ?12, over_dose = ?13, incompatibilities = ?14, leaflet_id = ?15
     WHERE drug_code = ?1";

// ═══════════════════════════════════════════════════════════
// Column batch
// ═══════════════════════════════════════════════════════════

/// Columnar bulk-write unit: key coordinates plus one attribute set per row.
///
/// Built from entries with [`ColumnBatch::from_entries`], which deduplicates
/// keys; the integrity check guards batches assembled by hand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnBatch {
    pub drug_codes: Vec<String>,
    pub atc_codes: Vec<String>,
    pub composition_terms: Vec<String>,
    pub excipient_terms: Vec<String>,
    pub attributes: Vec<Arc<DrugAttributes>>,
}

impl ColumnBatch {
    /// Collapse exact key repeats to their last occurrence. Survivors keep
    /// input order, so the last row for a drug code is also its most recent
    /// attribute payload.
    pub fn from_entries(entries: &[IndexEntry]) -> Self {
        let mut last_seen: HashMap<(&str, &str, &str, &str), usize> =
            HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            last_seen.insert(entry.key.as_tuple(), i);
        }

        let mut batch = ColumnBatch::with_capacity(last_seen.len());
        for (i, entry) in entries.iter().enumerate() {
            if last_seen.get(&entry.key.as_tuple()) == Some(&i) {
                batch.push(entry);
            }
        }
        batch
    }

    fn with_capacity(n: usize) -> Self {
        Self {
            drug_codes: Vec::with_capacity(n),
            atc_codes: Vec::with_capacity(n),
            composition_terms: Vec::with_capacity(n),
            excipient_terms: Vec::with_capacity(n),
            attributes: Vec::with_capacity(n),
        }
    }

    fn push(&mut self, entry: &IndexEntry) {
        self.drug_codes.push(entry.key.drug_code.clone());
        self.atc_codes.push(entry.key.atc_code.clone());
        self.composition_terms.push(entry.key.composition_term.clone());
        self.excipient_terms.push(entry.key.excipient_term.clone());
        self.attributes.push(Arc::clone(&entry.attributes));
    }

    /// Number of coordinate rows.
    pub fn len(&self) -> usize {
        self.drug_codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Coordinate and attribute columns must line up, and no key component
    /// may be empty.
    pub fn check_integrity(&self) -> Result<(), IndexError> {
        let coords = self.drug_codes.len();
        let lengths = [
            ("atc_code", self.atc_codes.len()),
            ("composition_term", self.composition_terms.len()),
            ("excipient_term", self.excipient_terms.len()),
            ("attributes", self.attributes.len()),
        ];
        for (column, len) in lengths {
            if len != coords {
                return Err(IndexError::BatchIntegrity(format!(
                    "length mismatch: {coords} drug_code coordinates, {len} {column} values"
                )));
            }
        }

        for i in 0..coords {
            let components = [
                ("drug_code", &self.drug_codes[i]),
                ("atc_code", &self.atc_codes[i]),
                ("composition_term", &self.composition_terms[i]),
                ("excipient_term", &self.excipient_terms[i]),
            ];
            for (name, value) in components {
                if value.trim().is_empty() {
                    return Err(IndexError::BatchIntegrity(format!(
                        "row {i}: empty {name} key component"
                    )));
                }
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════
// Store
// ═══════════════════════════════════════════════════════════

enum StoreLocation {
    File(PathBuf),
    Memory,
}

/// Read connection: a private read-only connection for file stores, the
/// shared writer connection for in-memory stores.
enum ReadConnection<'a> {
    Owned(Connection),
    Shared(MutexGuard<'a, Connection>),
}

impl Deref for ReadConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match self {
            ReadConnection::Owned(conn) => conn,
            ReadConnection::Shared(guard) => guard,
        }
    }
}

/// SQLite implementation of [`FormulationStore`].
pub struct SqliteFormulationStore {
    location: StoreLocation,
    writer: Mutex<Connection>,
}

impl SqliteFormulationStore {
    /// Open (creating and migrating if needed) a file-backed store.
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = open_database(path)?;
        Ok(Self {
            location: StoreLocation::File(path.to_path_buf()),
            writer: Mutex::new(conn),
        })
    }

    /// Open a throwaway in-memory store.
    pub fn open_in_memory() -> Result<Self, IndexError> {
        let conn = open_memory_database()?;
        Ok(Self {
            location: StoreLocation::Memory,
            writer: Mutex::new(conn),
        })
    }

    /// Database file path, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            StoreLocation::File(path) => Some(path),
            StoreLocation::Memory => None,
        }
    }

    fn writer(&self) -> Result<MutexGuard<'_, Connection>, IndexError> {
        self.writer.lock().map_err(|_| IndexError::LockPoisoned)
    }

    fn reader(&self) -> Result<ReadConnection<'_>, IndexError> {
        match &self.location {
            StoreLocation::File(path) => Ok(ReadConnection::Owned(open_read_only(path)?)),
            StoreLocation::Memory => Ok(ReadConnection::Shared(self.writer()?)),
        }
    }

    fn query_entries(
        &self,
        filter: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<IndexEntry>, IndexError> {
        let conn = self.reader()?;
        let sql = format!("{SELECT_ENTRIES} {filter} {ORDER_BY_KEY}");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params, entry_from_row)?;
        let entries = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

/// Upsert every row of `batch`, then propagate each drug's latest attributes.
fn write_columns(tx: &Transaction<'_>, batch: &ColumnBatch) -> Result<(), IndexError> {
    let mut latest: HashMap<&str, &DrugAttributes> = HashMap::new();
    {
        let mut upsert = tx.prepare_cached(UPSERT_ENTRY)?;
        for i in 0..batch.len() {
            let attrs = &*batch.attributes[i];
            let key = [
                batch.drug_codes[i].as_str(),
                batch.atc_codes[i].as_str(),
                batch.composition_terms[i].as_str(),
                batch.excipient_terms[i].as_str(),
            ];
            upsert.execute(params_from_iter(key.iter().chain(attrs.columns().iter())))?;
            latest.insert(batch.drug_codes[i].as_str(), attrs);
        }
    }

    let mut propagate = tx.prepare_cached(PROPAGATE_ATTRIBUTES)?;
    for (drug_code, attrs) in latest {
        let code = [drug_code];
        propagate.execute(params_from_iter(code.iter().chain(attrs.columns().iter())))?;
    }
    Ok(())
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<IndexEntry> {
    Ok(IndexEntry {
        key: IndexKey {
            drug_code: row.get(0)?,
            atc_code: row.get(1)?,
            composition_term: row.get(2)?,
            excipient_term: row.get(3)?,
        },
        attributes: Arc::new(DrugAttributes {
            drug_name: row.get(4)?,
            drug_form: row.get(5)?,
            therapeutic_indications: row.get(6)?,
            posology: row.get(7)?,
            cross_reactivity: row.get(8)?,
            contraindications: row.get(9)?,
            special_warnings: row.get(10)?,
            drug_interactions: row.get(11)?,
            pregnancy_info: row.get(12)?,
            driving_effects: row.get(13)?,
            side_effects: row.get(14)?,
            over_dose: row.get(15)?,
            incompatibilities: row.get(16)?,
            leaflet_id: row.get(17)?,
        }),
    })
}

impl FormulationStore for SqliteFormulationStore {
    fn put_columns(&self, batch: ColumnBatch) -> Result<usize, IndexError> {
        batch.check_integrity()?;
        if batch.is_empty() {
            return Ok(0);
        }

        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        write_columns(&tx, &batch)?;
        tx.commit()?;

        tracing::debug!(entries = batch.len(), "Committed column batch");
        Ok(batch.len())
    }

    fn replace_drug(&self, drug_code: &str, batch: ColumnBatch) -> Result<usize, IndexError> {
        batch.check_integrity()?;
        if let Some(other) = batch.drug_codes.iter().find(|c| c.as_str() != drug_code) {
            return Err(IndexError::BatchIntegrity(format!(
                "replace of {drug_code} carries an entry for {other}"
            )));
        }

        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM formulation_entries WHERE drug_code = ?1",
            params![drug_code],
        )?;
        write_columns(&tx, &batch)?;
        tx.commit()?;

        tracing::debug!(drug_code, removed, written = batch.len(), "Replaced drug entries");
        Ok(batch.len())
    }

    fn get_by_key_prefix(&self, drug_code: &str) -> Result<Vec<IndexEntry>, IndexError> {
        self.query_entries("WHERE drug_code = ?1", params![drug_code])
    }

    fn get_by_composition(&self, terms: &BTreeSet<String>) -> Result<Vec<IndexEntry>, IndexError> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (1..=terms.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        self.query_entries(
            &format!("WHERE composition_term IN ({placeholders})"),
            params_from_iter(terms.iter()),
        )
    }

    fn get_by_atc(&self, atc_code: &str) -> Result<Vec<IndexEntry>, IndexError> {
        self.query_entries("WHERE atc_code = ?1", params![atc_code])
    }

    fn get_by_atc_prefix(&self, prefix: &str) -> Result<Vec<IndexEntry>, IndexError> {
        // Exact byte prefix; LIKE would fold ASCII case
        self.query_entries(
            "WHERE substr(atc_code, 1, length(?1)) = ?1",
            params![prefix],
        )
    }

    fn scan_all(&self) -> Result<Vec<IndexEntry>, IndexError> {
        self.query_entries("", [])
    }

    fn delete_by_drug_code(&self, drug_code: &str) -> Result<usize, IndexError> {
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM formulation_entries WHERE drug_code = ?1",
            params![drug_code],
        )?;
        tx.commit()?;
        Ok(removed)
    }

    fn count(&self) -> Result<u64, IndexError> {
        let conn = self.reader()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM formulation_entries",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn stats(&self) -> Result<IndexStats, IndexError> {
        let conn = self.reader()?;
        let stats = conn.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT drug_code),
                    COUNT(DISTINCT composition_term), COUNT(DISTINCT excipient_term)
             FROM formulation_entries",
            [],
            |row| {
                Ok(IndexStats {
                    entries: row.get::<_, i64>(0)? as u64,
                    drugs: row.get::<_, i64>(1)? as u64,
                    composition_terms: row.get::<_, i64>(2)? as u64,
                    excipient_terms: row.get::<_, i64>(3)? as u64,
                })
            },
        )?;
        Ok(stats)
    }
}
