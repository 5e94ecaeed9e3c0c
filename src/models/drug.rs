use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Per-drug text attributes. Physically repeated on every entry of a drug,
/// logically owned by the drug.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrugAttributes {
    pub drug_name: String,
    pub drug_form: String,
    pub therapeutic_indications: String,
    pub posology: String,
    pub cross_reactivity: String,
    pub contraindications: String,
    pub special_warnings: String,
    pub drug_interactions: String,
    pub pregnancy_info: String,
    pub driving_effects: String,
    pub side_effects: String,
    pub over_dose: String,
    pub incompatibilities: String,
    pub leaflet_id: String,
}

impl DrugAttributes {
    /// Number of attribute columns stored per entry.
    pub const COLUMN_COUNT: usize = 14;

    /// Attribute values in storage column order.
    pub fn columns(&self) -> [&str; Self::COLUMN_COUNT] {
        [
            &self.drug_name,
            &self.drug_form,
            &self.therapeutic_indications,
            &self.posology,
            &self.cross_reactivity,
            &self.contraindications,
            &self.special_warnings,
            &self.drug_interactions,
            &self.pregnancy_info,
            &self.driving_effects,
            &self.side_effects,
            &self.over_dose,
            &self.incompatibilities,
            &self.leaflet_id,
        ]
    }

    /// Apply `f` to every attribute value in place.
    pub fn map_in_place(&mut self, f: impl Fn(&str) -> String) {
        for field in [
            &mut self.drug_name,
            &mut self.drug_form,
            &mut self.therapeutic_indications,
            &mut self.posology,
            &mut self.cross_reactivity,
            &mut self.contraindications,
            &mut self.special_warnings,
            &mut self.drug_interactions,
            &mut self.pregnancy_info,
            &mut self.driving_effects,
            &mut self.side_effects,
            &mut self.over_dose,
            &mut self.incompatibilities,
            &mut self.leaflet_id,
        ] {
            *field = f(field);
        }
    }
}

/// Physical key of one index entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexKey {
    pub drug_code: String,
    pub atc_code: String,
    pub composition_term: String,
    pub excipient_term: String,
}

impl IndexKey {
    pub fn as_tuple(&self) -> (&str, &str, &str, &str) {
        (
            &self.drug_code,
            &self.atc_code,
            &self.composition_term,
            &self.excipient_term,
        )
    }
}

/// The atomic stored unit: one (composition, excipient) pair of a drug.
///
/// Entries expanded from the same drug share one attribute allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: IndexKey,
    pub attributes: Arc<DrugAttributes>,
}

/// Logical drug record, re-aggregated from its entries at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrugRecord {
    pub drug_code: String,
    pub atc_code: String,
    pub composition: BTreeSet<String>,
    pub excipients: BTreeSet<String>,
    #[serde(flatten)]
    pub attributes: DrugAttributes,
}

impl DrugRecord {
    /// Aggregate entries of a single drug. Returns `None` for an empty group.
    ///
    /// Key-level fields come from the first entry; composition and excipient
    /// columns are unioned.
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a IndexEntry>) -> Option<Self> {
        let mut entries = entries.into_iter();
        let first = entries.next()?;
        let mut record = DrugRecord {
            drug_code: first.key.drug_code.clone(),
            atc_code: first.key.atc_code.clone(),
            composition: BTreeSet::from([first.key.composition_term.clone()]),
            excipients: BTreeSet::from([first.key.excipient_term.clone()]),
            attributes: (*first.attributes).clone(),
        };
        for entry in entries {
            record.composition.insert(entry.key.composition_term.clone());
            record.excipients.insert(entry.key.excipient_term.clone());
        }
        Some(record)
    }
}

/// One raw row from the bulk-ingestion source. All fields are text;
/// composition and excipients are delimiter-joined term lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawDrugRow {
    pub drug_code: String,
    #[serde(alias = "atc")]
    pub atc_code: String,
    pub drug_name: String,
    pub drug_form: String,
    pub composition: String,
    pub excipients: String,
    pub therapeutic_indications: String,
    pub posology: String,
    pub cross_reactivity: String,
    pub contraindications: String,
    pub special_warnings: String,
    pub drug_interactions: String,
    pub pregnancy_info: String,
    pub driving_effects: String,
    pub side_effects: String,
    pub over_dose: String,
    pub incompatibilities: String,
    #[serde(alias = "leaflet")]
    pub leaflet_id: String,
}

impl RawDrugRow {
    /// Attribute payload carried by every entry of this row.
    pub fn attributes(&self) -> DrugAttributes {
        DrugAttributes {
            drug_name: self.drug_name.clone(),
            drug_form: self.drug_form.clone(),
            therapeutic_indications: self.therapeutic_indications.clone(),
            posology: self.posology.clone(),
            cross_reactivity: self.cross_reactivity.clone(),
            contraindications: self.contraindications.clone(),
            special_warnings: self.special_warnings.clone(),
            drug_interactions: self.drug_interactions.clone(),
            pregnancy_info: self.pregnancy_info.clone(),
            driving_effects: self.driving_effects.clone(),
            side_effects: self.side_effects.clone(),
            over_dose: self.over_dose.clone(),
            incompatibilities: self.incompatibilities.clone(),
            leaflet_id: self.leaflet_id.clone(),
        }
    }
}

/// Attribute overrides for `update_drug`. `None` keeps the stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DrugUpdate {
    pub atc_code: Option<String>,
    pub composition: Option<Vec<String>>,
    pub excipients: Option<Vec<String>>,
    pub drug_name: Option<String>,
    pub drug_form: Option<String>,
    pub therapeutic_indications: Option<String>,
    pub posology: Option<String>,
    pub cross_reactivity: Option<String>,
    pub contraindications: Option<String>,
    pub special_warnings: Option<String>,
    pub drug_interactions: Option<String>,
    pub pregnancy_info: Option<String>,
    pub driving_effects: Option<String>,
    pub side_effects: Option<String>,
    pub over_dose: Option<String>,
    pub incompatibilities: Option<String>,
    pub leaflet_id: Option<String>,
}

impl DrugUpdate {
    /// Whether the update changes the composition or excipient sets.
    pub fn changes_terms(&self) -> bool {
        self.composition.is_some() || self.excipients.is_some()
    }

    /// Overwrite the attributes named by this update.
    pub fn apply_attributes(&self, attrs: &mut DrugAttributes) {
        fn set(target: &mut String, value: &Option<String>) {
            if let Some(v) = value {
                target.clone_from(v);
            }
        }

        set(&mut attrs.drug_name, &self.drug_name);
        set(&mut attrs.drug_form, &self.drug_form);
        set(&mut attrs.therapeutic_indications, &self.therapeutic_indications);
        set(&mut attrs.posology, &self.posology);
        set(&mut attrs.cross_reactivity, &self.cross_reactivity);
        set(&mut attrs.contraindications, &self.contraindications);
        set(&mut attrs.special_warnings, &self.special_warnings);
        set(&mut attrs.drug_interactions, &self.drug_interactions);
        set(&mut attrs.pregnancy_info, &self.pregnancy_info);
        set(&mut attrs.driving_effects, &self.driving_effects);
        set(&mut attrs.side_effects, &self.side_effects);
        set(&mut attrs.over_dose, &self.over_dose);
        set(&mut attrs.incompatibilities, &self.incompatibilities);
        set(&mut attrs.leaflet_id, &self.leaflet_id);
    }
}

/// Size summary of the index. `entries` counts physical rows, `drugs`
/// counts distinct drug codes; the two are never interchangeable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub entries: u64,
    pub drugs: u64,
    pub composition_terms: u64,
    pub excipient_terms: u64,
}
