//! End-to-end behaviour of the index: ingestion through the loader, reads
//! through `DrugIndex`, both exclusion policies and both update policies.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use proptest::prelude::*;

use super::*;
use crate::config::IndexConfig;
use crate::ingest::IngestRun;
use crate::models::{DrugUpdate, ExclusionPolicy, RawDrugRow, UpdatePolicy};

fn config() -> IndexConfig {
    IndexConfig {
        workers: 2,
        ..Default::default()
    }
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

fn ingest(index: &DrugIndex, rows: Vec<RawDrugRow>) -> IngestRun {
    let mut run = IngestRun::new();
    index.loader().unwrap().ingest_rows(rows, &mut run).unwrap();
    run
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn sample_rows() -> Vec<RawDrugRow> {
    vec![
        row("001", "N02A", "Paracetamol#Caffeine", "Lactose#Starch"),
        row("002", "M01A", "Ibuprofen", "Lactose#Peanut oil"),
        row("003", "N02A", "Tramadol", "Cellulose"),
    ]
}

#[test]
fn two_by_two_drug_expands_to_four_entries() {
    let index = DrugIndex::open_in_memory(config()).unwrap();
    ingest(&index, vec![row("001", "N02A", "Paracetamol#Caffeine", "Lactose#Starch")]);

    assert_eq!(index.count().unwrap(), 4);
    let record = index.search_drug("001").unwrap().unwrap();
    assert_eq!(record.atc_code, "N02A");
    assert_eq!(record.composition, set(&["Paracetamol", "Caffeine"]));
    assert_eq!(record.excipients, set(&["Lactose", "Starch"]));
}

#[test]
fn row_survival_keeps_drug_with_permitted_excipient() {
    let index = DrugIndex::open_in_memory(config()).unwrap();
    ingest(&index, sample_rows());

    let hits = index
        .search_by_composition_excluding_excipients_with(
            &["Ibuprofen"],
            &["Peanut oil"],
            ExclusionPolicy::RowSurvival,
        )
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].drug_code, "002");
    assert_eq!(hits[0].excipients, set(&["Lactose"]));
}

#[test]
fn whole_drug_veto_drops_drug_with_any_forbidden_excipient() {
    let index = DrugIndex::open_in_memory(config()).unwrap();
    ingest(&index, sample_rows());

    let hits = index
        .search_by_composition_excluding_excipients_with(
            &["Ibuprofen", "Paracetamol"],
            &["Peanut oil"],
            ExclusionPolicy::WholeDrugVeto,
        )
        .unwrap();
    let codes: Vec<&str> = hits.iter().map(|r| r.drug_code.as_str()).collect();
    assert_eq!(codes, vec!["001"]);
    // Unvetoed drugs report every matching excipient
    assert_eq!(hits[0].excipients, set(&["Lactose", "Starch"]));
}

#[test]
fn configured_exclusion_policy_is_used_by_default() {
    let index = DrugIndex::open_in_memory(IndexConfig {
        exclusion_policy: ExclusionPolicy::WholeDrugVeto,
        ..config()
    })
    .unwrap();
    ingest(&index, sample_rows());

    let hits = index
        .search_by_composition_excluding_excipients(&["Ibuprofen"], &["Peanut oil"])
        .unwrap();
    assert!(hits.is_empty());
}

#[test]
fn composition_search_is_any_of() {
    let index = DrugIndex::open_in_memory(config()).unwrap();
    ingest(&index, sample_rows());

    let hits = index
        .search_by_composition_excluding_excipients(&["Caffeine", "Tramadol"], &[] as &[&str])
        .unwrap();
    let codes: Vec<&str> = hits.iter().map(|r| r.drug_code.as_str()).collect();
    assert_eq!(codes, vec!["001", "003"]);
    // Only the matched composition terms are reported
    assert_eq!(hits[0].composition, set(&["Caffeine"]));
}

#[test]
fn exclusion_never_returns_fully_forbidden_drug() {
    let index = DrugIndex::open_in_memory(config()).unwrap();
    ingest(&index, sample_rows());

    for policy in [ExclusionPolicy::RowSurvival, ExclusionPolicy::WholeDrugVeto] {
        let hits = index
            .search_by_composition_excluding_excipients_with(
                &["Paracetamol", "Ibuprofen", "Tramadol"],
                &["Lactose", "Peanut oil", "Cellulose"],
                policy,
            )
            .unwrap();
        // 002 and 003 only have forbidden excipients on their matching rows
        assert!(hits.iter().all(|r| r.drug_code == "001"), "{policy}");
        assert!(hits.iter().all(|r| !r.excipients.contains("Lactose")));
    }
}

#[test]
fn row_with_empty_excipients_is_not_found() {
    let index = DrugIndex::open_in_memory(config()).unwrap();
    let run = ingest(&index, vec![row("004", "A02", "Omeprazole", "")]);

    assert_eq!(run.rows_skipped, 1);
    assert_eq!(index.count().unwrap(), 0);
    assert!(index.search_drug("004").unwrap().is_none());
}

#[test]
fn atc_lookup_excludes_requested_drug() {
    let index = DrugIndex::open_in_memory(config()).unwrap();
    ingest(&index, sample_rows());

    let similar = index.find_drugs_by_atc("N02A", Some("001")).unwrap();
    let codes: Vec<&str> = similar.iter().map(|r| r.drug_code.as_str()).collect();
    assert_eq!(codes, vec!["003"]);
    assert_eq!(index.find_drugs_by_atc("N02A", None).unwrap().len(), 2);
    assert!(index.find_drugs_by_atc("Z99", None).unwrap().is_empty());
}

#[test]
fn delete_then_search_is_not_found() {
    let index = DrugIndex::open_in_memory(config()).unwrap();
    ingest(&index, sample_rows());

    assert_eq!(index.delete_drug("001").unwrap(), 4);
    assert!(index.search_drug("001").unwrap().is_none());
    assert_eq!(index.count().unwrap(), 3);
}

#[test]
fn reingesting_same_stream_is_idempotent() {
    let index = DrugIndex::open_in_memory(config()).unwrap();
    ingest(&index, sample_rows());
    let count = index.count().unwrap();
    let all = index.list_all().unwrap();

    ingest(&index, sample_rows());
    assert_eq!(index.count().unwrap(), count);
    assert_eq!(index.list_all().unwrap(), all);
}

#[test]
fn upsert_update_leaves_stale_entries_for_dropped_terms() {
    let index = DrugIndex::open_in_memory(config()).unwrap();
    ingest(&index, vec![row("001", "N02A", "Paracetamol#Caffeine", "Lactose")]);

    let update = DrugUpdate {
        composition: Some(vec!["Paracetamol".into(), "Codeine".into()]),
        drug_name: Some("Renamed".into()),
        ..Default::default()
    };
    let record = index
        .update_drug_with("001", &update, UpdatePolicy::Upsert)
        .unwrap()
        .unwrap();

    // Caffeine was dropped by the update but its entry persists
    assert_eq!(record.composition, set(&["Caffeine", "Codeine", "Paracetamol"]));
    assert_eq!(index.count().unwrap(), 3);
    // Attributes still agree across every entry, stale ones included
    let entries = index.store().get_by_key_prefix("001").unwrap();
    assert!(entries.iter().all(|e| e.attributes.drug_name == "Renamed"));
}

#[test]
fn replace_update_removes_dropped_terms() {
    let index = DrugIndex::open_in_memory(config()).unwrap();
    ingest(&index, vec![row("001", "N02A", "Paracetamol#Caffeine", "Lactose")]);

    let update = DrugUpdate {
        composition: Some(vec!["Paracetamol".into(), "Codeine".into()]),
        excipients: Some(vec!["Starch".into()]),
        ..Default::default()
    };
    let record = index
        .update_drug_with("001", &update, UpdatePolicy::Replace)
        .unwrap()
        .unwrap();

    assert_eq!(record.composition, set(&["Codeine", "Paracetamol"]));
    assert_eq!(record.excipients, set(&["Starch"]));
    assert_eq!(index.count().unwrap(), 2);
}

#[test]
fn upsert_atc_override_moves_every_entry() {
    let index = DrugIndex::open_in_memory(config()).unwrap();
    ingest(&index, vec![row("001", "N02A", "Paracetamol#Caffeine", "Lactose")]);

    for atc in ["A01", "Z99"] {
        let update = DrugUpdate {
            atc_code: Some(atc.into()),
            ..Default::default()
        };
        let record = index
            .update_drug_with("001", &update, UpdatePolicy::Upsert)
            .unwrap()
            .unwrap();
        assert_eq!(record.atc_code, atc);
        assert_eq!(index.count().unwrap(), 2);
        assert_eq!(index.search_drug("001").unwrap().unwrap().atc_code, atc);
    }

    assert!(index.find_drugs_by_atc("N02A", None).unwrap().is_empty());
    assert!(index.find_drugs_by_atc("A01", None).unwrap().is_empty());
    assert_eq!(index.find_drugs_by_atc("Z99", None).unwrap().len(), 1);
}

#[test]
fn upsert_atc_override_carries_stale_terms_to_new_code() {
    let index = DrugIndex::open_in_memory(config()).unwrap();
    ingest(&index, vec![row("001", "N02A", "Paracetamol#Caffeine", "Lactose")]);

    let update = DrugUpdate {
        atc_code: Some("N02BE51".into()),
        composition: Some(vec!["Paracetamol".into(), "Codeine".into()]),
        drug_name: Some("Renamed".into()),
        ..Default::default()
    };
    let record = index
        .update_drug_with("001", &update, UpdatePolicy::Upsert)
        .unwrap()
        .unwrap();

    // Caffeine stays as a stale term, but under the new code
    assert_eq!(record.composition, set(&["Caffeine", "Codeine", "Paracetamol"]));
    let entries = index.store().get_by_key_prefix("001").unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.key.atc_code == "N02BE51"));
    assert!(entries.iter().all(|e| e.attributes.drug_name == "Renamed"));
}

#[test]
fn replace_update_moves_atc_code_cleanly() {
    let index = DrugIndex::open_in_memory(IndexConfig {
        update_policy: UpdatePolicy::Replace,
        ..config()
    })
    .unwrap();
    ingest(&index, sample_rows());

    let update = DrugUpdate {
        atc_code: Some("N02BE51".into()),
        ..Default::default()
    };
    let record = index.update_drug("001", &update).unwrap().unwrap();
    assert_eq!(record.atc_code, "N02BE51");
    assert_eq!(index.find_drugs_by_atc("N02A", None).unwrap().len(), 1);
    assert_eq!(index.count().unwrap(), 7);
}

#[test]
fn later_row_for_same_drug_refreshes_attributes() {
    let index = DrugIndex::open_in_memory(config()).unwrap();
    ingest(&index, vec![row("001", "N02A", "Paracetamol#Caffeine", "Lactose")]);

    let mut later = row("001", "N02A", "Paracetamol", "Lactose");
    later.drug_name = "Tachipirina Flash".into();
    ingest(&index, vec![later]);

    let record = index.search_drug("001").unwrap().unwrap();
    assert_eq!(record.attributes.drug_name, "Tachipirina Flash");
    assert_eq!(record.composition, set(&["Caffeine", "Paracetamol"]));
}

#[test]
fn stats_track_entries_and_drugs_separately() {
    let index = DrugIndex::open_in_memory(config()).unwrap();
    ingest(&index, sample_rows());

    let stats = index.stats().unwrap();
    assert_eq!(stats.entries, index.count().unwrap());
    assert_eq!(stats.entries, 7);
    assert_eq!(stats.drugs, 3);
    assert_eq!(stats.composition_terms, 4);
    assert_eq!(stats.excipient_terms, 4);
}

#[test]
fn readers_only_see_committed_batches() {
    const ROWS: usize = 60;
    const ROWS_PER_BATCH: usize = 5;
    const ENTRIES_PER_DRUG: u64 = 4;

    let dir = tempfile::tempdir().unwrap();
    let index = DrugIndex::open(&IndexConfig {
        db_path: dir.path().join("index.db"),
        batch_size: ROWS_PER_BATCH,
        ..config()
    })
    .unwrap();

    let done = AtomicBool::new(false);
    let observed = std::thread::scope(|scope| {
        let reader = scope.spawn(|| {
            let mut observed = Vec::new();
            while !done.load(Ordering::SeqCst) {
                observed.push(index.count().unwrap());
            }
            observed
        });

        let rows = (0..ROWS).map(|i| row(&format!("{i:03}"), "N02A", "A#B", "X#Y"));
        let mut run = IngestRun::new();
        index.loader().unwrap().ingest_rows(rows, &mut run).unwrap();
        done.store(true, Ordering::SeqCst);

        reader.join().unwrap()
    });

    let batch_entries = ROWS_PER_BATCH as u64 * ENTRIES_PER_DRUG;
    assert!(observed.iter().all(|count| count % batch_entries == 0));
    assert!(observed.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(index.count().unwrap(), ROWS as u64 * ENTRIES_PER_DRUG);
}

fn term_list() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z]{1,6}", 0..4)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn count_is_sum_of_per_drug_cross_products(
        drugs in prop::collection::vec((term_list(), term_list()), 1..8)
    ) {
        let index = DrugIndex::open_in_memory(config()).unwrap();
        let rows: Vec<RawDrugRow> = drugs
            .iter()
            .enumerate()
            .map(|(i, (comp, exc))| row(&format!("D{i}"), "N02A", &comp.join("#"), &exc.join("#")))
            .collect();
        ingest(&index, rows);

        let expected: u64 = drugs
            .iter()
            .map(|(comp, exc)| {
                let c: BTreeSet<&String> = comp.iter().collect();
                let e: BTreeSet<&String> = exc.iter().collect();
                (c.len() * e.len()) as u64
            })
            .sum();
        prop_assert_eq!(index.count().unwrap(), expected);

        for (i, (comp, exc)) in drugs.iter().enumerate() {
            let record = index.search_drug(&format!("D{i}")).unwrap();
            if comp.is_empty() || exc.is_empty() {
                prop_assert!(record.is_none());
            } else {
                let record = record.unwrap();
                prop_assert_eq!(record.composition, comp.iter().cloned().collect::<BTreeSet<_>>());
                prop_assert_eq!(record.excipients, exc.iter().cloned().collect::<BTreeSet<_>>());
            }
        }
    }
}
