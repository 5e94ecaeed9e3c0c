//! formulary-load: bulk-load a drug CSV into the formulation index.
//!
//! Usage: formulary-load <rows.csv> [index.db]
//!
//! Policies, batch size and workers come from `FORMULARY_*` variables.

use std::error::Error;
use std::path::PathBuf;

use formulary::{init_tracing, DrugIndex, IndexConfig, IngestRun};

fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        let program = args.first().map(String::as_str).unwrap_or("formulary-load");
        eprintln!("Usage: {program} <rows.csv> [index.db]");
        std::process::exit(2);
    }
    let csv_path = PathBuf::from(&args[1]);

    let mut config = IndexConfig::from_env();
    if let Some(db_path) = args.get(2) {
        config.db_path = PathBuf::from(db_path);
    }
    config.validate()?;

    tracing::info!("Formulary loader v{}", formulary::config::APP_VERSION);
    let index = DrugIndex::open(&config)?;
    let loader = index.loader()?;

    let mut run = IngestRun::new();
    let outcome = loader.ingest_csv(&csv_path, &mut run);
    let report = run.finish();
    let stats = index.stats()?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "report": report,
            "stats": stats,
        }))?
    );

    outcome?;
    Ok(())
}
