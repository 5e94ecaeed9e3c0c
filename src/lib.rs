pub mod config;
pub mod db;
pub mod index; // Store, expansion and query facade
pub mod ingest; // CSV source and batch loader
pub mod models;
pub mod normalize;

pub use config::IndexConfig;
pub use index::{DrugIndex, FormulationStore, IndexError, SqliteFormulationStore};
pub use ingest::{BatchLoader, IngestError, IngestReport, IngestRun};
pub use models::{DrugRecord, DrugUpdate, RawDrugRow};
pub use normalize::TermNormalizer;

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber, filtered by `RUST_LOG` or the default
/// filter. A second call is a no-op.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();
}
