use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::{CasePolicy, ExclusionPolicy, UpdatePolicy};

/// Application-level constants
pub const APP_NAME: &str = "Formulary";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Raw rows per flush window during ingestion.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Delimiter joining composition / excipient terms in source rows.
pub const TERM_DELIMITER: char = '#';

/// Upper bound on default normalization workers.
const MAX_DEFAULT_WORKERS: usize = 8;

const DB_FILE_NAME: &str = "formulation_index.db";

/// Get the application data directory
/// (platform data dir, falling back to the working directory).
pub fn app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Default on-disk location of the formulation index
pub fn default_db_path() -> PathBuf {
    app_data_dir().join(DB_FILE_NAME)
}

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "formulary=info"
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_DEFAULT_WORKERS)
}

/// Runtime configuration for the index, its queries and its loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub db_path: PathBuf,
    pub case_policy: CasePolicy,
    pub exclusion_policy: ExclusionPolicy,
    pub update_policy: UpdatePolicy,
    pub batch_size: usize,
    pub workers: usize,
    pub term_delimiter: char,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            case_policy: CasePolicy::default(),
            exclusion_policy: ExclusionPolicy::default(),
            update_policy: UpdatePolicy::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            workers: default_workers(),
            term_delimiter: TERM_DELIMITER,
        }
    }
}

impl IndexConfig {
    /// Defaults overlaid with `FORMULARY_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Overlay values from a variable lookup. Unparseable values are logged
    /// and the current value is kept.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(path) = lookup("FORMULARY_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        override_parsed(&lookup, "FORMULARY_CASE_POLICY", &mut self.case_policy);
        override_parsed(&lookup, "FORMULARY_EXCLUSION_POLICY", &mut self.exclusion_policy);
        override_parsed(&lookup, "FORMULARY_UPDATE_POLICY", &mut self.update_policy);
        override_parsed(&lookup, "FORMULARY_BATCH_SIZE", &mut self.batch_size);
        override_parsed(&lookup, "FORMULARY_WORKERS", &mut self.workers);
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be at least 1".into());
        }
        if self.workers == 0 {
            return Err("workers must be at least 1".into());
        }
        if self.term_delimiter.is_whitespace() {
            return Err("term_delimiter cannot be whitespace".into());
        }
        Ok(())
    }
}

fn override_parsed<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, target: &mut T)
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(name) else { return };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(e) => tracing::warn!(variable = name, value = %raw, error = %e, "Ignoring invalid config override"),
    }
}
